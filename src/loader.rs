// Copyright (c) 2026-present, treeseal contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The Recursive Loader (spec §4.4) — "the hard part": lazy, on-demand
//! loading of the Manifest forest, and the query API the Tree Verifier
//! and the Updater build on.

use crate::compression;
use crate::entry::{Entry, Manifest, Tag};
use crate::error::{Error, Result};
use crate::format::ManifestCodec;
use crate::hash::HashProvider;
use crate::verify;
use log::{debug, trace};
use std::collections::{BTreeMap, BTreeSet};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// In-process configuration for a [`ManifestLoader`] (spec §1's excluded
/// CLI/config surface is replaced by plain construction arguments).
pub struct LoaderOptions {
    /// Whether OpenPGP cleartext signatures should be checked on load.
    /// The codec collaborator in this crate never actually verifies a
    /// signature; this only controls whether `load` is asked to.
    pub verify_openpgp: bool,
    /// Default hash set used by update operations that don't specify
    /// their own (spec §4.6).
    pub hashes: Option<Vec<String>>,
    /// Whether a missing top-level Manifest should be created empty
    /// rather than treated as an error.
    pub allow_create: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            verify_openpgp: true,
            hashes: None,
            allow_create: false,
        }
    }
}

/// Owns the Manifest forest (spec §3 "Forest state") and implements the
/// Recursive Loader's query API. The Updater and Tree Verifier are
/// implemented as further inherent methods on this type, in
/// [`crate::updater`] and [`crate::tree_verify`] respectively — all three
/// components share the same forest.
pub struct ManifestLoader {
    pub(crate) root_dir: PathBuf,
    pub(crate) top_path: PathBuf,
    pub(crate) loaded: BTreeMap<PathBuf, Manifest>,
    pub(crate) dirty: BTreeSet<PathBuf>,
    pub(crate) device_id: Option<u64>,
    pub(crate) top_signed: bool,
    pub(crate) options: LoaderOptions,
    pub(crate) codec: Box<dyn ManifestCodec>,
    pub(crate) hasher: Box<dyn HashProvider>,
}

impl ManifestLoader {
    /// Constructs a loader rooted at `top_manifest_path`. The top-level
    /// Manifest is loaded immediately, or created empty if
    /// `options.allow_create` and it doesn't exist.
    pub fn new(
        top_manifest_path: impl AsRef<Path>,
        options: LoaderOptions,
        codec: Box<dyn ManifestCodec>,
        hasher: Box<dyn HashProvider>,
    ) -> Result<Self> {
        let top_manifest_path = top_manifest_path.as_ref();
        let root_dir = top_manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let relpath = PathBuf::from(
            top_manifest_path
                .file_name()
                .expect("top Manifest path names a file"),
        );

        let mut loader = Self {
            root_dir,
            top_path: relpath.clone(),
            loaded: BTreeMap::new(),
            dirty: BTreeSet::new(),
            device_id: None,
            top_signed: false,
            options,
            codec,
            hasher,
        };
        loader.load_manifest(&relpath, None)?;
        loader.top_signed = loader
            .loaded
            .get(&relpath)
            .map(|m| m.signed)
            .unwrap_or(false);
        Ok(loader)
    }

    #[must_use]
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// The path of the top-level Manifest, relative to [`Self::root_dir`].
    #[must_use]
    pub fn top_path(&self) -> &Path {
        &self.top_path
    }

    #[must_use]
    pub fn device_id(&self) -> Option<u64> {
        self.device_id
    }

    #[must_use]
    pub fn top_signed(&self) -> bool {
        self.top_signed
    }

    #[must_use]
    pub fn dirty_paths(&self) -> Vec<PathBuf> {
        self.dirty.iter().cloned().collect()
    }

    /// The hash collaborator this loader was constructed with, for callers
    /// (like [`crate::tree_verify`]) that need to drive their own probes
    /// outside the loader's query API.
    #[must_use]
    pub fn hasher_ref(&self) -> &dyn HashProvider {
        self.hasher.as_ref()
    }

    /// Loads a single Manifest file at `relpath` (relative to the root).
    /// If `verify_entry` is given, the file is verified against it first
    /// (a `MANIFEST` entry from a parent Manifest). Registers the loaded
    /// (or newly created) Manifest in the forest.
    pub fn load_manifest(&mut self, relpath: &Path, verify_entry: Option<&Entry>) -> Result<()> {
        trace!("load_manifest({})", relpath.display());
        let abs_path = self.root_dir.join(relpath);

        if let Some(entry) = verify_entry {
            let (ok, diff) =
                verify::verify_path(&abs_path, Some(entry), self.device_id, self.hasher.as_ref())?;
            if !ok {
                return Err(Error::ManifestMismatch {
                    path: relpath.to_path_buf(),
                    entry: Some(entry.clone()),
                    diff,
                });
            }
        }

        match compression::open_read(&abs_path) {
            Ok(mut reader) => {
                let dev = std::fs::metadata(&abs_path)?.dev();
                let (entries, signed) =
                    self.codec.load(&mut reader, self.options.verify_openpgp, None)?;
                if self.device_id.is_none() {
                    self.device_id = Some(dev);
                }
                self.loaded.insert(relpath.to_path_buf(), Manifest { entries, signed });
                Ok(())
            }
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound && self.options.allow_create => {
                let parent = abs_path.parent().unwrap_or(&self.root_dir);
                let dev = std::fs::metadata(parent)?.dev();
                if self.device_id.is_none() {
                    self.device_id = Some(dev);
                }
                self.loaded.insert(relpath.to_path_buf(), Manifest::new());
                self.dirty.insert(relpath.to_path_buf());
                debug!("created new empty Manifest at {}", relpath.display());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Loaded Manifests applicable to `path`, deepest-first (spec §4.4).
    /// When `recursive`, Manifests scoped to subdirectories of `path` are
    /// included too.
    #[must_use]
    pub fn manifests_for_path(&self, path: &Path, recursive: bool) -> Vec<(&Path, &Path, &Manifest)> {
        let mut out: Vec<(&Path, &Path, &Manifest)> = self
            .loaded
            .iter()
            .filter_map(|(k, m)| {
                let d = k.parent().unwrap_or(Path::new(""));
                if path_starts_with(path, d) || (recursive && path_starts_with(d, path)) {
                    Some((k.as_path(), d, m))
                } else {
                    None
                }
            })
            .collect();
        out.sort_by_key(|(_, d, _)| std::cmp::Reverse(d.as_os_str().len()));
        out
    }

    /// Fixed-point loop (spec §4.4, §9): loads every `MANIFEST` entry
    /// reachable from the currently-loaded Manifests applicable to
    /// `path`, repeating until no new loads are triggered.
    pub fn ensure_loaded_for_path(&mut self, path: &Path, recursive: bool) -> Result<()> {
        loop {
            let mut to_load: Vec<(PathBuf, Entry)> = Vec::new();
            for (curmpath, relpath, m) in self.manifests_for_path(path, recursive) {
                for e in &m.entries {
                    if e.tag() != Tag::Manifest {
                        continue;
                    }
                    let mpath = relpath.join(e.raw_path().expect("MANIFEST entry has a path"));
                    if curmpath == mpath || self.loaded.contains_key(&mpath) {
                        continue;
                    }
                    let mdir = mpath.parent().unwrap_or(Path::new(""));
                    if path_starts_with(path, mdir) || (recursive && path_starts_with(mdir, path)) {
                        to_load.push((mpath, e.clone()));
                    }
                }
            }
            if to_load.is_empty() {
                break;
            }
            for (mpath, e) in to_load {
                self.load_manifest(&mpath, Some(&e))?;
            }
        }
        Ok(())
    }

    /// The tree's `TIMESTAMP` entry, if any (spec §4.4).
    pub fn find_timestamp(&mut self) -> Result<Option<String>> {
        self.ensure_loaded_for_path(Path::new(""), false)?;
        for (_, _, m) in self.manifests_for_path(Path::new(""), false) {
            for e in &m.entries {
                if let Entry::Timestamp { value } = e {
                    return Ok(Some(value.clone()));
                }
            }
        }
        Ok(None)
    }

    /// The entry covering `path` — the deepest applicable `IGNORE` whose
    /// scope contains it, else the first composed-path match — or `None`
    /// for a stray file (spec §4.4).
    pub fn find_path_entry(&mut self, path: &Path) -> Result<Option<Entry>> {
        self.ensure_loaded_for_path(path, false)?;
        for (_, relpath, m) in self.manifests_for_path(path, false) {
            for e in &m.entries {
                match e {
                    Entry::Ignore { path: ignore_path } => {
                        let full = relpath.join(ignore_path);
                        if path_starts_with(path, &full) {
                            return Ok(Some(e.clone()));
                        }
                    }
                    Entry::Dist(_) | Entry::Timestamp { .. } => {}
                    _ => {
                        let full = composed_path(relpath, e);
                        if full == path {
                            return Ok(Some(e.clone()));
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    /// The `DIST` entry for `filename`, searched within Manifests whose
    /// scope covers `dir_hint` (spec §4.4).
    pub fn find_dist_entry(&mut self, filename: &str, dir_hint: &Path) -> Result<Option<Entry>> {
        self.ensure_loaded_for_path(dir_hint, false)?;
        for (_, _, m) in self.manifests_for_path(dir_hint, false) {
            for e in &m.entries {
                if let Entry::Dist(f) = e {
                    if f.path.as_os_str() == filename {
                        return Ok(Some(e.clone()));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Recursively composes the entry set applicable to `path`: every
    /// non-`DIST`/non-`TIMESTAMP` entry (filtered by `only_tags` if
    /// given), keyed by composed full path. Overlapping entries for the
    /// same path are merged via [`verify::verify_entry_compatibility`];
    /// an incompatibility is a hard error (spec §4.4).
    pub fn composed_entry_set(
        &mut self,
        path: &Path,
        only_tags: Option<&[Tag]>,
    ) -> Result<BTreeMap<PathBuf, Entry>> {
        self.ensure_loaded_for_path(path, true)?;
        debug!("composing entry set for {}", path.display());

        let mut out: BTreeMap<PathBuf, Entry> = BTreeMap::new();
        for (_, relpath, m) in self.manifests_for_path(path, true) {
            for e in &m.entries {
                let tag = e.tag();
                let mut owning_dir = relpath;
                if let Some(tags) = only_tags {
                    if !tags.contains(&tag) {
                        continue;
                    }
                    if tag == Tag::Dist {
                        // DIST entries are catalog-only; their composed
                        // path is the bare filename, never nested.
                        owning_dir = Path::new("");
                    }
                } else if matches!(tag, Tag::Dist | Tag::Timestamp) {
                    continue;
                }

                let full = if tag == Tag::Aux && only_tags.is_none() {
                    owning_dir.join("files").join(e.raw_path().expect("composable entry has a path"))
                } else {
                    owning_dir.join(e.raw_path().expect("composable entry has a path"))
                };
                if !path_starts_with(&full, path) {
                    continue;
                }

                match out.remove(&full) {
                    None => {
                        out.insert(full, e.clone());
                    }
                    Some(existing) => {
                        let (compatible, diff) = verify::verify_entry_compatibility(&existing, e);
                        if !compatible {
                            return Err(Error::ManifestIncompatibleEntry {
                                e1: Box::new(existing),
                                e2: Box::new(e.clone()),
                                diff,
                            });
                        }
                        out.insert(full, union_checksums(existing, e));
                    }
                }
            }
        }
        Ok(out)
    }
}

/// `true` iff `prefix` is `""`, equals `path`, or is a proper directory
/// ancestor of `path` — the composed-path containment test used
/// throughout the loader (gemato's `path_starts_with`).
pub(crate) fn path_starts_with(path: &Path, prefix: &Path) -> bool {
    prefix.as_os_str().is_empty() || path == prefix || path.starts_with(prefix)
}

/// Composes `e`'s on-disk path relative to the tree root, given the
/// directory (`relpath`) of the Manifest that owns it. `AUX` entries are
/// stored without their implicit `files/` prefix (spec §3); every other
/// file-kind and `IGNORE` entry composes directly.
pub(crate) fn composed_path(relpath: &Path, e: &Entry) -> PathBuf {
    let raw = e.raw_path().expect("composable entry has a path");
    if e.tag() == Tag::Aux {
        relpath.join("files").join(raw)
    } else {
        relpath.join(raw)
    }
}

fn union_checksums(mut kept: Entry, incoming: &Entry) -> Entry {
    if let (Some(kf), Some(ef)) = (kept.file_entry_mut(), incoming.file_entry()) {
        for (k, v) in &ef.checksums {
            kf.checksums.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    kept
}
