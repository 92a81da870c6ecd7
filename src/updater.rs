// Copyright (c) 2026-present, treeseal contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The Updater / Saver (spec §4.6): point updates, deduplication across
//! overlapping Manifests, directory-wide updates, and the two-pass save
//! with compression watermarking.

use crate::compression;
use crate::entry::{Checksums, Entry, Manifest, Tag};
use crate::error::{Error, Result};
use crate::loader::{composed_path, path_starts_with, ManifestLoader};
use crate::profile::Profile;
use crate::verify;
use crate::walk::{join_rel, walk_tree};
use log::{debug, trace};
use std::collections::{BTreeMap, BTreeSet};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

impl ManifestLoader {
    /// Updates (or creates, or removes) the entry for `path` (spec
    /// §4.6). `path` must not be covered by an `IGNORE` entry.
    pub fn update_entry_for_path(
        &mut self,
        path: &Path,
        new_tag: Tag,
        hashes: Option<&[String]>,
    ) -> Result<()> {
        trace!("update_entry_for_path({})", path.display());
        let hash_names = self.resolve_hashes(hashes);

        self.ensure_loaded_for_path(path, false)?;

        let scope: Vec<(PathBuf, PathBuf)> = self
            .manifests_for_path(path, false)
            .into_iter()
            .map(|(k, d, _)| (k.to_path_buf(), d.to_path_buf()))
            .collect();

        let abs_path = self.root_dir.join(path);
        let mut had_entry = false;

        for (mpath, relpath) in &scope {
            let mut entries_to_remove: Vec<usize> = Vec::new();
            let mut manifest_mutated = false;
            let manifest = self
                .loaded
                .get_mut(mpath)
                .expect("Manifest listed by manifests_for_path is loaded");

            for (idx, e) in manifest.entries.iter_mut().enumerate() {
                match e {
                    Entry::Ignore { .. } | Entry::Dist(_) | Entry::Timestamp { .. } => continue,
                    Entry::Optional(f) => {
                        if relpath.join(&f.path).as_path() == path {
                            had_entry = true;
                        }
                    }
                    _ => {
                        // AUX's implicit `files/` prefix must be re-added
                        // here too, the same way `composed_entry_set` does
                        // it, or an AUX entry's path never matches `path`.
                        let full = composed_path(relpath, &*e);
                        if full.as_path() != path {
                            continue;
                        }
                        if had_entry {
                            entries_to_remove.push(idx);
                            manifest_mutated = true;
                            continue;
                        }
                        let f = e.file_entry_mut().expect("file-kind entry");
                        let exists = verify::update_file_entry(
                            &abs_path,
                            f,
                            &hash_names,
                            self.device_id,
                            self.hasher.as_ref(),
                        )?;
                        if !exists {
                            entries_to_remove.push(idx);
                        }
                        manifest_mutated = true;
                        had_entry = true;
                    }
                }
            }

            for idx in entries_to_remove.into_iter().rev() {
                manifest.entries.remove(idx);
            }
            if manifest_mutated {
                self.dirty.insert(mpath.clone());
            }
        }

        if !had_entry {
            self.create_entry_for_path(path, new_tag, &hash_names)?;
        }

        Ok(())
    }

    fn create_entry_for_path(&mut self, path: &Path, new_tag: Tag, hash_names: &[String]) -> Result<()> {
        if hash_names.is_empty() {
            return Err(Error::ManifestInvalidPath(
                "no hash set available to create a new entry".to_string(),
            ));
        }
        if matches!(new_tag, Tag::Dist | Tag::Ignore | Tag::Timestamp) {
            return Err(Error::ManifestInvalidPath(format!(
                "{new_tag:?} cannot be created through update_entry_for_path"
            )));
        }

        let scope: Vec<(PathBuf, PathBuf)> = self
            .manifests_for_path(path, false)
            .into_iter()
            .map(|(k, d, _)| (k.to_path_buf(), d.to_path_buf()))
            .collect();
        let Some((mpath, relpath)) = scope.into_iter().next() else {
            return Err(Error::ManifestInvalidPath(format!(
                "no Manifest scope covers {}",
                path.display()
            )));
        };

        let mut newpath = path
            .strip_prefix(&relpath)
            .map_err(|_| {
                Error::ManifestInvalidPath(format!(
                    "{} is outside the scope of {}",
                    path.display(),
                    relpath.display()
                ))
            })?
            .to_path_buf();

        if new_tag == Tag::Aux {
            newpath = newpath
                .strip_prefix("files")
                .map_err(|_| Error::ManifestInvalidPath("AUX entries must live under files/".to_string()))?
                .to_path_buf();
        }

        let mut entry = Entry::new_of_tag(new_tag, newpath, 0, Checksums::new());
        let abs_path = self.root_dir.join(path);
        let f = entry.file_entry_mut().expect("new_of_tag builds a file-kind entry");
        verify::update_file_entry(&abs_path, f, hash_names, self.device_id, self.hasher.as_ref())?;

        self.loaded
            .get_mut(&mpath)
            .expect("Manifest just listed is loaded")
            .entries
            .push(entry);
        self.dirty.insert(mpath);
        Ok(())
    }

    /// Deduplicates entries covering paths under `path`, unioning
    /// checksums across compatible duplicates and keeping the deepest
    /// one (spec §4.6). Returns the surviving entries keyed by composed
    /// path, alongside the Manifest that owns each.
    pub fn dedup_entries(&mut self, path: &Path) -> Result<BTreeMap<PathBuf, (PathBuf, Entry)>> {
        self.ensure_loaded_for_path(path, true)?;

        let scope: Vec<(PathBuf, PathBuf)> = self
            .manifests_for_path(path, true)
            .into_iter()
            .map(|(k, d, _)| (k.to_path_buf(), d.to_path_buf()))
            .collect();

        let mut out: BTreeMap<PathBuf, (PathBuf, Entry)> = BTreeMap::new();

        for (mpath, relpath) in &scope {
            let mut entries_to_remove: Vec<usize> = Vec::new();
            let manifest = self
                .loaded
                .get_mut(mpath)
                .expect("Manifest listed by manifests_for_path is loaded");

            for (idx, e) in manifest.entries.iter().enumerate() {
                if matches!(e.tag(), Tag::Dist | Tag::Timestamp) {
                    continue;
                }
                // AUX's implicit `files/` prefix must be re-added here, the
                // same way `composed_entry_set` does it, or an AUX entry
                // dedups at the wrong path and the walk in
                // `update_directory_entries` never matches it to its file.
                let full = composed_path(relpath, e);
                if !path_starts_with(&full, path) {
                    continue;
                }

                match out.get_mut(&full) {
                    None => {
                        out.insert(full, (mpath.clone(), e.clone()));
                    }
                    Some((_, kept)) => {
                        let (_, diff) = verify::verify_entry_compatibility(kept, e);
                        let type_mismatch =
                            diff.first().map(|(field, ..)| field == "__type__").unwrap_or(false);
                        if type_mismatch {
                            return Err(Error::ManifestIncompatibleEntry {
                                e1: Box::new(kept.clone()),
                                e2: Box::new(e.clone()),
                                diff,
                            });
                        }
                        if let (Some(kf), Some(ef)) = (kept.file_entry_mut(), e.file_entry()) {
                            for (k, v) in &ef.checksums {
                                kf.checksums.insert(k.clone(), v.clone());
                            }
                        }
                        entries_to_remove.push(idx);
                    }
                }
            }

            if !entries_to_remove.is_empty() {
                for idx in entries_to_remove.into_iter().rev() {
                    manifest.entries.remove(idx);
                }
                self.dirty.insert(mpath.clone());
            }
        }

        Ok(out)
    }

    /// Discovers Manifest files under `path` that aren't yet referenced
    /// by any loaded Manifest's `MANIFEST` entries, loads the
    /// syntactically valid ones (silently skipping the rest — they were
    /// only a guess), and returns their relative paths (spec §4.6 step
    /// 1).
    fn load_unregistered_manifests(&mut self, path: &Path) -> Result<Vec<PathBuf>> {
        let ignore_entries = self.composed_entry_set(path, Some(&[Tag::Ignore]))?;
        let mut new_manifests = Vec::new();

        let mut to_load: Vec<PathBuf> = Vec::new();
        {
            let loaded = &self.loaded;
            let root_dir = self.root_dir.clone();
            walk_tree(&root_dir, path, &mut |rel, dirnames, filenames| {
                dirnames.retain(|d| !ignore_entries.contains_key(&join_rel(rel, d)));

                for name in manifest_candidate_names() {
                    if filenames.iter().any(|f| f == &name) {
                        let fpath = join_rel(rel, &name);
                        if !loaded.contains_key(&fpath) {
                            to_load.push(fpath);
                        }
                    }
                }
                Ok(())
            })?;
        }

        for fpath in to_load {
            if self.loaded.contains_key(&fpath) {
                continue;
            }
            match self.load_manifest(&fpath, None) {
                Ok(()) => {
                    debug!("discovered unregistered Manifest at {}", fpath.display());
                    new_manifests.push(fpath);
                }
                Err(Error::ManifestSyntaxError(_)) => {
                    // Not actually a Manifest; the filename was a guess.
                }
                Err(e) => return Err(e),
            }
        }

        Ok(new_manifests)
    }

    /// Directory-wide update (spec §4.6, the heaviest operation): scans
    /// for unregistered sub-Manifests, deduplicates the existing entry
    /// set, then walks the tree adding entries for new files, retiring
    /// entries for removed ones, and creating sub-Manifests the profile
    /// requests.
    pub fn update_directory_entries(
        &mut self,
        path: &Path,
        hashes: Option<&[String]>,
        profile: &dyn Profile,
    ) -> Result<()> {
        trace!("update_directory_entries({})", path.display());
        let hash_names = self.resolve_hashes(hashes);
        if hash_names.is_empty() {
            return Err(Error::ManifestInvalidPath(
                "no hash set available for a directory-wide update".to_string(),
            ));
        }

        let new_manifests: BTreeSet<PathBuf> =
            self.load_unregistered_manifests(path)?.into_iter().collect();
        let mut entry_map = self.dedup_entries(path)?;

        let scope_top = self
            .manifests_for_path(path, false)
            .into_iter()
            .map(|(k, d, _)| (k.to_path_buf(), d.to_path_buf()))
            .next()
            .ok_or_else(|| {
                Error::ManifestInvalidPath(format!("no Manifest scope covers {}", path.display()))
            })?;
        let mut manifest_stack: Vec<(PathBuf, PathBuf)> = vec![scope_top];

        let root_dir = self.root_dir.clone();
        let device_id = self.device_id;
        let manifest_filenames = manifest_candidate_names();

        let mut pending_new_entries: BTreeMap<PathBuf, Vec<(Tag, PathBuf)>> = BTreeMap::new();
        let mut new_empty_submanifests: Vec<PathBuf> = Vec::new();

        walk_tree(&root_dir, path, &mut |rel, dirnames, filenames| {
            while !path_starts_with(rel, &manifest_stack.last().expect("stack never empties").1) {
                manifest_stack.pop();
            }

            let dirname_strs: Vec<String> = dirnames.clone();
            let filename_strs: Vec<String> = filenames.to_vec();
            let wants_manifest = profile.wants_manifest_in_directory(
                &root_dir.join(rel),
                &dirname_strs,
                &filename_strs,
            );
            if wants_manifest && manifest_stack.last().map(|(_, d)| d.as_path()) != Some(rel) {
                let mpath = join_rel(rel, "Manifest");
                manifest_stack.push((mpath.clone(), rel.to_path_buf()));
                new_empty_submanifests.push(mpath.clone());
                pending_new_entries.entry(rel.to_path_buf()).or_default().push((Tag::Manifest, mpath));
            }

            let mut skip = Vec::new();
            for d in dirnames.iter() {
                if d.starts_with('.') {
                    skip.push(d.clone());
                    continue;
                }
                let dpath = join_rel(rel, d);
                match entry_map.remove(&dpath) {
                    None => {
                        let abs = root_dir.join(&dpath);
                        let dev = std::fs::metadata(&abs)?.dev();
                        if let Some(expected) = device_id {
                            if dev != expected {
                                return Err(Error::ManifestCrossDevice(abs));
                            }
                        }
                    }
                    Some((_, e)) => {
                        if matches!(e.tag(), Tag::Ignore) {
                            skip.push(d.clone());
                        }
                    }
                }
            }
            dirnames.retain(|d| !skip.contains(d));

            for f in filenames {
                if f.starts_with('.') {
                    continue;
                }
                let fpath = join_rel(rel, f);
                if manifest_filenames.contains(f) && rel.as_os_str().is_empty() {
                    continue;
                }

                match entry_map.remove(&fpath) {
                    Some((_, e)) => {
                        if e.tag() == Tag::Manifest {
                            manifest_stack.push((fpath.clone(), rel.to_path_buf()));
                        }
                        // Anything else: already accounted for, nothing to add.
                    }
                    None => {
                        let tag = if new_manifests.contains(&fpath) {
                            manifest_stack.push((fpath.clone(), rel.to_path_buf()));
                            Tag::Manifest
                        } else {
                            profile.entry_type_for_path(&root_dir.join(&fpath))
                        };
                        pending_new_entries.entry(rel.to_path_buf()).or_default().push((tag, fpath));
                    }
                }
            }

            Ok(())
        })?;

        // A profile-requested sub-Manifest has no file on disk yet — seed
        // an empty one in the forest directly rather than routing it
        // through `load_manifest`, which expects the file to already
        // exist unless the loader itself was constructed with
        // `allow_create`.
        for mpath in new_empty_submanifests {
            if let std::collections::btree_map::Entry::Vacant(slot) = self.loaded.entry(mpath.clone()) {
                slot.insert(Manifest::new());
                self.dirty.insert(mpath);
            }
        }

        self.materialize_pending_entries(pending_new_entries, &hash_names)?;

        for (full, (mpath, entry)) in entry_map {
            if matches!(entry.tag(), Tag::Ignore | Tag::Optional) {
                continue;
            }
            let manifest = self
                .loaded
                .get_mut(&mpath)
                .expect("owning Manifest of a dedup survivor is loaded");
            if let Some(idx) = manifest.entries.iter().position(|e| e == &entry) {
                manifest.entries.remove(idx);
                self.dirty.insert(mpath);
            }
            debug!("retired entry for removed path {}", full.display());
        }

        Ok(())
    }

    /// Creates (or loads) sub-Manifests discovered by
    /// `update_directory_entries`, probes each new file/Manifest entry
    /// and places it in the ancestor Manifest that owns its directory
    /// (spec §4.6 steps 4-5).
    fn materialize_pending_entries(
        &mut self,
        pending: BTreeMap<PathBuf, Vec<(Tag, PathBuf)>>,
        hash_names: &[String],
    ) -> Result<()> {
        for (dir, items) in pending {
            for (tag, fpath) in items {
                if tag == Tag::Manifest {
                    if !self.loaded.contains_key(&fpath) {
                        self.load_manifest(&fpath, None)?;
                    }
                }

                let owning_dir = if tag == Tag::Manifest {
                    // MANIFEST entries live one level up from their own
                    // directory (spec §4.6 step 5).
                    dir.parent().unwrap_or(Path::new(""))
                } else {
                    dir.as_path()
                };
                let owning_mpath = self
                    .manifests_for_path(owning_dir, false)
                    .into_iter()
                    .map(|(k, _, _)| k.to_path_buf())
                    .next()
                    .ok_or_else(|| {
                        Error::ManifestInvalidPath(format!(
                            "no Manifest scope covers {}",
                            owning_dir.display()
                        ))
                    })?;

                let mut stored_path = fpath
                    .strip_prefix(owning_dir)
                    .unwrap_or(&fpath)
                    .to_path_buf();
                if tag == Tag::Aux {
                    stored_path = stored_path
                        .strip_prefix("files")
                        .map_err(|_| {
                            Error::ManifestInvalidPath("AUX entries must live under files/".to_string())
                        })?
                        .to_path_buf();
                }

                let mut entry = Entry::new_of_tag(tag, stored_path, 0, Checksums::new());
                if tag != Tag::Manifest {
                    let abs = self.root_dir.join(&fpath);
                    let f = entry.file_entry_mut().expect("new_of_tag builds a file-kind entry");
                    verify::update_file_entry(&abs, f, hash_names, self.device_id, self.hasher.as_ref())?;
                } else {
                    let abs = self.root_dir.join(&fpath);
                    let f = entry.file_entry_mut().expect("MANIFEST entry has a FileEntry");
                    verify::update_file_entry(&abs, f, hash_names, self.device_id, self.hasher.as_ref())?;
                }

                self.loaded
                    .get_mut(&owning_mpath)
                    .expect("owning Manifest located above is loaded")
                    .entries
                    .push(entry);
                self.dirty.insert(owning_mpath);
            }
        }
        Ok(())
    }

    /// Writes every dirty Manifest (spec §4.6). With `force`, every
    /// reachable Manifest is treated as dirty. Parent `MANIFEST` entries
    /// are recomputed from their child's on-disk bytes before the child
    /// is itself (re)written, so writes proceed deepest-first.
    pub fn save_manifests(
        &mut self,
        hashes: Option<&[String]>,
        force: bool,
        sort: bool,
        compress_watermark: Option<u64>,
        compress_format: &str,
    ) -> Result<()> {
        let hash_names = self.resolve_hashes(hashes);
        if force {
            self.ensure_loaded_for_path(Path::new(""), true)?;
            let all: Vec<PathBuf> = self.loaded.keys().cloned().collect();
            self.dirty.extend(all);
        }

        let scope: Vec<(PathBuf, PathBuf)> = self
            .manifests_for_path(Path::new(""), true)
            .into_iter()
            .map(|(k, d, _)| (k.to_path_buf(), d.to_path_buf()))
            .collect();

        let mut renamed: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();
        let mut fixed: BTreeSet<PathBuf> = BTreeSet::new();

        for (mpath, relpath) in &scope {
            let sub_manifest_paths: Vec<(usize, PathBuf)> = {
                let manifest = self.loaded.get(mpath).expect("scoped Manifest is loaded");
                manifest
                    .entries
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.tag() == Tag::Manifest)
                    .map(|(idx, e)| (idx, e.raw_path().expect("MANIFEST has a path").to_path_buf()))
                    .collect()
            };

            for (idx, original_sub_path) in sub_manifest_paths {
                let sub_path = renamed.get(&original_sub_path).cloned().unwrap_or(original_sub_path.clone());
                let full = relpath.join(&sub_path);

                if !force && !self.dirty.contains(&full) {
                    continue;
                }

                let f = {
                    let manifest = self.loaded.get_mut(mpath).expect("scoped Manifest is loaded");
                    if sub_path != manifest.entries[idx].raw_path().unwrap() {
                        if let Some(fe) = manifest.entries[idx].file_entry_mut() {
                            fe.path = sub_path.clone();
                        }
                    }
                    manifest.entries[idx].file_entry_mut().expect("MANIFEST entry has a FileEntry")
                };

                let abs_sub_path = self.root_dir.join(relpath.join(&sub_path));
                verify::update_file_entry(&abs_sub_path, f, &hash_names, self.device_id, self.hasher.as_ref())?;

                fixed.insert(full);
                self.dirty.insert(mpath.clone());
            }

            if force || self.dirty.contains(mpath) {
                let unc_size = self.write_manifest(mpath, sort)?;
                if let Some(watermark) = compress_watermark {
                    self.rewatermark(mpath, unc_size, watermark, compress_format, &mut renamed)?;
                }
            }
        }

        for path in fixed {
            self.dirty.remove(&path);
        }
        for (old, new) in &renamed {
            self.dirty.remove(old);
            self.dirty.remove(new);
        }
        for candidate in compression::candidate_names(Path::new("Manifest")) {
            self.dirty.remove(&candidate);
        }

        if !self.dirty.is_empty() {
            return Err(Error::ResidualDirtyManifests(self.dirty.iter().cloned().collect()));
        }
        Ok(())
    }

    fn write_manifest(&mut self, mpath: &Path, sort: bool) -> Result<u64> {
        let is_top = compression::candidate_names(Path::new("Manifest")).contains(&mpath.to_path_buf());
        let manifest = self.loaded.get(mpath).expect("Manifest to save is loaded");
        let abs = self.root_dir.join(mpath);
        let mut writer = compression::open_write(&abs)?;
        self.codec.dump(&mut writer, &manifest.entries, is_top && self.top_signed, sort, None, None)?;
        let size = writer.uncompressed_bytes_written();
        writer.close()?;
        Ok(size)
    }

    fn rewatermark(
        &mut self,
        mpath: &Path,
        uncompressed_size: u64,
        watermark: u64,
        compress_format: &str,
        renamed: &mut BTreeMap<PathBuf, PathBuf>,
    ) -> Result<()> {
        let is_compressed = compression::compressed_suffix(mpath).is_some();
        let wants_compressed = uncompressed_size >= watermark;
        if is_compressed == wants_compressed {
            return Ok(());
        }

        let new_path = if wants_compressed {
            compression::with_compressed_suffix(mpath, compress_format)
        } else {
            compression::without_compressed_suffix(mpath)
        };

        let manifest = self.loaded.remove(mpath).expect("renaming a loaded Manifest");
        self.loaded.insert(new_path.clone(), manifest);
        self.write_manifest(&new_path, false)?;
        std::fs::remove_file(self.root_dir.join(mpath))?;
        renamed.insert(mpath.to_path_buf(), new_path);
        Ok(())
    }

    fn resolve_hashes(&self, hashes: Option<&[String]>) -> Vec<String> {
        hashes
            .map(<[String]>::to_vec)
            .or_else(|| self.options.hashes.clone())
            .unwrap_or_default()
    }
}

fn manifest_candidate_names() -> Vec<String> {
    compression::candidate_names(Path::new("Manifest"))
        .into_iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PlainTextCodec;
    use crate::hash::DigestHashProvider;
    use crate::loader::LoaderOptions;
    use crate::profile::DefaultProfile;
    use tempfile::tempdir;

    fn new_loader(root: &Path) -> ManifestLoader {
        ManifestLoader::new(
            root.join("Manifest"),
            LoaderOptions::default(),
            Box::new(PlainTextCodec),
            Box::new(DigestHashProvider),
        )
        .expect("load top manifest")
    }

    fn write(path: &Path, content: impl AsRef<[u8]>) {
        std::fs::write(path, content).expect("write");
    }

    #[test]
    fn update_entry_for_path_creates_new_entry() {
        let dir = tempdir().expect("tempdir");
        write(&dir.path().join("Manifest"), "");
        write(&dir.path().join("a"), b"abc");

        let mut loader = new_loader(dir.path());
        loader
            .update_entry_for_path(Path::new("a"), Tag::Data, Some(&["SHA256".to_string()]))
            .expect("update");

        let m = loader.loaded.get(Path::new("Manifest")).unwrap();
        assert_eq!(m.entries.len(), 1);
        let f = m.entries[0].file_entry().unwrap();
        assert_eq!(f.size, 3);
        assert!(f.checksums.contains_key("SHA256"));
        assert!(loader.dirty_paths().contains(&PathBuf::from("Manifest")));
    }

    #[test]
    fn update_entry_for_path_updates_existing_entry_in_place() {
        let dir = tempdir().expect("tempdir");
        write(&dir.path().join("Manifest"), "DATA a 3 SHA256 deadbeef\n");
        write(&dir.path().join("a"), b"abcdef");

        let mut loader = new_loader(dir.path());
        loader
            .update_entry_for_path(Path::new("a"), Tag::Data, Some(&["SHA256".to_string()]))
            .expect("update");

        let m = loader.loaded.get(Path::new("Manifest")).unwrap();
        assert_eq!(m.entries.len(), 1);
        assert_eq!(m.entries[0].file_entry().unwrap().size, 6);
    }

    #[test]
    fn update_entry_for_path_dedups_repeated_entries_for_same_path() {
        let dir = tempdir().expect("tempdir");
        write(
            &dir.path().join("Manifest"),
            "DATA a 1 SHA256 aaaa\nDATA a 1 SHA256 bbbb\n",
        );
        write(&dir.path().join("a"), b"abc");

        let mut loader = new_loader(dir.path());
        loader
            .update_entry_for_path(Path::new("a"), Tag::Data, Some(&["SHA256".to_string()]))
            .expect("update");

        let m = loader.loaded.get(Path::new("Manifest")).unwrap();
        assert_eq!(m.entries.len(), 1);
    }

    #[test]
    fn update_entry_for_path_removes_entry_for_deleted_file() {
        let dir = tempdir().expect("tempdir");
        write(&dir.path().join("Manifest"), "DATA gone 3 SHA256 aaaa\n");

        let mut loader = new_loader(dir.path());
        loader
            .update_entry_for_path(Path::new("gone"), Tag::Data, Some(&["SHA256".to_string()]))
            .expect("update");

        let m = loader.loaded.get(Path::new("Manifest")).unwrap();
        assert!(m.entries.is_empty());
        assert!(loader.dirty_paths().contains(&PathBuf::from("Manifest")));
    }

    #[test]
    fn update_entry_for_path_preserves_optional_entries_untouched() {
        let dir = tempdir().expect("tempdir");
        write(&dir.path().join("Manifest"), "OPTIONAL missing 0\n");

        let mut loader = new_loader(dir.path());
        loader
            .update_entry_for_path(Path::new("missing"), Tag::Data, Some(&["SHA256".to_string()]))
            .expect("update");

        let m = loader.loaded.get(Path::new("Manifest")).unwrap();
        assert_eq!(m.entries.len(), 1);
        assert_eq!(m.entries[0].tag(), Tag::Optional);
    }

    #[test]
    fn dedup_entries_unions_hashes_and_marks_loser_dirty() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        write(
            &dir.path().join("Manifest"),
            "MANIFEST sub/Manifest 0\nDATA sub/x 1 SHA256 aaaa\n",
        );
        write(&dir.path().join("sub/Manifest"), "DATA x 1 BLAKE2B bbbb\n");

        let mut loader = new_loader(dir.path());
        let survivors = loader.dedup_entries(Path::new("")).expect("dedup");
        let (owner, entry) = survivors.get(Path::new("sub/x")).expect("present");
        // the deepest Manifest (sub/Manifest) is encountered first and wins
        assert_eq!(owner, Path::new("sub/Manifest"));
        let f = entry.file_entry().unwrap();
        assert_eq!(f.checksums.len(), 2);
        // the root Manifest's now-redundant duplicate was removed and dirtied
        assert!(loader.dirty_paths().contains(&PathBuf::from("Manifest")));
        assert_eq!(loader.loaded.get(Path::new("Manifest")).unwrap().entries.len(), 1);
    }

    #[test]
    fn dedup_entries_keys_aux_at_its_implicit_files_prefix() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("files")).unwrap();
        write(&dir.path().join("files/patch.diff"), b"aux-data");
        // Duplicate AUX entries for the same on-disk file, disjoint hashes.
        write(
            &dir.path().join("Manifest"),
            "AUX patch.diff 8 SHA256 aaaa\nAUX patch.diff 8 BLAKE2B bbbb\n",
        );

        let mut loader = new_loader(dir.path());
        let survivors = loader.dedup_entries(Path::new("")).expect("dedup");
        // The surviving entry must be keyed at the composed on-disk path
        // (files/patch.diff), not the stored, prefix-stripped path
        // (patch.diff) -- otherwise update_directory_entries's walk, which
        // pops by on-disk path, would never find it.
        let (_, entry) = survivors
            .get(Path::new("files/patch.diff"))
            .expect("AUX entry is keyed at its composed files/ path");
        let f = entry.file_entry().unwrap();
        assert_eq!(f.checksums.len(), 2);
        assert_eq!(loader.loaded.get(Path::new("Manifest")).unwrap().entries.len(), 1);
    }

    #[test]
    fn update_directory_entries_leaves_aux_entry_alone_when_file_unchanged() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("files")).unwrap();
        write(&dir.path().join("files/patch.diff"), b"aux-data");
        write(&dir.path().join("Manifest"), "AUX patch.diff 8 SHA256 aaaa\n");

        let mut loader = new_loader(dir.path());
        let profile = DefaultProfile;
        loader
            .update_directory_entries(Path::new(""), Some(&["SHA256".to_string()]), &profile)
            .expect("update");

        // A pre-fix dedup keyed this AUX entry at "patch.diff", so the walk
        // (which pops by "files/patch.diff") never matched it: it spawned a
        // spurious DATA entry and retired the real AUX entry as "removed".
        let m = loader.loaded.get(Path::new("Manifest")).unwrap();
        assert_eq!(m.entries.len(), 1);
        assert_eq!(m.entries[0].tag(), Tag::Aux);
        assert_eq!(m.entries[0].raw_path(), Some(Path::new("patch.diff")));
    }

    #[test]
    fn update_directory_entries_adds_and_removes_and_respects_ignore() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("build")).unwrap();
        write(
            &dir.path().join("Manifest"),
            "IGNORE build\nDATA stale 3 SHA256 aaaa\n",
        );
        write(&dir.path().join("fresh"), b"fresh-data");
        write(&dir.path().join("build/garbage"), b"garbage");

        let mut loader = new_loader(dir.path());
        let profile = DefaultProfile;
        loader
            .update_directory_entries(Path::new(""), Some(&["SHA256".to_string()]), &profile)
            .expect("update");

        let m = loader.loaded.get(Path::new("Manifest")).unwrap();
        assert!(!m.entries.iter().any(|e| e.raw_path() == Some(Path::new("stale"))));
        assert!(m
            .entries
            .iter()
            .any(|e| e.tag() == Tag::Data && e.raw_path() == Some(Path::new("fresh"))));
        assert!(m.entries.iter().any(|e| e.tag() == Tag::Ignore));
        // the IGNORE-shadowed subtree never yielded its own DATA entry
        assert!(!m.entries.iter().any(|e| e.raw_path() == Some(Path::new("build/garbage"))));
    }

    struct SubManifestProfile;
    impl Profile for SubManifestProfile {
        fn entry_type_for_path(&self, _path: &Path) -> Tag {
            Tag::Data
        }
        fn wants_manifest_in_directory(
            &self,
            dir: &Path,
            _dirnames: &[String],
            _filenames: &[String],
        ) -> bool {
            dir.file_name().map(|n| n == "sub").unwrap_or(false)
        }
    }

    #[test]
    fn update_directory_entries_creates_profile_requested_submanifest() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        write(&dir.path().join("Manifest"), "");
        write(&dir.path().join("sub/child"), b"child-data");

        let mut loader = new_loader(dir.path());
        let profile = SubManifestProfile;
        loader
            .update_directory_entries(Path::new(""), Some(&["SHA256".to_string()]), &profile)
            .expect("update");

        let root = loader.loaded.get(Path::new("Manifest")).unwrap();
        assert!(root.entries.iter().any(|e| e.tag() == Tag::Manifest));
        assert!(loader.loaded.contains_key(Path::new("sub/Manifest")));
        let sub = loader.loaded.get(Path::new("sub/Manifest")).unwrap();
        assert!(sub
            .entries
            .iter()
            .any(|e| e.tag() == Tag::Data && e.raw_path() == Some(Path::new("child"))));
        assert!(loader.dirty_paths().contains(&PathBuf::from("sub/Manifest")));
    }

    #[test]
    fn save_manifests_round_trip_clears_dirty_set() {
        let dir = tempdir().expect("tempdir");
        write(&dir.path().join("Manifest"), "DATA a 3 SHA256 aaaa\n");
        write(&dir.path().join("a"), b"abc");

        let mut loader = new_loader(dir.path());
        loader
            .save_manifests(Some(&["SHA256".to_string()]), true, false, None, "gz")
            .expect("save");
        assert!(loader.dirty_paths().is_empty());
    }

    #[test]
    fn save_manifests_applies_compression_watermark() {
        let dir = tempdir().expect("tempdir");
        // The watermark compares against the *Manifest's own* serialized
        // byte count, not the size of the files it describes — this line
        // alone is already well past a watermark of 10.
        write(&dir.path().join("Manifest"), "DATA a 3 SHA256 aaaa\n");

        let mut loader = new_loader(dir.path());
        loader
            .save_manifests(Some(&["SHA256".to_string()]), true, false, Some(10), "gz")
            .expect("save");

        assert!(dir.path().join("Manifest.gz").exists());
        assert!(!dir.path().join("Manifest").exists());
        assert!(loader.loaded.contains_key(Path::new("Manifest.gz")));
        assert!(loader.dirty_paths().is_empty());
    }
}
