// Copyright (c) 2026-present, treeseal contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The Tree Verifier (spec §4.5): a whole-subtree walk that matches
//! filesystem state against a composed entry set, detects stray files,
//! and delegates per-file verification to caller-supplied handlers.

use crate::compression;
use crate::entry::Entry;
use crate::error::{Error, Result, VerifyDiff};
use crate::loader::ManifestLoader;
use crate::verify;
use crate::walk::{join_rel, walk_tree};
use std::collections::BTreeMap;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Called for a verification mismatch. Receives the composed path, the
/// entry that was expected (`None` for a stray file), and the diff
/// `verify_path` produced.
///
/// Mirrors gemato's handler contract: returning `Err` aborts the whole
/// walk (the Python "raise" case); returning `Ok(false)` contributes a
/// failure to the walk's accumulated `bool` result; returning `Ok(true)`
/// is success (this also stands in for gemato's "handler returned `None`",
/// which Python treats as success-enough — Rust has no equivalent of a
/// bare `return` defaulting to `None`, so callers just return `Ok(true)`).
pub type Handler<'a> = dyn FnMut(&Path, Option<&Entry>, &VerifyDiff) -> Result<bool> + 'a;

/// Walks `root_dir/path`, matching every file and directory against the
/// composed entry set for `path` (spec §4.5). `DATA`/`EBUILD`/`AUX`/
/// `MANIFEST` mismatches and stray files are routed to `fail_handler`;
/// `MISC`/`OPTIONAL` mismatches go to `warn_handler` (defaulting to
/// `fail_handler` when `None`). Cross-device files are never routed to a
/// handler — they always abort with `Error::ManifestCrossDevice`.
///
/// Returns the AND-accumulation of every handler's `bool` result,
/// assuming no handler raised.
pub fn assert_directory_verifies(
    loader: &mut ManifestLoader,
    path: &Path,
    fail_handler: &mut Handler<'_>,
    mut warn_handler: Option<&mut Handler<'_>>,
) -> Result<bool> {
    let mut entry_map: BTreeMap<PathBuf, Entry> = loader.composed_entry_set(path, None)?;
    let root_dir = loader.root_dir().to_path_buf();
    let device_id = loader.device_id();
    let hasher = loader.hasher_ref();
    let manifest_names = manifest_filenames();

    let mut ok = true;

    walk_tree(&root_dir, path, &mut |rel, dirnames, filenames| {
        let mut skip = Vec::new();
        for d in dirnames.iter() {
            let dpath = join_rel(rel, d);
            match entry_map.remove(&dpath) {
                None => {
                    let abs = root_dir.join(&dpath);
                    let meta = std::fs::metadata(&abs)?;
                    if let Some(expected) = device_id {
                        if meta.dev() != expected {
                            return Err(Error::ManifestCrossDevice(abs));
                        }
                    }
                }
                Some(entry) => {
                    if matches!(entry, Entry::Ignore { .. }) {
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
            if rel.as_os_str().is_empty() && manifest_names.contains(f) {
                // The tree-root Manifest files have no self-entry.
                continue;
            }
            let fpath = join_rel(rel, f);
            let entry = entry_map.remove(&fpath);
            dispatch(
                &root_dir,
                &fpath,
                entry.as_ref(),
                device_id,
                hasher,
                fail_handler,
                &mut warn_handler,
                &mut ok,
            )?;
        }
        Ok(())
    })?;

    // Anything left in the map never showed up during the walk: missing.
    for (fpath, entry) in std::mem::take(&mut entry_map) {
        dispatch(
            &root_dir,
            &fpath,
            Some(&entry),
            device_id,
            hasher,
            fail_handler,
            &mut warn_handler,
            &mut ok,
        )?;
    }

    Ok(ok)
}

#[allow(clippy::too_many_arguments)]
fn dispatch(
    root_dir: &Path,
    fpath: &Path,
    entry: Option<&Entry>,
    device_id: Option<u64>,
    hasher: &dyn crate::hash::HashProvider,
    fail_handler: &mut Handler<'_>,
    warn_handler: &mut Option<&mut Handler<'_>>,
    ok: &mut bool,
) -> Result<()> {
    let abs = root_dir.join(fpath);
    let (verified, diff) = verify::verify_path(&abs, entry, device_id, hasher)?;
    if verified {
        return Ok(());
    }

    let soft = entry.map(|e| e.tag().is_soft()).unwrap_or(false);
    let handled = if soft {
        match warn_handler {
            Some(h) => h(fpath, entry, &diff)?,
            None => fail_handler(fpath, entry, &diff)?,
        }
    } else {
        fail_handler(fpath, entry, &diff)?
    };
    *ok = *ok && handled;
    Ok(())
}

fn manifest_filenames() -> Vec<String> {
    compression::candidate_names(Path::new("Manifest"))
        .into_iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}
