// Copyright (c) 2026-present, treeseal contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The Entry Verifier (spec §4.3): compare a path against an entry, and
//! compare two entries for semantic compatibility.

use crate::entry::{CompatDiff, Entry, FileEntry, SIZE_KEY};
use crate::error::{DiffValue, Error, Result, VerifyDiff};
use crate::hash::HashProvider;
use crate::probe::{probe_all, MetadataProbe, ProbeStep};
use std::collections::BTreeSet;
use std::path::Path;

/// Verifies the file at `path` against `entry`. `entry` being `None` means
/// "no Manifest entry covers this path" — a stray file, per spec §4.5.
///
/// If `expected_dev` is given and the file's device differs, returns
/// `Err(Error::ManifestCrossDevice)` immediately — this is never folded
/// into the returned diff (spec §4.3 step 3).
///
/// Short-circuits on the first disagreeing stage: existence, device, type,
/// size, then finally checksums — the probe is only driven as far as
/// needed.
pub fn verify_path(
    path: &Path,
    entry: Option<&Entry>,
    expected_dev: Option<u64>,
    hasher: &dyn HashProvider,
) -> Result<(bool, VerifyDiff)> {
    if matches!(entry, Some(Entry::Ignore { .. })) {
        return Ok((true, Vec::new()));
    }

    let hash_names: Vec<String> = entry
        .and_then(Entry::file_entry)
        .map(|f| f.checksums.keys().cloned().collect())
        .unwrap_or_default();

    let mut probe = MetadataProbe::new(path, &hash_names, hasher);

    let exists = match next_step(&mut probe)? {
        ProbeStep::Exists(e) => e,
        _ => unreachable!("probe yields Exists first"),
    };

    let expect_exist = matches!(entry, Some(e) if !matches!(e, Entry::Optional(_)));
    if exists != expect_exist {
        return Ok((
            false,
            vec![(
                "__exists__".to_string(),
                DiffValue::Bool(expect_exist),
                DiffValue::Bool(exists),
            )],
        ));
    }
    if !exists {
        return Ok((true, Vec::new()));
    }

    let dev = match next_step(&mut probe)? {
        ProbeStep::Device(d) => d,
        _ => unreachable!("probe yields Device second"),
    };
    if let Some(expected) = expected_dev {
        if dev != expected {
            return Err(Error::ManifestCrossDevice(path.to_path_buf()));
        }
    }

    let type_name = match next_step(&mut probe)? {
        ProbeStep::FileType { type_name, .. } => type_name,
        _ => unreachable!("probe yields FileType third"),
    };
    if type_name != "regular file" {
        return Ok((
            false,
            vec![(
                "__type__".to_string(),
                DiffValue::Text("regular file".to_string()),
                DiffValue::Text(type_name.to_string()),
            )],
        ));
    }

    let Some(file_entry) = entry.and_then(Entry::file_entry) else {
        // A regular file exists and none was expected more specifically
        // than "exists" (shouldn't normally happen once entry is Some, but
        // tolerate it rather than panicking on a non-file-kind entry).
        return Ok((true, Vec::new()));
    };

    let on_disk_size = match next_step(&mut probe)? {
        ProbeStep::Size(s) => s,
        _ => unreachable!("probe yields Size fourth"),
    };

    // Concession to filesystems reporting 0 for some special files.
    if on_disk_size != 0 && on_disk_size != file_entry.size {
        return Ok((
            false,
            vec![(
                "__size__".to_string(),
                DiffValue::Size(file_entry.size),
                DiffValue::Size(on_disk_size),
            )],
        ));
    }

    let checksums = match next_step(&mut probe)? {
        ProbeStep::Checksums(c) => c,
        _ => unreachable!("probe yields Checksums fifth"),
    };

    let mut diff = VerifyDiff::new();
    if let Some(got) = checksums.get(SIZE_KEY) {
        if let Ok(got_size) = got.parse::<u64>() {
            if got_size != file_entry.size {
                diff.push((
                    "__size__".to_string(),
                    DiffValue::Size(file_entry.size),
                    DiffValue::Size(got_size),
                ));
            }
        }
    }
    for (name, expected_digest) in &file_entry.checksums {
        if let Some(got) = checksums.get(name) {
            if got != expected_digest {
                diff.push((
                    name.clone(),
                    DiffValue::Text(expected_digest.clone()),
                    DiffValue::Text(got.clone()),
                ));
            }
        }
    }

    Ok((diff.is_empty(), diff))
}

/// Recomputes `file_entry`'s size and checksums from the file at `path`,
/// restricted to `hash_names` (the entry's own hash set is replaced, not
/// merged — callers that want a union should do so before calling this).
///
/// Returns `Ok(true)` if the file exists and was updated in place, or
/// `Ok(false)` if it no longer exists (the caller is expected to drop the
/// entry rather than keep a stale one). A device mismatch against
/// `expected_dev` is always a hard error, never folded into the `bool`.
pub fn update_file_entry(
    path: &Path,
    file_entry: &mut FileEntry,
    hash_names: &[String],
    expected_dev: Option<u64>,
    hasher: &dyn HashProvider,
) -> Result<bool> {
    let probed = probe_all(path, hash_names, hasher)?;
    if !probed.exists {
        return Ok(false);
    }
    if let Some(expected) = expected_dev {
        if probed.device != Some(expected) {
            return Err(Error::ManifestCrossDevice(path.to_path_buf()));
        }
    }

    file_entry.size = probed.size.unwrap_or(0);
    if let Some(mut checksums) = probed.checksums {
        checksums.remove(SIZE_KEY);
        file_entry.checksums = checksums;
    }
    Ok(true)
}

fn next_step(probe: &mut MetadataProbe<'_>) -> Result<ProbeStep> {
    match probe.next() {
        Some(Ok(step)) => Ok(step),
        Some(Err(e)) => Err(e.into()),
        None => unreachable!("probe stages are driven in lockstep with its contract"),
    }
}

/// Compares two entries describing the same path for semantic
/// compatibility (spec §4.3). Used by the loader's composed-entry-set
/// merge and the updater's dedup pass.
///
/// `verify_entry_compatibility(e, e)` is always `(true, [])` — comparing
/// an entry to itself can never disagree on tag, size, or any hash value.
#[must_use]
pub fn verify_entry_compatibility(e1: &Entry, e2: &Entry) -> (bool, CompatDiff) {
    let (t1, t2) = (e1.tag(), e2.tag());
    if t1 != t2 {
        let same_domain = t1.compatibility_class().is_some() && t2.compatibility_class().is_some();
        if !same_domain {
            return (
                false,
                vec![("__type__".to_string(), Some(format!("{t1:?}")), Some(format!("{t2:?}")))],
            );
        }
    }

    let (Some(f1), Some(f2)) = (e1.file_entry(), e2.file_entry()) else {
        // Neither IGNORE nor TIMESTAMP participate in dedup/merge; treat
        // equal tags as trivially compatible, anything else as not.
        return (t1 == t2, Vec::new());
    };

    if f1.size != f2.size {
        return (
            false,
            vec![(
                "__size__".to_string(),
                Some(f1.size.to_string()),
                Some(f2.size.to_string()),
            )],
        );
    }

    let keys: BTreeSet<&String> = f1.checksums.keys().chain(f2.checksums.keys()).collect();
    let mut diff = CompatDiff::new();
    let mut compatible = true;
    for h in keys {
        let h1 = f1.checksums.get(h);
        let h2 = f2.checksums.get(h);
        if h1 != h2 {
            diff.push((h.clone(), h1.cloned(), h2.cloned()));
            if h1.is_some() && h2.is_some() {
                compatible = false;
            }
        }
    }

    (compatible, diff)
}
