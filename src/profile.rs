// Copyright (c) 2026-present, treeseal contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Profile policies (spec §1): decide the tag of a newly discovered file
//! and whether a directory warrants its own sub-Manifest. Out of core
//! scope; this module is the default collaborator, consulted only by
//! [`crate::updater::update_directory_entries`].

use crate::entry::Tag;
use std::path::Path;

/// Policy consulted by `update_directory_entries` (spec §4.6 step 3-4).
pub trait Profile: Send + Sync {
    /// The tag a freshly discovered regular file at `path` should receive.
    fn entry_type_for_path(&self, path: &Path) -> Tag;

    /// Whether `dir` (given its immediate child directory and file names)
    /// should have its own Manifest, if it doesn't already.
    fn wants_manifest_in_directory(&self, dir: &Path, dirnames: &[String], filenames: &[String])
        -> bool;
}

/// Everything is `DATA`; no directory ever warrants a new sub-Manifest.
/// Matches gemato's `DefaultProfile`.
#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultProfile;

impl Profile for DefaultProfile {
    fn entry_type_for_path(&self, _path: &Path) -> Tag {
        Tag::Data
    }

    fn wants_manifest_in_directory(
        &self,
        _dir: &Path,
        _dirnames: &[String],
        _filenames: &[String],
    ) -> bool {
        false
    }
}
