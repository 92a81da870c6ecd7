// Copyright (c) 2026-present, treeseal contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The Manifest entry data model (spec §3).
//!
//! Line-level tokenization of these entries into/from Manifest text is a
//! collaborator's concern (see [`crate::format`]); this module only owns the
//! in-memory shape and the small amount of behavior (tag classification,
//! softness) that the core components need to stay tag-agnostic.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Hash-name (Manifest-domain, uppercase) to lowercase hex digest.
pub type Checksums = BTreeMap<String, String>;

/// Synthetic hash name used internally to carry file size alongside real
/// digests in checksum maps passed to/from the hash collaborator.
pub const SIZE_KEY: &str = "__size__";

/// The closed tag set from spec §3.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Tag {
    Data,
    Ebuild,
    Aux,
    Misc,
    Optional,
    Manifest,
    Dist,
    Ignore,
    Timestamp,
}

impl Tag {
    /// `MISC`/`OPTIONAL` are "soft": verification failure is a warning, not
    /// a hard failure (spec §3, §4.5).
    #[must_use]
    pub fn is_soft(self) -> bool {
        matches!(self, Tag::Misc | Tag::Optional)
    }

    /// Whether this tag describes a local regular file (as opposed to
    /// `DIST`, `IGNORE`, `TIMESTAMP`, which do not).
    #[must_use]
    pub fn is_file_kind(self) -> bool {
        matches!(
            self,
            Tag::Data | Tag::Ebuild | Tag::Aux | Tag::Misc | Tag::Optional | Tag::Manifest
        )
    }

    /// The semantic domain used by [`crate::verify::verify_entry_compatibility`]:
    /// these four tags describe the same shape (regular file, size + hash)
    /// and may be considered compatible across a tag mismatch (spec §4.3).
    #[must_use]
    pub fn compatibility_class(self) -> Option<CompatClass> {
        match self {
            Tag::Manifest | Tag::Data | Tag::Ebuild | Tag::Aux => Some(CompatClass::Regular),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CompatClass {
    Regular,
}

/// A regular-file-shaped entry: path relative to its owning Manifest's
/// directory, size in bytes, and a checksum map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
    pub checksums: Checksums,
}

impl FileEntry {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, size: u64, checksums: Checksums) -> Self {
        Self {
            path: path.into(),
            size,
            checksums,
        }
    }
}

/// A single Manifest entry, polymorphic over the closed tag set (spec §3).
#[derive(Clone, Debug, PartialEq)]
pub enum Entry {
    Data(FileEntry),
    Ebuild(FileEntry),
    /// `files/`-prefix handling lives in the loader/updater; this struct
    /// only stores the already-stripped path, as gemato does.
    Aux(FileEntry),
    Misc(FileEntry),
    Optional(FileEntry),
    Manifest(FileEntry),
    /// Catalog-only: `path` is a plain filename, never a local-tree path.
    Dist(FileEntry),
    /// Matches a directory prefix recursively; `path` is that prefix.
    Ignore { path: PathBuf },
    /// Singleton-per-tree wall-clock attestation; not a file. Stored as the
    /// raw text the codec produced/will produce, since parsing it further
    /// is not needed by any core invariant.
    Timestamp { value: String },
}

impl Entry {
    #[must_use]
    pub fn tag(&self) -> Tag {
        match self {
            Entry::Data(_) => Tag::Data,
            Entry::Ebuild(_) => Tag::Ebuild,
            Entry::Aux(_) => Tag::Aux,
            Entry::Misc(_) => Tag::Misc,
            Entry::Optional(_) => Tag::Optional,
            Entry::Manifest(_) => Tag::Manifest,
            Entry::Dist(_) => Tag::Dist,
            Entry::Ignore { .. } => Tag::Ignore,
            Entry::Timestamp { .. } => Tag::Timestamp,
        }
    }

    /// The entry's own path field, as stored (relative to its owning
    /// Manifest's directory; `AUX`'s implicit `files/` prefix is not
    /// applied here — see [`crate::loader`]). `None` for `TIMESTAMP`.
    #[must_use]
    pub fn raw_path(&self) -> Option<&Path> {
        match self {
            Entry::Data(f) | Entry::Ebuild(f) | Entry::Aux(f) | Entry::Misc(f)
            | Entry::Optional(f) | Entry::Manifest(f) | Entry::Dist(f) => Some(&f.path),
            Entry::Ignore { path } => Some(path),
            Entry::Timestamp { .. } => None,
        }
    }

    #[must_use]
    pub fn file_entry(&self) -> Option<&FileEntry> {
        match self {
            Entry::Data(f) | Entry::Ebuild(f) | Entry::Aux(f) | Entry::Misc(f)
            | Entry::Optional(f) | Entry::Manifest(f) | Entry::Dist(f) => Some(f),
            Entry::Ignore { .. } | Entry::Timestamp { .. } => None,
        }
    }

    #[must_use]
    pub fn file_entry_mut(&mut self) -> Option<&mut FileEntry> {
        match self {
            Entry::Data(f) | Entry::Ebuild(f) | Entry::Aux(f) | Entry::Misc(f)
            | Entry::Optional(f) | Entry::Manifest(f) | Entry::Dist(f) => Some(f),
            Entry::Ignore { .. } | Entry::Timestamp { .. } => None,
        }
    }

    /// Constructs a new entry of `tag` with the given path/size/checksums.
    /// `tag` must be one of the "updatable" file kinds; `DIST`, `IGNORE`,
    /// `TIMESTAMP` are not constructible through this path (spec §4.6).
    ///
    /// # Panics
    ///
    /// Panics if `tag` is `Dist`, `Ignore`, or `Timestamp` — callers must
    /// route those through their own constructors.
    #[must_use]
    pub fn new_of_tag(tag: Tag, path: impl Into<PathBuf>, size: u64, checksums: Checksums) -> Self {
        let f = FileEntry::new(path, size, checksums);
        match tag {
            Tag::Data => Entry::Data(f),
            Tag::Ebuild => Entry::Ebuild(f),
            Tag::Aux => Entry::Aux(f),
            Tag::Misc => Entry::Misc(f),
            Tag::Optional => Entry::Optional(f),
            Tag::Manifest => Entry::Manifest(f),
            Tag::Dist | Tag::Ignore | Tag::Timestamp => {
                panic!("new_of_tag does not support {tag:?}")
            }
        }
    }
}

/// An ordered sequence of entries plus a signed-or-not flag (spec §3).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Manifest {
    pub entries: Vec<Entry>,
    pub signed: bool,
}

impl Manifest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
