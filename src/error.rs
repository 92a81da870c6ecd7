// Copyright (c) 2026-present, treeseal contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::entry::Entry;
use std::path::PathBuf;

/// A single difference entry as produced by [`crate::verify::verify_path`]:
/// `(field name, expected, got)`. Field name is one of `__exists__`,
/// `__type__`, `__size__`, or a checksum name.
pub type VerifyDiff = Vec<(String, DiffValue, DiffValue)>;

/// A single difference entry as produced by
/// [`crate::verify::verify_entry_compatibility`]: `(field name, e1's value,
/// e2's value)`. `None` means the field was absent on that side.
pub type CompatDiff = Vec<(String, Option<String>, Option<String>)>;

/// One side of a [`VerifyDiff`] triple.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffValue {
    Bool(bool),
    Size(u64),
    Text(String),
}

impl std::fmt::Display for DiffValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffValue::Bool(b) => write!(f, "{b}"),
            DiffValue::Size(s) => write!(f, "{s}"),
            DiffValue::Text(t) => write!(f, "{t}"),
        }
    }
}

/// Represents errors that can occur while loading, verifying, or updating a
/// Manifest tree. Every variant here is one of the contractual error
/// identities from spec §6.
#[derive(Debug)]
pub enum Error {
    /// I/O error.
    Io(std::io::Error),

    /// A path's extension does not match any known compression codec.
    UnsupportedCompression(String),

    /// The file at `path` did not verify against `entry`; `diff` details
    /// which fields disagreed.
    ManifestMismatch {
        path: PathBuf,
        entry: Option<Entry>,
        diff: VerifyDiff,
    },

    /// A file covered by the tree was found on a different device than the
    /// top-level Manifest (spec invariant 5). Always a hard error.
    ManifestCrossDevice(PathBuf),

    /// Two entries describing the same path were semantically
    /// incompatible (spec §4.3/§4.4).
    ManifestIncompatibleEntry {
        e1: Box<Entry>,
        e2: Box<Entry>,
        diff: CompatDiff,
    },

    /// A path given to an update operation violates a structural
    /// requirement (e.g. an `AUX` entry outside `files/`).
    ManifestInvalidPath(String),

    /// The Manifest-parsing collaborator rejected the file's syntax.
    ManifestSyntaxError(String),

    /// `save_manifests` finished with a non-empty dirty set — a
    /// programming error (spec §4.6, invariant 4).
    ResidualDirtyManifests(Vec<PathBuf>),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::UnsupportedCompression(ext) => {
                write!(f, "unsupported compression suffix: {ext}")
            }
            Error::ManifestMismatch { path, diff, .. } => {
                write!(f, "Manifest mismatch for {}: {diff:?}", path.display())
            }
            Error::ManifestCrossDevice(path) => {
                write!(f, "{} crosses the Manifest's filesystem boundary", path.display())
            }
            Error::ManifestIncompatibleEntry { e1, e2, diff } => write!(
                f,
                "incompatible Manifest entries {e1:?} vs {e2:?}: {diff:?}"
            ),
            Error::ManifestInvalidPath(detail) => write!(f, "invalid Manifest path: {detail}"),
            Error::ManifestSyntaxError(detail) => write!(f, "Manifest syntax error: {detail}"),
            Error::ResidualDirtyManifests(paths) => {
                write!(f, "unlinked but updated Manifests: {paths:?}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
