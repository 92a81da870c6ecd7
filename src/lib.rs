// Copyright (c) 2026-present, treeseal contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A recursive tree-Manifest integrity engine.
//!
//! ##### About
//!
//! A source tree can carry a forest of `Manifest` files, one per directory
//! (or per subset of directories), each listing the files below it together
//! with their size and one or more checksums. Manifests can reference other
//! Manifests (`MANIFEST` entries), so the whole tree is only as trustworthy
//! as its shallowest signed Manifest plus the chain of checksums binding
//! every deeper Manifest to it.
//!
//! This crate loads that forest lazily, verifies a directory (or the whole
//! tree) against it, and updates/writes it back out after a tree has
//! changed on disk. It does not perform OpenPGP signature verification or
//! network fetches; those are left to the embedder (see [`format::OpenPgpEnv`]).
//!
//! # Example usage
//!
//! ```no_run
//! use treeseal::{DefaultProfile, DigestHashProvider, LoaderOptions, ManifestLoader, PlainTextCodec};
//! use std::path::Path;
//!
//! let mut loader = ManifestLoader::new(
//!     Path::new("/srv/repo/Manifest"),
//!     LoaderOptions::default(),
//!     Box::new(PlainTextCodec),
//!     Box::new(DigestHashProvider),
//! )?;
//!
//! let mut fail = |path: &Path, _entry: Option<&treeseal::Entry>, _diff: &treeseal::VerifyDiff|
//!     -> treeseal::Result<bool> {
//!     eprintln!("mismatch: {}", path.display());
//!     Ok(false)
//! };
//! let ok = treeseal::assert_directory_verifies(&mut loader, Path::new(""), &mut fail, None)?;
//! assert!(ok || !ok); // depends on the tree under test
//!
//! loader.update_directory_entries(Path::new(""), None, &DefaultProfile)?;
//! loader.save_manifests(None, false, true, None, "gz")?;
//! # Ok::<(), treeseal::Error>(())
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod compression;
mod entry;
mod error;
mod format;
mod hash;
mod loader;
mod probe;
mod profile;
mod tree_verify;
mod updater;
mod verify;
mod walk;

pub use {
    entry::{Checksums, Entry, FileEntry, Manifest, Tag},
    error::{CompatDiff, DiffValue, Error, Result, VerifyDiff},
    format::{ManifestCodec, OpenPgpEnv, PlainTextCodec},
    hash::{DigestHashProvider, HashProvider},
    loader::{LoaderOptions, ManifestLoader},
    profile::{DefaultProfile, Profile},
    tree_verify::{assert_directory_verifies, Handler},
    verify::{update_file_entry, verify_entry_compatibility, verify_path},
};
