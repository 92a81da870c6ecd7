// Copyright (c) 2026-present, treeseal contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A small pre-order directory walker shared by the Tree Verifier and the
//! Updater, both of which need `os.walk`-style traversal (children of a
//! directory are visited together, with the visitor free to prune
//! subtrees before recursion) rather than a flat recursive `read_dir`.

use crate::error::Result;
use std::path::{Path, PathBuf};

/// Visits `start_rel` (relative to `root_dir`) and every descendant
/// directory in pre-order, depth-first. `visit` receives the directory's
/// relative path, its subdirectory names (sorted, mutable so the caller
/// can prune — removed names are not recursed into), and its file names
/// (sorted). Symlinked directories are followed, matching the spec's
/// posix-walk semantics; I/O errors abort the walk immediately.
pub(crate) fn walk_tree<F>(root_dir: &Path, start_rel: &Path, visit: &mut F) -> Result<()>
where
    F: FnMut(&Path, &mut Vec<String>, &[String]) -> Result<()>,
{
    let abs = root_dir.join(start_rel);
    let mut dirnames = Vec::new();
    let mut filenames = Vec::new();

    for entry in std::fs::read_dir(&abs)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        // metadata() (not DirEntry::file_type()) follows symlinks, matching
        // the spec's "symlinks followed during walks".
        let meta = std::fs::metadata(entry.path())?;
        if meta.is_dir() {
            dirnames.push(name);
        } else {
            filenames.push(name);
        }
    }
    dirnames.sort();
    filenames.sort();

    visit(start_rel, &mut dirnames, &filenames)?;

    for d in &dirnames {
        let child_rel = join_rel(start_rel, d);
        walk_tree(root_dir, &child_rel, visit)?;
    }
    Ok(())
}

/// Joins a possibly-empty relative path with a single component, the way
/// `os.path.join('', d) == d` does.
pub(crate) fn join_rel(base: &Path, name: &str) -> PathBuf {
    if base.as_os_str().is_empty() {
        PathBuf::from(name)
    } else {
        base.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn walks_nested_directories_in_preorder() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("top.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("a/mid.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("a/b/leaf.txt"), b"x").unwrap();

        let mut seen: Vec<PathBuf> = Vec::new();
        walk_tree(dir.path(), Path::new(""), &mut |rel, _dirs, _files| {
            seen.push(rel.to_path_buf());
            Ok(())
        })
        .expect("walk");

        assert_eq!(seen, vec![PathBuf::from(""), PathBuf::from("a"), PathBuf::from("a/b")]);
    }

    #[test]
    fn pruning_a_dirname_skips_its_subtree() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("keep")).unwrap();
        std::fs::create_dir_all(dir.path().join("skip/nested")).unwrap();

        let mut seen: Vec<PathBuf> = Vec::new();
        walk_tree(dir.path(), Path::new(""), &mut |rel, dirs, _files| {
            seen.push(rel.to_path_buf());
            dirs.retain(|d| d != "skip");
            Ok(())
        })
        .expect("walk");

        assert_eq!(seen, vec![PathBuf::from(""), PathBuf::from("keep")]);
    }
}
