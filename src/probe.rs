// Copyright (c) 2026-present, treeseal contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The File Metadata Probe (spec §4.2): a single-pass, restartable-only-
//! from-scratch producer of `(exists, device, type, size, checksums)`.
//!
//! Modeled as an [`Iterator`] rather than a Python generator: each `next()`
//! call advances the state machine by exactly one stage and the file
//! descriptor (when one was opened) is owned by the iterator and dropped
//! — closing it — either when the type check rules out a regular file, the
//! checksum stage finishes, or the iterator itself is dropped without
//! being driven to completion. This gives the "caller must drive it to
//! completion or close it explicitly" contract from the spec for free via
//! ordinary RAII, with no separate close() method needed.

use crate::entry::{Checksums, SIZE_KEY};
use crate::hash::HashProvider;
use std::fs::File;
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// One stage of the probe, yielded in a fixed order (spec §4.2).
#[derive(Debug)]
pub enum ProbeStep {
    Exists(bool),
    Device(u64),
    FileType { raw_mode: u32, type_name: &'static str },
    Size(u64),
    Checksums(Checksums),
}

enum State {
    Start,
    HaveExistence {
        file: Option<File>,
    },
    HaveDevice {
        file: Option<File>,
        meta: std::fs::Metadata,
    },
    /// Non-regular file (or unopenable ENXIO device): nothing further to
    /// yield.
    NonRegularDone,
    HaveType {
        file: File,
    },
    HaveSize {
        file: File,
    },
    Done,
}

pub struct MetadataProbe<'h> {
    path: std::path::PathBuf,
    hashes: Vec<String>,
    hasher: &'h dyn HashProvider,
    state: State,
}

impl<'h> MetadataProbe<'h> {
    #[must_use]
    pub fn new(path: impl AsRef<Path>, hashes: &[String], hasher: &'h dyn HashProvider) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            hashes: hashes.to_vec(),
            hasher,
            state: State::Start,
        }
    }

    fn type_name(meta: std::fs::Metadata) -> &'static str {
        let t = meta.file_type();
        if t.is_file() {
            "regular file"
        } else if t.is_dir() {
            "directory"
        } else if t.is_char_device() {
            "character device"
        } else if t.is_block_device() {
            "block device"
        } else if t.is_fifo() {
            "named pipe"
        } else if t.is_socket() {
            "UNIX socket"
        } else {
            "unknown"
        }
    }
}

impl Iterator for MetadataProbe<'_> {
    type Item = io::Result<ProbeStep>;

    fn next(&mut self) -> Option<Self::Item> {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Start => {
                // O_NONBLOCK avoids hanging on unconnected pipes/sockets.
                use std::os::unix::fs::OpenOptionsExt;
                match std::fs::OpenOptions::new()
                    .read(true)
                    .custom_flags(libc::O_NONBLOCK)
                    .open(&self.path)
                {
                    Ok(f) => {
                        self.state = State::HaveExistence { file: Some(f) };
                        Some(Ok(ProbeStep::Exists(true)))
                    }
                    Err(e) if e.raw_os_error() == Some(libc::ENOENT) => {
                        self.state = State::Done;
                        Some(Ok(ProbeStep::Exists(false)))
                    }
                    Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {
                        // unconnected device or socket: exists but unopenable
                        self.state = State::HaveExistence { file: None };
                        Some(Ok(ProbeStep::Exists(true)))
                    }
                    Err(e) => {
                        self.state = State::Done;
                        Some(Err(e))
                    }
                }
            }

            State::HaveExistence { file } => {
                let meta_result = match &file {
                    Some(f) => f.metadata(),
                    None => std::fs::metadata(&self.path),
                };
                match meta_result {
                    Ok(meta) => {
                        let dev = meta.dev();
                        self.state = State::HaveDevice { file, meta };
                        Some(Ok(ProbeStep::Device(dev)))
                    }
                    Err(e) => Some(Err(e)),
                }
            }

            State::HaveDevice { file, meta } => {
                let raw_mode = meta.mode();
                let is_regular = meta.file_type().is_file();
                let type_name = Self::type_name(meta);
                if is_regular {
                    if let Some(f) = file {
                        self.state = State::HaveType { file: f };
                    } else {
                        // ENXIO: "can only happen w/ ENXIO" per spec - not a
                        // usable regular file, treat as non-regular.
                        self.state = State::NonRegularDone;
                    }
                } else {
                    self.state = State::NonRegularDone;
                }
                Some(Ok(ProbeStep::FileType { raw_mode, type_name }))
            }

            State::NonRegularDone => {
                self.state = State::Done;
                None
            }

            State::HaveType { file } => match file.metadata() {
                Ok(meta) => {
                    self.state = State::HaveSize { file };
                    Some(Ok(ProbeStep::Size(meta.len())))
                }
                Err(e) => Some(Err(e)),
            },

            State::HaveSize { mut file } => {
                // open() may have left the descriptor O_NONBLOCK; restore
                // blocking mode before reading.
                if let Err(e) = clear_nonblocking(&file) {
                    return Some(Err(e));
                }

                let names: Vec<&str> = self.hashes.iter().map(String::as_str).collect();
                let result = self.hasher.hash_reader(&mut file, &names);
                self.state = State::Done;
                match result {
                    Ok(sums) => Some(Ok(ProbeStep::Checksums(sums))),
                    Err(e) => Some(Err(e)),
                }
            }

            State::Done => None,
        }
    }
}

fn clear_nonblocking(file: &File) -> io::Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    fcntl(file.as_raw_fd(), FcntlArg::F_SETFL(OFlag::empty()))
        .map(|_| ())
        .map_err(io::Error::from)
}

/// Convenience wrapper: drives a [`MetadataProbe`] to completion and
/// collects the full tuple, for callers (like [`crate::verify`]) that want
/// all fields at once rather than the early-exit short-circuiting that
/// makes the staged iterator worthwhile in the first place.
pub struct FullProbe {
    pub exists: bool,
    pub device: Option<u64>,
    pub raw_mode: Option<u32>,
    pub type_name: Option<&'static str>,
    pub size: Option<u64>,
    pub checksums: Option<Checksums>,
}

pub fn probe_all(
    path: impl AsRef<Path>,
    hashes: &[String],
    hasher: &dyn HashProvider,
) -> io::Result<FullProbe> {
    let mut out = FullProbe {
        exists: false,
        device: None,
        raw_mode: None,
        type_name: None,
        size: None,
        checksums: None,
    };
    for step in MetadataProbe::new(path, hashes, hasher) {
        match step? {
            ProbeStep::Exists(e) => out.exists = e,
            ProbeStep::Device(d) => out.device = Some(d),
            ProbeStep::FileType { raw_mode, type_name } => {
                out.raw_mode = Some(raw_mode);
                out.type_name = Some(type_name);
            }
            ProbeStep::Size(s) => out.size = Some(s),
            ProbeStep::Checksums(c) => out.checksums = Some(c),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::DigestHashProvider;
    use tempfile::tempdir;

    #[test]
    fn probes_regular_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a");
        std::fs::write(&path, b"abc").expect("write");

        let hasher = DigestHashProvider;
        let result = probe_all(&path, &["SHA256".to_string()], &hasher).expect("probe");
        assert!(result.exists);
        assert_eq!(result.type_name, Some("regular file"));
        assert_eq!(result.size, Some(3));
        assert_eq!(
            result.checksums.unwrap().get(SIZE_KEY).map(String::as_str),
            Some("3")
        );
    }

    #[test]
    fn probes_missing_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("missing");
        let hasher = DigestHashProvider;
        let result = probe_all(&path, &[], &hasher).expect("probe");
        assert!(!result.exists);
        assert!(result.device.is_none());
    }

    #[test]
    fn probes_directory() {
        let dir = tempdir().expect("tempdir");
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).expect("mkdir");
        let hasher = DigestHashProvider;
        let result = probe_all(&sub, &[], &hasher).expect("probe");
        assert!(result.exists);
        assert_eq!(result.type_name, Some("directory"));
        assert!(result.size.is_none());
    }
}
