// Copyright (c) 2026-present, treeseal contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Transparent compressed-stream layering (spec §4.1).
//!
//! A path's final extension selects a codec: `.gz`, `.bz2`, `.lzma`
//! (LZMA alone-format), `.xz` (LZMA xz-format); no matching extension means
//! uncompressed. In idiomatic Rust the "stacked resource that must unwind
//! cleanly" from the original design collapses to ordinary ownership: every
//! layer here owns the layer beneath it, so a single `Drop` (or the
//! explicit `close`/`finish` below) tears the whole stack down in reverse
//! order with no separate scope-guard needed. Likewise the "text wrapper"
//! layer gemato adds for encoding options is unnecessary in Rust, since
//! `Write`/`str` already guarantee UTF-8 at the type level — callers just
//! write `&str` straight into the counting layer described below.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

/// The four known compression codecs, keyed by filename suffix.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Codec {
    Gzip,
    Bzip2,
    /// LZMA "alone" format (`.lzma`).
    LzmaAlone,
    /// LZMA xz-container format (`.xz`).
    Xz,
}

/// The suffix set recognized for compressed Manifest variants (spec §6).
pub const KNOWN_SUFFIXES: [&str; 4] = ["gz", "bz2", "lzma", "xz"];

impl Codec {
    #[must_use]
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "gz" => Some(Codec::Gzip),
            "bz2" => Some(Codec::Bzip2),
            "lzma" => Some(Codec::LzmaAlone),
            "xz" => Some(Codec::Xz),
            _ => None,
        }
    }

    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Codec::Gzip => "gz",
            Codec::Bzip2 => "bz2",
            Codec::LzmaAlone => "lzma",
            Codec::Xz => "xz",
        }
    }
}

/// Returns the codec implied by `path`'s final extension, if any.
#[must_use]
pub fn codec_for_path(path: &Path) -> Option<Codec> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(Codec::from_suffix)
}

/// The suffix of `path` if it names one of the known compressed variants,
/// e.g. `"gz"` for `Manifest.gz`.
#[must_use]
pub fn compressed_suffix(path: &Path) -> Option<&'static str> {
    codec_for_path(path).map(Codec::suffix)
}

/// `[base, base.gz, base.bz2, base.lzma, base.xz]` — the enumeration used
/// both to recognize any top-level Manifest variant and to form rename
/// targets when (re)compressing (spec §4.1).
#[must_use]
pub fn candidate_names(base: &Path) -> Vec<PathBuf> {
    let mut out = Vec::with_capacity(KNOWN_SUFFIXES.len() + 1);
    out.push(base.to_path_buf());
    for suffix in KNOWN_SUFFIXES {
        let mut name = base.as_os_str().to_os_string();
        name.push(".");
        name.push(suffix);
        out.push(PathBuf::from(name));
    }
    out
}

/// Appends `.{format}` to `base`, used when a Manifest crosses the
/// compression watermark and needs a new name (spec §4.6).
#[must_use]
pub fn with_compressed_suffix(base: &Path, format: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(".");
    name.push(format);
    PathBuf::from(name)
}

/// Strips a known compressed suffix from `path`, if present.
#[must_use]
pub fn without_compressed_suffix(path: &Path) -> PathBuf {
    if let Some(suffix) = compressed_suffix(path) {
        let s = path.as_os_str().to_string_lossy();
        PathBuf::from(s.trim_end_matches(&format!(".{suffix}")))
    } else {
        path.to_path_buf()
    }
}

enum Decoder {
    Plain(File),
    Gzip(flate2::read::GzDecoder<File>),
    Bzip2(bzip2::read::BzDecoder<File>),
    LzmaAlone(xz2::read::XzDecoder<File>),
    Xz(xz2::read::XzDecoder<File>),
}

impl Read for Decoder {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decoder::Plain(f) => f.read(buf),
            Decoder::Gzip(d) => d.read(buf),
            Decoder::Bzip2(d) => d.read(buf),
            Decoder::LzmaAlone(d) | Decoder::Xz(d) => d.read(buf),
        }
    }
}

fn lzma_alone_decoder(f: File) -> Result<xz2::read::XzDecoder<File>> {
    let stream = xz2::stream::Stream::new_lzma_decoder(u64::MAX).map_err(io::Error::from)?;
    Ok(xz2::read::XzDecoder::new_stream(f, stream))
}

fn lzma_alone_encoder(f: File, preset: u32) -> Result<xz2::write::XzEncoder<File>> {
    let opts = xz2::stream::LzmaOptions::new_preset(preset).map_err(io::Error::from)?;
    let stream = xz2::stream::Stream::new_lzma_encoder(&opts).map_err(io::Error::from)?;
    Ok(xz2::write::XzEncoder::new_stream(f, stream))
}

/// A readable, potentially-decompressed byte stream. Wraps a `BufReader` so
/// line-oriented Manifest parsing (`read_line`) works uniformly regardless
/// of codec.
pub struct CompressedReader {
    inner: BufReader<Decoder>,
}

impl Read for CompressedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl BufRead for CompressedReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt);
    }
}

/// Opens `path` for reading, transparently decompressing based on its
/// extension. An extension that isn't one of the four known suffixes is
/// rejected with `UnsupportedCompression` rather than silently treated as
/// plain text (spec §4.1).
pub fn open_read(path: &Path) -> Result<CompressedReader> {
    require_known_or_absent(path)?;
    let f = File::open(path)?;
    let decoder = match codec_for_path(path) {
        None => Decoder::Plain(f),
        Some(Codec::Gzip) => Decoder::Gzip(flate2::read::GzDecoder::new(f)),
        Some(Codec::Bzip2) => Decoder::Bzip2(bzip2::read::BzDecoder::new(f)),
        Some(Codec::LzmaAlone) => Decoder::LzmaAlone(lzma_alone_decoder(f)?),
        Some(Codec::Xz) => Decoder::Xz(xz2::read::XzDecoder::new(f)),
    };
    Ok(CompressedReader {
        inner: BufReader::new(decoder),
    })
}

enum Encoder {
    Plain(File),
    Gzip(flate2::write::GzEncoder<File>),
    Bzip2(bzip2::write::BzEncoder<File>),
    LzmaAlone(xz2::write::XzEncoder<File>),
    Xz(xz2::write::XzEncoder<File>),
}

impl Write for Encoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Plain(f) => f.write(buf),
            Encoder::Gzip(e) => e.write(buf),
            Encoder::Bzip2(e) => e.write(buf),
            Encoder::LzmaAlone(e) | Encoder::Xz(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Plain(f) => f.flush(),
            Encoder::Gzip(e) => e.flush(),
            Encoder::Bzip2(e) => e.flush(),
            Encoder::LzmaAlone(e) | Encoder::Xz(e) => e.flush(),
        }
    }
}

impl Encoder {
    fn finish(self) -> io::Result<File> {
        match self {
            Encoder::Plain(f) => Ok(f),
            Encoder::Gzip(e) => e.finish(),
            Encoder::Bzip2(e) => e.finish(),
            Encoder::LzmaAlone(e) | Encoder::Xz(e) => e.finish(),
        }
    }
}

const XZ_PRESET: u32 = 6;

/// A writable, potentially-compressing byte stream that tracks the number
/// of *uncompressed* bytes handed to it — the compression watermark policy
/// (spec §4.6) needs this count to decide whether a Manifest should be
/// (re)compressed.
pub struct CompressedWriter {
    inner: Encoder,
    uncompressed_bytes: u64,
}

impl Write for CompressedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.uncompressed_bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl CompressedWriter {
    /// The number of uncompressed bytes written so far.
    #[must_use]
    pub fn uncompressed_bytes_written(&self) -> u64 {
        self.uncompressed_bytes
    }

    /// Finishes the codec (flushing any trailer) and syncs the underlying
    /// file. This is the explicit analogue of gemato's `FileStack.close()`:
    /// every layer is torn down in order, from the codec down to the raw
    /// file descriptor.
    pub fn close(self) -> Result<()> {
        let mut f = self.inner.finish()?;
        f.flush()?;
        Ok(())
    }
}

/// Opens `path` for writing, transparently compressing based on its
/// extension. An extension that isn't one of the four known suffixes is
/// rejected with `UnsupportedCompression` (spec §4.1). The raw file is
/// truncated/created as needed.
pub fn open_write(path: &Path) -> Result<CompressedWriter> {
    require_known_or_absent(path)?;
    let f = File::create(path)?;
    let inner = match codec_for_path(path) {
        None => Encoder::Plain(f),
        Some(Codec::Gzip) => {
            Encoder::Gzip(flate2::write::GzEncoder::new(f, flate2::Compression::default()))
        }
        Some(Codec::Bzip2) => {
            Encoder::Bzip2(bzip2::write::BzEncoder::new(f, bzip2::Compression::best()))
        }
        Some(Codec::LzmaAlone) => Encoder::LzmaAlone(lzma_alone_encoder(f, XZ_PRESET)?),
        Some(Codec::Xz) => Encoder::Xz(xz2::write::XzEncoder::new(f, XZ_PRESET)),
    };
    Ok(CompressedWriter {
        inner,
        uncompressed_bytes: 0,
    })
}

/// Validates that `path`'s extension (if any) names a supported codec,
/// without opening it. `open_read`/`open_write` call this first so an
/// unrecognized suffix is always rejected rather than silently opened as
/// plain text — unlike [`codec_for_path`], which returns `None` (plain) for
/// any unmatched extension and is only safe to use once this has passed
/// (spec §4.1: "Unknown extensions fail with `UnsupportedCompression`").
pub fn require_known_or_absent(path: &Path) -> Result<()> {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if Codec::from_suffix(ext).is_none() {
            return Err(Error::UnsupportedCompression(ext.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use tempfile::tempdir;

    #[test]
    fn candidate_names_enumerates_suffixes() {
        let names = candidate_names(Path::new("/root/Manifest"));
        let suffixes: Vec<_> = names
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            suffixes,
            vec![
                "/root/Manifest",
                "/root/Manifest.gz",
                "/root/Manifest.bz2",
                "/root/Manifest.lzma",
                "/root/Manifest.xz",
            ]
        );
    }

    #[test]
    fn round_trips_each_codec() {
        let dir = tempdir().expect("tempdir");
        for suffix in ["", "gz", "bz2", "lzma", "xz"] {
            let name = if suffix.is_empty() {
                "Manifest".to_string()
            } else {
                format!("Manifest.{suffix}")
            };
            let path = dir.path().join(name);

            let mut w = open_write(&path).expect("open_write");
            w.write_all(b"DATA a 3 SHA256=x\n").expect("write");
            assert_eq!(w.uncompressed_bytes_written(), 19);
            w.close().expect("close");

            let mut r = open_read(&path).expect("open_read");
            let mut got = String::new();
            r.read_to_string(&mut got).expect("read");
            assert_eq!(got, "DATA a 3 SHA256=x\n");
        }
    }

    #[test]
    fn unknown_suffix_is_rejected() {
        let err = require_known_or_absent(Path::new("Manifest.zst")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCompression(ref s) if s == "zst"));
    }

    #[test]
    fn any_non_codec_suffix_is_rejected_not_just_known_lookalikes() {
        let err = require_known_or_absent(Path::new("Manifest.ebuild")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCompression(ref s) if s == "ebuild"));
    }

    #[test]
    fn plain_suffix_is_accepted() {
        require_known_or_absent(Path::new("Manifest")).expect("no suffix is fine");
        require_known_or_absent(Path::new("Manifest.gz")).expect("known suffix is fine");
    }

    #[test]
    fn open_read_rejects_unknown_suffix() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("Manifest.zst");
        std::fs::write(&path, b"whatever").expect("write");
        let err = open_read(&path).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCompression(ref s) if s == "zst"));
    }

    #[test]
    fn open_write_rejects_unknown_suffix() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("Manifest.zst");
        let err = open_write(&path).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCompression(ref s) if s == "zst"));
        assert!(!path.exists(), "open_write must not create the file before validating");
    }
}
