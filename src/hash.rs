// Copyright (c) 2026-present, treeseal contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The hash collaborator (spec §6): `hash_file(fileobj, names) -> map<name,
//! digest>`, plus the synthetic `__size__` entry and a name translator from
//! Manifest-domain names (upper case, e.g. `SHA256`) to whatever the
//! underlying digest implementation calls itself.
//!
//! Cryptographic hash primitives are out of core scope (spec §1); this is
//! one concrete, swappable default, not "the hard part."

use crate::entry::{Checksums, SIZE_KEY};
use blake2::Digest;
use std::io::Read;

/// Computes the requested Manifest-domain hash names (plus the file size,
/// unconditionally) for an open, readable stream. Unknown names are
/// ignored, mirroring gemato's hash set reconciliation via union.
pub trait HashProvider {
    /// Reads `r` to EOF once, returning a checksum map keyed by the
    /// Manifest-domain hash name (e.g. `SHA256`) plus `__size__`.
    fn hash_reader(&self, r: &mut dyn Read, names: &[&str]) -> std::io::Result<Checksums>;
}

/// `RustCrypto`-backed implementation covering SHA256, SHA512, BLAKE2B, and
/// (behind the `whirlpool` feature) WHIRLPOOL.
#[derive(Copy, Clone, Debug, Default)]
pub struct DigestHashProvider;

impl HashProvider for DigestHashProvider {
    fn hash_reader(&self, r: &mut dyn Read, names: &[&str]) -> std::io::Result<Checksums> {
        let mut sha256 = names.contains(&"SHA256").then(sha2::Sha256::new);
        let mut sha512 = names.contains(&"SHA512").then(sha2::Sha512::new);
        let mut blake2b = names.contains(&"BLAKE2B").then(blake2::Blake2b512::new);
        #[cfg(feature = "whirlpool")]
        let mut whirlpool = names.contains(&"WHIRLPOOL").then(whirlpool::Whirlpool::new);

        let mut size: u64 = 0;
        let mut buf = [0_u8; 64 * 1024];
        loop {
            let n = r.read(&mut buf)?;
            if n == 0 {
                break;
            }
            size += n as u64;
            if let Some(h) = sha256.as_mut() {
                h.update(&buf[..n]);
            }
            if let Some(h) = sha512.as_mut() {
                h.update(&buf[..n]);
            }
            if let Some(h) = blake2b.as_mut() {
                h.update(&buf[..n]);
            }
            #[cfg(feature = "whirlpool")]
            if let Some(h) = whirlpool.as_mut() {
                h.update(&buf[..n]);
            }
        }

        let mut out = Checksums::new();
        if let Some(h) = sha256 {
            out.insert("SHA256".to_string(), hex::encode(h.finalize()));
        }
        if let Some(h) = sha512 {
            out.insert("SHA512".to_string(), hex::encode(h.finalize()));
        }
        if let Some(h) = blake2b {
            out.insert("BLAKE2B".to_string(), hex::encode(h.finalize()));
        }
        #[cfg(feature = "whirlpool")]
        if let Some(h) = whirlpool {
            out.insert("WHIRLPOOL".to_string(), hex::encode(h.finalize()));
        }
        out.insert(SIZE_KEY.to_string(), size.to_string());

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn hashes_known_vectors() {
        let provider = DigestHashProvider;
        let mut data = Cursor::new(b"abc".to_vec());
        let sums = provider
            .hash_reader(&mut data, &["SHA256"])
            .expect("hash should succeed");
        assert_eq!(
            sums.get("SHA256").map(String::as_str),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(sums.get(SIZE_KEY).map(String::as_str), Some("3"));
    }

    #[test]
    fn size_is_always_present() {
        let provider = DigestHashProvider;
        let mut data = Cursor::new(b"hello world".to_vec());
        let sums = provider.hash_reader(&mut data, &[]).expect("ok");
        assert_eq!(sums.len(), 1);
        assert_eq!(sums.get(SIZE_KEY).map(String::as_str), Some("11"));
    }
}
