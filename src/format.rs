// Copyright (c) 2026-present, treeseal contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The Manifest text format collaborator (spec §6): `load(stream,
//! verify_openpgp, env) -> (entries, signed)` and `dump(stream, sign?,
//! sort?, env, keyid)`.
//!
//! Line-level tokenization and OpenPGP handling are out of core scope
//! (spec §1); [`PlainTextCodec`] is the one concrete default, recovered
//! from the Gentoo Manifest line grammar used by
//! `gen-test-manifest-parallel.py`'s `write_manifest_entry`:
//! `TAG path size [HASHNAME hexdigest]...`. OpenPGP armor is recognized
//! only enough to report whether a Manifest arrived signed — actual
//! signature verification/creation is out of scope and always a no-op
//! here.

use crate::entry::{Checksums, Entry, FileEntry, Tag, SIZE_KEY};
use crate::error::{Error, Result};
use std::io::{BufRead, Write};

const PGP_SIGNED_HEADER: &str = "-----BEGIN PGP SIGNED MESSAGE-----";
const PGP_SIGNATURE_HEADER: &str = "-----BEGIN PGP SIGNATURE-----";

/// Opaque placeholder for an OpenPGP environment (keyrings, agent socket,
/// …). OpenPGP is out of core scope; no codec in this crate reads it.
pub struct OpenPgpEnv;

/// The read/write contract spec §6 places on the Manifest text format.
pub trait ManifestCodec: Send + Sync {
    /// Parses `r` to EOF, returning the entries in file order and whether
    /// the stream carried OpenPGP cleartext-signature armor.
    fn load(
        &self,
        r: &mut dyn BufRead,
        verify_openpgp: bool,
        env: Option<&OpenPgpEnv>,
    ) -> Result<(Vec<Entry>, bool)>;

    /// Writes `entries` to `w`. `sort`, when set, orders entries by a
    /// stable content-deterministic key before writing (spec §4.6).
    /// `sign` requests OpenPGP cleartext signing of the result.
    fn dump(
        &self,
        w: &mut dyn Write,
        entries: &[Entry],
        sign: bool,
        sort: bool,
        env: Option<&OpenPgpEnv>,
        keyid: Option<&str>,
    ) -> Result<()>;
}

/// The plain-text Gentoo Manifest grammar, unsigned.
#[derive(Copy, Clone, Debug, Default)]
pub struct PlainTextCodec;

impl ManifestCodec for PlainTextCodec {
    fn load(
        &self,
        r: &mut dyn BufRead,
        _verify_openpgp: bool,
        _env: Option<&OpenPgpEnv>,
    ) -> Result<(Vec<Entry>, bool)> {
        let mut entries = Vec::new();
        let mut signed = false;
        let mut in_header = false;
        let mut past_header = false;
        let mut in_signature = false;

        for line in r.lines() {
            let line = line.map_err(Error::Io)?;
            let trimmed = line.trim_end_matches(['\r', '\n']);

            if trimmed == PGP_SIGNED_HEADER {
                signed = true;
                in_header = true;
                past_header = false;
                continue;
            }
            if in_header {
                // Armor headers end at the first blank line.
                if trimmed.is_empty() {
                    in_header = false;
                    past_header = true;
                }
                continue;
            }
            if trimmed == PGP_SIGNATURE_HEADER {
                in_signature = true;
                continue;
            }
            if in_signature {
                continue;
            }
            let _ = past_header;

            if trimmed.is_empty() {
                continue;
            }

            entries.push(parse_line(trimmed)?);
        }

        Ok((entries, signed))
    }

    fn dump(
        &self,
        w: &mut dyn Write,
        entries: &[Entry],
        _sign: bool,
        sort: bool,
        _env: Option<&OpenPgpEnv>,
        _keyid: Option<&str>,
    ) -> Result<()> {
        if sort {
            let mut ordered: Vec<&Entry> = entries.iter().collect();
            ordered.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
            for e in ordered {
                write_line(w, e)?;
            }
        } else {
            for e in entries {
                write_line(w, e)?;
            }
        }
        Ok(())
    }
}

fn sort_key(e: &Entry) -> (String, std::path::PathBuf) {
    let tag_name = format!("{:?}", e.tag());
    let path = e.raw_path().map(std::path::Path::to_path_buf).unwrap_or_default();
    (tag_name, path)
}

fn parse_line(line: &str) -> Result<Entry> {
    let mut tokens = line.split_whitespace();
    let tag_str = tokens
        .next()
        .ok_or_else(|| Error::ManifestSyntaxError("empty entry line".to_string()))?;

    match tag_str {
        "IGNORE" => {
            let path = tokens
                .next()
                .ok_or_else(|| Error::ManifestSyntaxError("IGNORE missing path".to_string()))?;
            Ok(Entry::Ignore { path: path.into() })
        }
        "TIMESTAMP" => {
            let value = tokens
                .next()
                .ok_or_else(|| Error::ManifestSyntaxError("TIMESTAMP missing value".to_string()))?;
            time::OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
                .map_err(|_| Error::ManifestSyntaxError(format!("TIMESTAMP {value} is not RFC 3339")))?;
            Ok(Entry::Timestamp { value: value.to_string() })
        }
        "DATA" | "EBUILD" | "AUX" | "MISC" | "OPTIONAL" | "MANIFEST" | "DIST" => {
            let path = tokens
                .next()
                .ok_or_else(|| Error::ManifestSyntaxError(format!("{tag_str} missing path")))?;
            let size: u64 = tokens
                .next()
                .ok_or_else(|| Error::ManifestSyntaxError(format!("{tag_str} missing size")))?
                .parse()
                .map_err(|_| Error::ManifestSyntaxError(format!("{tag_str} has a non-numeric size")))?;

            let mut checksums = Checksums::new();
            loop {
                let Some(name) = tokens.next() else { break };
                let digest = tokens.next().ok_or_else(|| {
                    Error::ManifestSyntaxError(format!("{tag_str} has a dangling hash name {name}"))
                })?;
                checksums.insert(name.to_string(), digest.to_string());
            }

            let f = FileEntry::new(path, size, checksums);
            Ok(match tag_str {
                "DATA" => Entry::Data(f),
                "EBUILD" => Entry::Ebuild(f),
                "AUX" => Entry::Aux(f),
                "MISC" => Entry::Misc(f),
                "OPTIONAL" => Entry::Optional(f),
                "MANIFEST" => Entry::Manifest(f),
                "DIST" => Entry::Dist(f),
                _ => unreachable!(),
            })
        }
        other => Err(Error::ManifestSyntaxError(format!("unknown tag {other}"))),
    }
}

fn write_line(w: &mut dyn Write, e: &Entry) -> Result<()> {
    match e {
        Entry::Ignore { path } => {
            writeln!(w, "IGNORE {}", path.display()).map_err(Error::Io)
        }
        Entry::Timestamp { value } => writeln!(w, "TIMESTAMP {value}").map_err(Error::Io),
        _ => {
            let tag = tag_word(e.tag());
            let f = e.file_entry().expect("file-kind tag has a FileEntry");
            let mut line = format!("{tag} {} {}", f.path.display(), f.size);
            for (name, digest) in &f.checksums {
                if name == SIZE_KEY {
                    continue;
                }
                line.push(' ');
                line.push_str(name);
                line.push(' ');
                line.push_str(digest);
            }
            line.push('\n');
            w.write_all(line.as_bytes()).map_err(Error::Io)
        }
    }
}

fn tag_word(tag: Tag) -> &'static str {
    match tag {
        Tag::Data => "DATA",
        Tag::Ebuild => "EBUILD",
        Tag::Aux => "AUX",
        Tag::Misc => "MISC",
        Tag::Optional => "OPTIONAL",
        Tag::Manifest => "MANIFEST",
        Tag::Dist => "DIST",
        Tag::Ignore => "IGNORE",
        Tag::Timestamp => "TIMESTAMP",
    }
}
