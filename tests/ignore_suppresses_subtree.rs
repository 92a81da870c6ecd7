//! Scenario 2 (spec §8): an `IGNORE` entry suppresses verification of
//! everything below it, and `find_path_entry` resolves paths inside the
//! ignored subtree to the `IGNORE` entry itself.

use std::path::Path;
use treeseal::{
    assert_directory_verifies, DigestHashProvider, Entry, LoaderOptions, ManifestLoader,
    PlainTextCodec,
};

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::Digest as _;
    hex::encode(sha2::Sha256::digest(bytes))
}

#[test_log::test]
fn ignore_suppresses_subtree() -> treeseal::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::create_dir(dir.path().join("build"))?;
    std::fs::write(dir.path().join("a"), b"abc")?;
    std::fs::write(dir.path().join("build/anything"), b"garbage")?;
    std::fs::write(
        dir.path().join("Manifest"),
        format!("IGNORE build\nDATA a 3 SHA256 {}\n", sha256_hex(b"abc")),
    )?;

    let mut loader = ManifestLoader::new(
        dir.path().join("Manifest"),
        LoaderOptions::default(),
        Box::new(PlainTextCodec),
        Box::new(DigestHashProvider),
    )?;

    let mut fail = |_: &Path, _: Option<&Entry>, _: &treeseal::VerifyDiff| -> treeseal::Result<bool> {
        panic!("nothing under an IGNORE'd directory should ever mismatch")
    };
    let ok = assert_directory_verifies(&mut loader, Path::new(""), &mut fail, None)?;
    assert!(ok);

    let resolved = loader.find_path_entry(Path::new("build/anything"))?;
    assert!(matches!(resolved, Some(Entry::Ignore { .. })));
    Ok(())
}
