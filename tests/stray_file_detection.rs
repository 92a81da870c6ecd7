//! Scenario 1 (spec §8): a file with no covering entry is a stray file,
//! reported through the fail handler with an `__exists__` diff.

use std::path::{Path, PathBuf};
use treeseal::{
    assert_directory_verifies, DigestHashProvider, Entry, LoaderOptions, ManifestLoader,
    PlainTextCodec, VerifyDiff,
};

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::Digest as _;
    hex::encode(sha2::Sha256::digest(bytes))
}

#[test_log::test]
fn stray_file_detection() -> treeseal::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("a"), b"abc")?;
    std::fs::write(dir.path().join("b"), b"zzz")?;
    std::fs::write(
        dir.path().join("Manifest"),
        format!("DATA a 3 SHA256 {}\n", sha256_hex(b"abc")),
    )?;

    let mut loader = ManifestLoader::new(
        dir.path().join("Manifest"),
        LoaderOptions::default(),
        Box::new(PlainTextCodec),
        Box::new(DigestHashProvider),
    )?;

    let mut stray: Vec<PathBuf> = Vec::new();
    let mut fail = |path: &Path, entry: Option<&Entry>, diff: &VerifyDiff| -> treeseal::Result<bool> {
        assert!(entry.is_none());
        assert_eq!(diff[0].0, "__exists__");
        stray.push(path.to_path_buf());
        Ok(false)
    };

    let ok = assert_directory_verifies(&mut loader, Path::new(""), &mut fail, None)?;
    assert!(!ok);
    assert_eq!(stray, vec![PathBuf::from("b")]);
    Ok(())
}
