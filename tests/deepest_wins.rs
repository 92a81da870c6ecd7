//! Scenario 3 (spec §8): when two Manifests at different depths describe
//! the same composed path, `find_path_entry` resolves to the deepest one.

use std::path::Path;
use treeseal::{DigestHashProvider, Entry, LoaderOptions, ManifestLoader, PlainTextCodec};

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::Digest as _;
    hex::encode(sha2::Sha256::digest(bytes))
}

#[test_log::test]
fn deepest_wins() -> treeseal::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::create_dir(dir.path().join("sub"))?;
    std::fs::write(
        dir.path().join("Manifest"),
        format!(
            "MANIFEST sub/Manifest 0\nDATA sub/x 1 SHA256 {}\n",
            sha256_hex(b"A")
        ),
    )?;
    std::fs::write(
        dir.path().join("sub/Manifest"),
        format!("DATA x 1 SHA256 {}\n", sha256_hex(b"B")),
    )?;

    let mut loader = ManifestLoader::new(
        dir.path().join("Manifest"),
        LoaderOptions::default(),
        Box::new(PlainTextCodec),
        Box::new(DigestHashProvider),
    )?;

    let resolved = loader
        .find_path_entry(Path::new("sub/x"))?
        .expect("an entry covers sub/x");
    let Entry::Data(f) = resolved else {
        panic!("expected a DATA entry, got {resolved:?}");
    };
    assert_eq!(f.checksums.get("SHA256"), Some(&sha256_hex(b"B")));
    Ok(())
}
