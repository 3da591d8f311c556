use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn verify_sha256(bytes: &[u8], expected_hex: &str) -> bool {
    sha256_hex(bytes).eq_ignore_ascii_case(expected_hex.trim())
}

pub fn verify_sha256_reader<R: Read>(reader: &mut R, expected_hex: &str) -> Result<bool> {
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 8192];
    loop {
        let read = reader
            .read(&mut buffer)
            .context("failed reading data for sha256 verification")?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let actual = hex::encode(hasher.finalize());
    Ok(actual.eq_ignore_ascii_case(expected_hex.trim()))
}

pub fn verify_sha256_file(path: &Path, expected_hex: &str) -> Result<bool> {
    let file = File::open(path)
        .with_context(|| format!("failed to open file for checksum: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    verify_sha256_reader(&mut reader, expected_hex)
        .with_context(|| format!("failed to checksum file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn sha256_hex_matches_known_vectors() {
        assert_eq!(sha256_hex(b""), EMPTY_SHA256);
        assert_eq!(sha256_hex(b"hello"), HELLO_SHA256);
    }

    #[test]
    fn verify_sha256_ignores_case() {
        assert!(verify_sha256(b"hello", &HELLO_SHA256.to_ascii_uppercase()));
        assert!(!verify_sha256(b"hello!", HELLO_SHA256));
    }

    #[test]
    fn verify_sha256_file_reads_whole_file() {
        let dir = tempfile::tempdir().expect("must create temp dir");
        let path = dir.path().join("payload.txt");
        std::fs::write(&path, b"hello").expect("must write payload");

        assert!(verify_sha256_file(&path, HELLO_SHA256).expect("must checksum"));
        assert!(!verify_sha256_file(&path, EMPTY_SHA256).expect("must checksum"));
    }

    #[test]
    fn verify_sha256_file_errors_for_missing_file() {
        let dir = tempfile::tempdir().expect("must create temp dir");
        assert!(verify_sha256_file(&dir.path().join("missing"), EMPTY_SHA256).is_err());
    }
}
