//! Streaming checksum verification of the completed download.
//!
//! The verifier runs synchronously after the output file has been closed
//! and flushed. It never hashes inline with the download path; chunks
//! arrive out of order, so only a sequential pass over the final file
//! produces a meaningful digest.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use digest::DynDigest;
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

use crate::error::{DownloadError, DownloadResult};

/// Buffer size for reading the file during hashing (64 KiB).
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Supported checksum algorithms.
///
/// Each algorithm has a fixed hex-digest length, used to validate the
/// expected hash before the download starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgo {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumAlgo {
    /// All supported algorithms, for help text and validation messages.
    pub const ALL: [ChecksumAlgo; 5] = [
        ChecksumAlgo::Md5,
        ChecksumAlgo::Sha1,
        ChecksumAlgo::Sha256,
        ChecksumAlgo::Sha384,
        ChecksumAlgo::Sha512,
    ];

    /// Look up an algorithm by its canonical name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "md5" => Some(Self::Md5),
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            "sha384" => Some(Self::Sha384),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of this algorithm's digest in hex characters.
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha1 => 40,
            Self::Sha256 => 64,
            Self::Sha384 => 96,
            Self::Sha512 => 128,
        }
    }

    fn hasher(&self) -> Box<dyn DynDigest> {
        match self {
            Self::Md5 => Box::new(Md5::default()),
            Self::Sha1 => Box::new(Sha1::default()),
            Self::Sha256 => Box::new(Sha256::default()),
            Self::Sha384 => Box::new(Sha384::default()),
            Self::Sha512 => Box::new(Sha512::default()),
        }
    }
}

impl fmt::Display for ChecksumAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A validated expected digest: algorithm plus lowercase hex string of the
/// correct length.
#[derive(Debug, Clone)]
pub struct ChecksumSpec {
    algo: ChecksumAlgo,
    expected: String,
}

impl ChecksumSpec {
    /// Validate `expected` against the algorithm's digest shape.
    ///
    /// The hash is lowercased; a wrong length or a non-hex character is a
    /// configuration error, caught before the engine starts.
    pub fn new(algo: ChecksumAlgo, expected: &str) -> DownloadResult<Self> {
        let expected = expected.to_ascii_lowercase();
        if expected.len() != algo.hex_len() {
            return Err(DownloadError::Config(format!(
                "invalid {} checksum length: expected {} hex characters, got {}",
                algo,
                algo.hex_len(),
                expected.len()
            )));
        }
        if !expected.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DownloadError::Config(format!(
                "invalid {algo} checksum: not a hexadecimal string"
            )));
        }
        Ok(Self { algo, expected })
    }

    /// The algorithm this spec verifies with.
    pub fn algo(&self) -> ChecksumAlgo {
        self.algo
    }

    /// The expected digest, lowercase hex.
    pub fn expected(&self) -> &str {
        &self.expected
    }
}

/// Hash the whole file and compare against the expected digest.
///
/// Returns `ChecksumMismatch` on inequality and `Io` if the file cannot be
/// read. The digest is independent of how many chunks or workers produced
/// the file; only the bytes matter.
pub fn verify_file(path: &Path, spec: &ChecksumSpec) -> DownloadResult<()> {
    let mut file = File::open(path).map_err(|e| DownloadError::io(path, e))?;

    let mut hasher = spec.algo.hasher();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let n = file
            .read(&mut buffer)
            .map_err(|e| DownloadError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    let got = hex::encode(hasher.finalize());
    if got != spec.expected {
        return Err(DownloadError::ChecksumMismatch {
            expected: spec.expected.clone(),
            got,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
    const HELLO_MD5: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";
    const HELLO_SHA1: &str = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";

    fn write_fixture(dir: &TempDir, content: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join("fixture.bin");
        let mut file = File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    #[test]
    fn test_from_name_known_algorithms() {
        assert_eq!(ChecksumAlgo::from_name("md5"), Some(ChecksumAlgo::Md5));
        assert_eq!(ChecksumAlgo::from_name("SHA256"), Some(ChecksumAlgo::Sha256));
        assert_eq!(ChecksumAlgo::from_name("sha384"), Some(ChecksumAlgo::Sha384));
        assert_eq!(ChecksumAlgo::from_name("crc32"), None);
    }

    #[test]
    fn test_hex_lengths_are_fixed() {
        let expected = [
            (ChecksumAlgo::Md5, 32),
            (ChecksumAlgo::Sha1, 40),
            (ChecksumAlgo::Sha256, 64),
            (ChecksumAlgo::Sha384, 96),
            (ChecksumAlgo::Sha512, 128),
        ];
        for (algo, len) in expected {
            assert_eq!(algo.hex_len(), len, "{algo}");
        }
    }

    #[test]
    fn test_spec_accepts_exact_length_only() {
        for algo in ChecksumAlgo::ALL {
            let good = "a".repeat(algo.hex_len());
            assert!(ChecksumSpec::new(algo, &good).is_ok(), "{algo}");

            let short = "a".repeat(algo.hex_len() - 1);
            assert!(ChecksumSpec::new(algo, &short).is_err(), "{algo} short");

            let long = "a".repeat(algo.hex_len() + 1);
            assert!(ChecksumSpec::new(algo, &long).is_err(), "{algo} long");
        }
    }

    #[test]
    fn test_spec_rejects_non_hex() {
        let bad = "g".repeat(32);
        assert!(matches!(
            ChecksumSpec::new(ChecksumAlgo::Md5, &bad),
            Err(DownloadError::Config(_))
        ));
    }

    #[test]
    fn test_spec_lowercases_expected() {
        let spec = ChecksumSpec::new(ChecksumAlgo::Sha256, &HELLO_SHA256.to_uppercase()).unwrap();
        assert_eq!(spec.expected(), HELLO_SHA256);
    }

    #[test]
    fn test_verify_sha256_match() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir, b"hello world");

        let spec = ChecksumSpec::new(ChecksumAlgo::Sha256, HELLO_SHA256).unwrap();
        assert!(verify_file(&path, &spec).is_ok());
    }

    #[test]
    fn test_verify_md5_and_sha1_match() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir, b"hello world");

        let md5 = ChecksumSpec::new(ChecksumAlgo::Md5, HELLO_MD5).unwrap();
        assert!(verify_file(&path, &md5).is_ok());

        let sha1 = ChecksumSpec::new(ChecksumAlgo::Sha1, HELLO_SHA1).unwrap();
        assert!(verify_file(&path, &sha1).is_ok());
    }

    #[test]
    fn test_verify_mismatch_reports_both_digests() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir, b"hello world!");

        let spec = ChecksumSpec::new(ChecksumAlgo::Sha256, HELLO_SHA256).unwrap();
        match verify_file(&path, &spec) {
            Err(DownloadError::ChecksumMismatch { expected, got }) => {
                assert_eq!(expected, HELLO_SHA256);
                assert_ne!(got, expected);
                assert_eq!(got.len(), 64);
            }
            other => panic!("expected ChecksumMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir, b"");

        let spec = ChecksumSpec::new(
            ChecksumAlgo::Sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        )
        .unwrap();
        assert!(verify_file(&path, &spec).is_ok());
    }

    #[test]
    fn test_verify_missing_file_is_io_error() {
        let spec = ChecksumSpec::new(ChecksumAlgo::Sha256, HELLO_SHA256).unwrap();
        let result = verify_file(Path::new("/nonexistent/file.bin"), &spec);
        assert!(matches!(result, Err(DownloadError::Io { .. })));
    }

    #[test]
    fn test_digest_deterministic_across_reads() {
        let dir = TempDir::new().unwrap();
        // Larger than the hash buffer so the loop runs more than once
        let content = vec![0xABu8; 3 * HASH_BUFFER_SIZE / 2];
        let path = write_fixture(&dir, &content);

        let spec = ChecksumSpec::new(ChecksumAlgo::Sha512, &"0".repeat(128)).unwrap();
        let first = verify_file(&path, &spec).unwrap_err();
        let second = verify_file(&path, &spec).unwrap_err();
        match (first, second) {
            (
                DownloadError::ChecksumMismatch { got: a, .. },
                DownloadError::ChecksumMismatch { got: b, .. },
            ) => assert_eq!(a, b),
            other => panic!("expected two mismatches, got {other:?}"),
        }
    }
}
