//! Chunk digests.
//!
//! A chunk digest is the MD5 of the chunk bytes, hex-encoded and cut to
//! [`DIGEST_HEX_LEN`] characters. It detects truncation or corruption in
//! transit; it is not a security property.

use std::io::Read;
use std::path::Path;

use chunkup_protocol::constants::DIGEST_HEX_LEN;
use md5::{Digest, Md5};

use crate::TransferError;

/// Computes the short digest of `data`.
pub fn chunk_digest(data: &[u8]) -> String {
    let mut full = hex::encode(Md5::digest(data));
    full.truncate(DIGEST_HEX_LEN);
    full
}

/// Returns `true` if `expected` is the digest of `data` (hex case ignored).
pub fn verify_chunk_digest(data: &[u8], expected: &str) -> bool {
    chunk_digest(data).eq_ignore_ascii_case(expected.trim())
}

/// Computes the full MD5 of a file on disk, hex-encoded.
pub fn file_digest(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn digest_matches_md5_prefix() {
        // md5("hello world") = 5eb63bbbe01eeed093cb22bb8f5acdc3
        assert_eq!(chunk_digest(b"hello world"), "5eb63bbb");
        // md5("abc") = 900150983cd24fb0d6963f7d28e17f72
        assert_eq!(chunk_digest(b"abc"), "90015098");
    }

    #[test]
    fn digest_is_deterministic() {
        let c1 = chunk_digest(b"chunk payload");
        let c2 = chunk_digest(b"chunk payload");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), DIGEST_HEX_LEN);
    }

    #[test]
    fn digest_differs_for_different_bytes() {
        assert_ne!(chunk_digest(b"hello"), chunk_digest(b"world"));
        // Single flipped bit.
        assert_ne!(chunk_digest(&[0u8; 64]), chunk_digest(&{
            let mut b = [0u8; 64];
            b[63] = 1;
            b
        }));
    }

    #[test]
    fn verify_ignores_case_and_whitespace() {
        assert!(verify_chunk_digest(b"abc", "90015098"));
        assert!(verify_chunk_digest(b"abc", " 90015098\n"));
        assert!(verify_chunk_digest(b"hello world", "5EB63BBB"));
        assert!(!verify_chunk_digest(b"abd", "90015098"));
    }

    #[test]
    fn file_digest_is_full_md5() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"hello world")
            .unwrap();

        let digest = file_digest(&path).unwrap();
        assert_eq!(digest, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert!(digest.starts_with(&chunk_digest(b"hello world")));
    }
}
