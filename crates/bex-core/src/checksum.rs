//! Post-copy checksum verification (SHA-256).
//!
//! Runs during the finalizing phase, not inline with the chunk loop, to
//! keep the copy path itself fast.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::BexError;

const BUF_SIZE: usize = 64 * 1024;

/// Compute SHA-256 of a file and return the digest as lowercase hex.
/// Reads in chunks to keep memory use bounded; suitable for large files.
pub fn sha256_path(path: &Path) -> std::io::Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; BUF_SIZE];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    Ok(hex::encode(digest))
}

/// Compare source and destination digests after a copy.
pub fn verify_copy(source: &Path, dest: &Path) -> Result<(), BexError> {
    let src_digest = sha256_path(source).map_err(|e| BexError::SourceUnreachable {
        path: source.to_path_buf(),
        source: e,
    })?;
    let dst_digest = sha256_path(dest).map_err(|e| BexError::Transfer {
        offset: 0,
        source: e,
    })?;
    if src_digest != dst_digest {
        return Err(BexError::ChecksumMismatch {
            path: dest.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn sha256_path_known_content() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello\n").unwrap();
        f.flush().unwrap();
        let digest = sha256_path(f.path()).unwrap();
        assert_eq!(
            digest,
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
    }

    #[test]
    fn verify_copy_matches_identical_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();
        assert!(verify_copy(&a, &b).is_ok());
    }

    #[test]
    fn verify_copy_rejects_differing_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"other bytes").unwrap();
        let err = verify_copy(&a, &b).unwrap_err();
        assert!(matches!(err, BexError::ChecksumMismatch { .. }));
    }
}
