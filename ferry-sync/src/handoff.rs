//! Hand-off of an export artifact to the downstream consumer's directory.
//!
//! 1. SHA-256 hash the artifact.
//! 2. Write the bytes to `<dest>.ferry.tmp`.
//! 3. Rename to `<dest>` (atomic on POSIX), so the consumer never sees a
//!    partial file.
//! 4. Re-read `<dest>` and compare digests.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{io_err, SyncError};

/// Where an artifact landed and what it hashed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffReceipt {
    pub destination: PathBuf,
    pub sha256: String,
    pub bytes: u64,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// Copy `artifact` into `dest_dir` as `file_name` and verify the copy.
pub fn hand_off(
    artifact: &Path,
    dest_dir: &Path,
    file_name: &str,
) -> Result<HandoffReceipt, SyncError> {
    let bytes = std::fs::read(artifact).map_err(|e| io_err(artifact, e))?;
    let expected = sha256_hex(&bytes);

    std::fs::create_dir_all(dest_dir).map_err(|e| io_err(dest_dir, e))?;
    let destination = dest_dir.join(file_name);
    let tmp = PathBuf::from(format!("{}.ferry.tmp", destination.display()));
    std::fs::write(&tmp, &bytes).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, &destination) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&destination, e));
    }

    let written = std::fs::read(&destination).map_err(|e| io_err(&destination, e))?;
    let actual = sha256_hex(&written);
    if actual != expected {
        let _ = std::fs::remove_file(&destination);
        return Err(SyncError::Checksum {
            path: destination,
            expected,
            actual,
        });
    }

    tracing::info!(
        destination = %destination.display(),
        sha256 = %expected,
        "handed off export artifact"
    );
    Ok(HandoffReceipt {
        destination,
        sha256: expected,
        bytes: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copies_and_verifies() {
        let tmp = TempDir::new().unwrap();
        let artifact = tmp.path().join("temp_1.json");
        std::fs::write(&artifact, br#"{"upserts":[]}"#).unwrap();

        let dest = tmp.path().join("out");
        let receipt = hand_off(&artifact, &dest, "changes_1.json").unwrap();

        assert_eq!(receipt.destination, dest.join("changes_1.json"));
        assert_eq!(receipt.sha256, sha256_hex(br#"{"upserts":[]}"#));
        assert_eq!(receipt.bytes, 14);
        assert!(artifact.exists(), "source artifact is left for the caller");
        assert!(!dest.join("changes_1.json.ferry.tmp").exists());
    }

    #[test]
    fn missing_artifact_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = hand_off(&tmp.path().join("nope.json"), tmp.path(), "x.json").unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }));
    }

    #[test]
    fn digest_is_lowercase_hex() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
