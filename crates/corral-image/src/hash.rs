//! SHA-256 content digests.
//!
//! The digest of an image archive is recorded in the layer marker so an
//! extracted layer can be traced back to the archive it came from.

use std::path::Path;

use corral_common::error::{CorralError, Result};
use corral_common::types::Sha256Hash;
use sha2::{Digest, Sha256};

/// Computes the SHA-256 hash of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<Sha256Hash> {
    tracing::debug!(path = %path.display(), "computing SHA-256 hash");
    let mut file = std::fs::File::open(path).map_err(|e| CorralError::io(path, e))?;
    let mut hasher = Sha256::new();
    let _ = std::io::copy(&mut file, &mut hasher).map_err(|e| CorralError::io(path, e))?;
    Sha256Hash::from_hex(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_of_known_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").expect("write");
        assert_eq!(
            hash_file(&path).expect("hash").as_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hash_of_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = hash_file(&dir.path().join("missing")).expect_err("missing");
        assert!(matches!(err, CorralError::Io { .. }));
    }
}
