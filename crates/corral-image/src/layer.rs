//! Filesystem layer extraction.
//!
//! An image is a single tar archive, optionally gzip-compressed, holding a
//! root filesystem. Extracting it yields the read-only lower layer shared
//! by every container of that image.

use std::io::Read;
use std::path::Path;

use corral_common::error::{CorralError, Result};
use corral_common::types::Sha256Hash;

/// A single extracted filesystem layer.
#[derive(Debug, Clone)]
pub struct Layer {
    /// Digest of the archive the layer was extracted from.
    pub hash: Sha256Hash,
    /// Size of the archive in bytes.
    pub size_bytes: u64,
}

/// Extracts a tar archive to the target directory.
///
/// Supports both plain `.tar` and gzip-compressed `.tar.gz` / `.tgz`
/// archives; compression is decided by the file extension. Permission
/// bits are preserved, and so are ownerships when running as root.
///
/// # Errors
///
/// Returns an error if extraction or hash computation fails.
pub fn extract_layer(archive_path: &Path, target: &Path) -> Result<Layer> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "extracting layer"
    );

    std::fs::create_dir_all(target).map_err(|e| CorralError::io(target, e))?;

    let file = std::fs::File::open(archive_path).map_err(|e| CorralError::io(archive_path, e))?;
    let size_bytes = file
        .metadata()
        .map_err(|e| CorralError::io(archive_path, e))?
        .len();

    let as_root = nix::unistd::geteuid().is_root();
    if is_gzip_archive(archive_path) {
        unpack(flate2::read::GzDecoder::new(file), target, as_root)?;
    } else {
        unpack(file, target, as_root)?;
    }

    let hash = crate::hash::hash_file(archive_path)?;
    tracing::info!(hash = %hash, size = size_bytes, "layer extracted");

    Ok(Layer { hash, size_bytes })
}

fn unpack(reader: impl Read, target: &Path, preserve_ownerships: bool) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_preserve_ownerships(preserve_ownerships);
    archive
        .unpack(target)
        .map_err(|e| CorralError::io(target, e))
}

/// Determines whether the archive is gzip-compressed based on extension.
pub(crate) fn is_gzip_archive(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("tgz"))
}
