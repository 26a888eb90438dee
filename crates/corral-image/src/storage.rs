//! Local storage of image archives and their extracted lower layers.
//!
//! Layout under the runtime root:
//!
//! ```text
//! images/<image>.tar | .tar.gz | .tgz   archives
//! layers/<image>/                       extracted lower layer
//! layers/<image>/.corral-layer          marker holding the archive digest
//! layers/.<image>.lock                  per-image extraction lock
//! ```
//!
//! A layer directory only ever appears by renaming a fully extracted
//! temporary sibling into place, so concurrent runs of the same image
//! either see no layer or a complete one.

use std::path::{Component, Path, PathBuf};

use corral_common::config::RuntimeConfig;
use corral_common::constants::LAYER_MARKER;
use corral_common::error::{CorralError, Result};
use corral_common::types::Sha256Hash;

/// Archive extensions probed, in order.
const ARCHIVE_EXTENSIONS: [&str; 3] = ["tar", "tar.gz", "tgz"];

/// A lower layer ready to be stacked under a container's upper layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowerLayer {
    /// Directory holding the extracted root filesystem.
    pub path: PathBuf,
    /// Digest of the archive the layer came from.
    pub digest: Sha256Hash,
    /// Whether this call performed the extraction.
    pub extracted: bool,
}

/// Manages image archives and the shared lower layers extracted from them.
#[derive(Debug, Clone)]
pub struct LayerStore {
    images_dir: PathBuf,
    layers_dir: PathBuf,
}

impl LayerStore {
    /// Creates a store over explicit archive and layer directories.
    #[must_use]
    pub fn new(images_dir: impl Into<PathBuf>, layers_dir: impl Into<PathBuf>) -> Self {
        Self {
            images_dir: images_dir.into(),
            layers_dir: layers_dir.into(),
        }
    }

    /// Creates a store using the runtime's standard layout.
    #[must_use]
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.images_dir(), config.layers_dir())
    }

    /// Returns the directory the lower layer of `image` lives in.
    #[must_use]
    pub fn layer_path(&self, image: &str) -> PathBuf {
        self.layers_dir.join(image)
    }

    /// Checks whether `image` already has a complete lower layer.
    #[must_use]
    pub fn has_layer(&self, image: &str) -> bool {
        self.layer_path(image).join(LAYER_MARKER).is_file()
    }

    /// Locates the archive for `image`.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] if no `.tar`, `.tar.gz` or `.tgz`
    /// archive exists for the image.
    pub fn archive_path(&self, image: &str) -> Result<PathBuf> {
        validate_image_name(image)?;
        ARCHIVE_EXTENSIONS
            .iter()
            .map(|ext| self.images_dir.join(format!("{image}.{ext}")))
            .find(|p| p.is_file())
            .ok_or_else(|| CorralError::NotFound {
                kind: "image",
                id: image.to_string(),
            })
    }

    /// Returns the lower layer for `image`, extracting it on first use.
    ///
    /// Extraction is serialized per image with an exclusive `flock` on
    /// `layers/.<image>.lock`. A directory left without a marker is treated
    /// as incomplete and replaced.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] for a missing archive and
    /// [`CorralError::Workspace`] if extraction fails.
    pub fn ensure_lower(&self, image: &str) -> Result<LowerLayer> {
        validate_image_name(image)?;
        let path = self.layer_path(image);

        if let Some(digest) = read_marker(&path)? {
            tracing::debug!(image, path = %path.display(), "reusing lower layer");
            return Ok(LowerLayer {
                path,
                digest,
                extracted: false,
            });
        }

        std::fs::create_dir_all(&self.layers_dir)
            .map_err(|e| CorralError::io(&self.layers_dir, e))?;
        let _lock = self.lock(image)?;

        // Another process may have finished while we waited.
        if let Some(digest) = read_marker(&path)? {
            tracing::debug!(image, "lower layer extracted concurrently");
            return Ok(LowerLayer {
                path,
                digest,
                extracted: false,
            });
        }

        let archive = self.archive_path(image)?;
        if path.exists() {
            tracing::warn!(path = %path.display(), "removing incomplete lower layer");
            std::fs::remove_dir_all(&path).map_err(|e| CorralError::io(&path, e))?;
        }

        let staging = tempfile::Builder::new()
            .prefix(&format!(".{image}.extract-"))
            .tempdir_in(&self.layers_dir)
            .map_err(|e| CorralError::io(&self.layers_dir, e))?;
        let layer = crate::layer::extract_layer(&archive, staging.path()).map_err(|e| {
            CorralError::Workspace {
                message: format!("extracting {} failed: {e}", archive.display()),
            }
        })?;

        let marker = staging.path().join(LAYER_MARKER);
        std::fs::write(&marker, format!("{}\n", layer.hash.as_hex()))
            .map_err(|e| CorralError::io(&marker, e))?;
        std::fs::rename(staging.path(), &path).map_err(|e| CorralError::io(&path, e))?;

        tracing::info!(image, path = %path.display(), digest = %layer.hash, "lower layer ready");
        Ok(LowerLayer {
            path,
            digest: layer.hash,
            extracted: true,
        })
    }

    #[cfg(target_os = "linux")]
    fn lock(&self, image: &str) -> Result<nix::fcntl::Flock<std::fs::File>> {
        use nix::fcntl::{Flock, FlockArg};

        let lock_path = self.layers_dir.join(format!(".{image}.lock"));
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| CorralError::io(&lock_path, e))?;
        Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| CorralError::io(&lock_path, std::io::Error::from(errno)))
    }

    #[cfg(not(target_os = "linux"))]
    fn lock(&self, _image: &str) -> Result<()> {
        Err(CorralError::config(
            "Linux required for native container operations",
        ))
    }
}

/// Rejects image names that are not a single plain path component.
fn validate_image_name(image: &str) -> Result<()> {
    let mut components = Path::new(image).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !image.starts_with('.') => Ok(()),
        _ => Err(CorralError::config(format!("invalid image name: {image:?}"))),
    }
}

fn read_marker(layer: &Path) -> Result<Option<Sha256Hash>> {
    let marker = layer.join(LAYER_MARKER);
    match std::fs::read_to_string(&marker) {
        Ok(contents) => Sha256Hash::from_hex(contents.trim()).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CorralError::io(&marker, e)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::layer::fixtures::{rootfs_tar, rootfs_tar_gz};

    fn store(root: &Path) -> LayerStore {
        let cfg = RuntimeConfig::with_root(root);
        std::fs::create_dir_all(cfg.images_dir()).expect("mkdir images");
        LayerStore::from_config(&cfg)
    }

    #[test]
    fn layer_path_is_named_after_image() {
        let s = LayerStore::new("/r/images", "/r/layers");
        assert_eq!(s.layer_path("busybox"), PathBuf::from("/r/layers/busybox"));
    }

    #[test]
    fn archive_path_probes_known_extensions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let s = store(dir.path());
        let _ = rootfs_tar_gz(&dir.path().join("images/alpine.tgz"));
        assert!(
            s.archive_path("alpine")
                .expect("found")
                .ends_with("images/alpine.tgz")
        );
    }

    #[test]
    fn missing_archive_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = store(dir.path()).ensure_lower("nope").expect_err("no archive");
        assert!(matches!(err, CorralError::NotFound { kind: "image", .. }));
    }

    #[test]
    fn path_like_image_names_are_rejected() {
        let s = LayerStore::new("/r/images", "/r/layers");
        for bad in ["", "..", "../etc", "a/b", ".hidden", "/abs"] {
            assert!(
                matches!(s.ensure_lower(bad), Err(CorralError::Config { .. })),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn first_use_extracts_and_later_uses_reuse() {
        let dir = tempfile::tempdir().expect("tempdir");
        let s = store(dir.path());
        let archive = rootfs_tar(&dir.path().join("images/busybox.tar"));

        let first = s.ensure_lower("busybox").expect("extract");
        assert!(first.extracted);
        assert!(first.path.join("etc/hostname").is_file());
        assert_eq!(first.digest, crate::hash::hash_file(&archive).expect("hash"));
        assert!(s.has_layer("busybox"));

        let second = s.ensure_lower("busybox").expect("reuse");
        assert!(!second.extracted);
        assert_eq!(second.path, first.path);
        assert_eq!(second.digest, first.digest);
    }

    #[test]
    fn directory_without_marker_is_replaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let s = store(dir.path());
        let _ = rootfs_tar(&dir.path().join("images/busybox.tar"));
        let partial = s.layer_path("busybox");
        std::fs::create_dir_all(partial.join("half")).expect("mkdir");

        let layer = s.ensure_lower("busybox").expect("extract");
        assert!(layer.extracted);
        assert!(!partial.join("half").exists());
        assert!(partial.join("bin/sh").is_file());
    }

    #[test]
    fn no_staging_directories_are_left_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let s = store(dir.path());
        let _ = rootfs_tar(&dir.path().join("images/busybox.tar"));
        let _ = s.ensure_lower("busybox").expect("extract");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("layers"))
            .expect("read_dir")
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".extract-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn concurrent_first_runs_extract_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let s = Arc::new(store(dir.path()));
        let _ = rootfs_tar(&dir.path().join("images/busybox.tar"));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || s.ensure_lower("busybox").expect("ensure"))
            })
            .collect();
        let layers: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .collect();

        assert_eq!(layers.iter().filter(|l| l.extracted).count(), 1);
        assert!(layers.iter().all(|l| l.path == layers[0].path));
    }
}
