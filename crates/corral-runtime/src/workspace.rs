//! Per-container root filesystem assembly.
//!
//! ```text
//! layers/<image>/          lower, shared read-only
//! overlay/<id>/upper       writable delta
//! overlay/<id>/work        overlay scratch space
//! overlay/<id>/merged      union mount, the container's root
//! ```
//!
//! An optional volume is bind-mounted beneath `merged` once the union is
//! up, and must come down before it: the bind mount lives inside the
//! overlay mount point.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use corral_common::config::RuntimeConfig;
use corral_common::error::{CorralError, Result};
use corral_common::types::VolumeSpec;
use corral_core::filesystem::{Mounter, OverlayConfig};
use corral_image::LayerStore;

/// Builds and dismantles container workspaces.
#[derive(Debug, Clone)]
pub struct Workspace {
    config: RuntimeConfig,
    layers: LayerStore,
    mounter: Arc<dyn Mounter>,
}

impl Workspace {
    /// Creates a workspace builder over the runtime layout.
    #[must_use]
    pub fn new(config: RuntimeConfig, mounter: Arc<dyn Mounter>) -> Self {
        Self {
            layers: LayerStore::from_config(&config),
            config,
            mounter,
        }
    }

    /// Returns the overlay layout of container `id` on `image`.
    #[must_use]
    pub fn overlay(&self, id: &str, image: &str) -> OverlayConfig {
        let dir = self.config.overlay_dir(id);
        OverlayConfig {
            lower_dirs: vec![self.layers.layer_path(image)],
            upper_dir: dir.join("upper"),
            work_dir: dir.join("work"),
            merged_dir: dir.join("merged"),
        }
    }

    /// Returns the merge point that becomes container `id`'s root.
    #[must_use]
    pub fn merged_dir(&self, id: &str) -> PathBuf {
        self.config.overlay_dir(id).join("merged")
    }

    /// Assembles the workspace and returns its merge point.
    ///
    /// The volume spec is validated before anything touches the disk. A
    /// failure after the overlay is mounted unwinds what was done, so the
    /// workspace is either complete or absent.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::VolumeSpec`] for a malformed spec or missing
    /// host path, [`CorralError::NotFound`] for an unknown image, and
    /// [`CorralError::Workspace`] for extraction or mount failures.
    pub fn build(&self, id: &str, image: &str, volume: Option<&str>) -> Result<PathBuf> {
        let volume = volume.map(str::parse::<VolumeSpec>).transpose()?;
        if let Some(spec) = &volume {
            if !spec.host.exists() {
                return Err(CorralError::VolumeSpec {
                    spec: spec.to_string(),
                    reason: format!("host path {} does not exist", spec.host.display()),
                });
            }
        }

        let lower = self.layers.ensure_lower(image)?;
        tracing::debug!(image, lower = %lower.path.display(), extracted = lower.extracted, "lower layer");

        let overlay = self.overlay(id, image);
        if let Err(e) = overlay.create_dirs() {
            self.remove_dirs(id, true);
            return Err(e);
        }
        if let Err(e) = self.mounter.mount_overlay(&overlay) {
            self.remove_dirs(id, true);
            return Err(e);
        }

        if let Some(spec) = &volume {
            if let Err(e) = self.mount_volume(&overlay.merged_dir, spec) {
                let unmounted = self.unmount_logged(&overlay.merged_dir);
                self.remove_dirs(id, unmounted);
                return Err(e);
            }
        }

        tracing::info!(id, image, merged = %overlay.merged_dir.display(), "workspace built");
        Ok(overlay.merged_dir)
    }

    fn mount_volume(&self, merged: &Path, spec: &VolumeSpec) -> Result<()> {
        let target = merged.join(spec.container_relative());
        std::fs::create_dir_all(&target).map_err(|e| CorralError::Workspace {
            message: format!("creating volume target {}: {e}", target.display()),
        })?;
        self.mounter
            .bind_mount(&spec.host, &target)
            .map_err(|e| CorralError::Workspace {
                message: format!("mounting volume {spec}: {e}"),
            })?;
        tracing::info!(volume = %spec, "volume mounted");
        Ok(())
    }

    /// Dismantles container `id`'s workspace, best effort.
    ///
    /// Unmounts the volume, then the overlay, then removes the per-container
    /// directories. Every step runs even if an earlier one failed, except
    /// that `merged` is only deleted recursively once nothing is mounted
    /// beneath it. The shared lower layer is left alone.
    ///
    /// # Errors
    ///
    /// Returns the first failure after all steps have been attempted.
    pub fn teardown(&self, id: &str, volume: Option<&str>) -> Result<()> {
        let merged = self.merged_dir(id);
        let mut first_error = None;
        let mut all_unmounted = true;

        if let Some(raw) = volume {
            match raw.parse::<VolumeSpec>() {
                Ok(spec) => {
                    let target = merged.join(spec.container_relative());
                    if let Err(e) = self.mounter.unmount(&target) {
                        tracing::warn!(target = %target.display(), error = %e, "volume unmount failed");
                        all_unmounted = false;
                        let _ = first_error.get_or_insert(e);
                    }
                }
                Err(e) => tracing::warn!(volume = raw, error = %e, "ignoring unparsable volume"),
            }
        }

        if let Err(e) = self.mounter.unmount(&merged) {
            tracing::warn!(merged = %merged.display(), error = %e, "overlay unmount failed");
            all_unmounted = false;
            let _ = first_error.get_or_insert(e);
        }

        if let Err(e) = self.try_remove_dirs(id, all_unmounted) {
            let _ = first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!(id, "workspace torn down");
                Ok(())
            }
        }
    }

    fn remove_dirs(&self, id: &str, merged_is_free: bool) {
        let _ = self.try_remove_dirs(id, merged_is_free);
    }

    fn try_remove_dirs(&self, id: &str, merged_is_free: bool) -> Result<()> {
        let root = self.config.overlay_dir(id);
        let mut first_error = None;
        for dir in ["upper", "work"] {
            if let Err(e) = remove_tree(&root.join(dir)) {
                let _ = first_error.get_or_insert(e);
            }
        }

        let merged = root.join("merged");
        let merged_result = if merged_is_free {
            remove_tree(&merged)
        } else {
            // Something may still be mounted there; only an empty dir goes.
            remove_empty(&merged)
        };
        if let Err(e) = merged_result {
            let _ = first_error.get_or_insert(e);
        }
        if let Err(e) = remove_empty(&root) {
            let _ = first_error.get_or_insert(e);
        }
        first_error.map_or(Ok(()), Err)
    }

    fn unmount_logged(&self, target: &Path) -> bool {
        match self.mounter.unmount(target) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(target = %target.display(), error = %e, "unmount failed");
                false
            }
        }
    }
}

fn remove_tree(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove directory");
            Err(CorralError::io(path, e))
        }
    }
}

fn remove_empty(path: &Path) -> Result<()> {
    match std::fs::remove_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove directory");
            Err(CorralError::io(path, e))
        }
    }
}
