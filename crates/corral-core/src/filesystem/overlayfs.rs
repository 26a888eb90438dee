//! `OverlayFS` management for layered container filesystems.
//!
//! Stacks a shared read-only image layer under a per-container writable
//! layer, giving each container a copy-on-write view at its merge point.

use std::os::unix::fs::DirBuilderExt;
use std::path::PathBuf;

use corral_common::error::{CorralError, Result};

/// Configuration for an `OverlayFS` mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Read-only lower layers (top to bottom, as the kernel expects).
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper layer directory.
    pub upper_dir: PathBuf,
    /// Work directory required by `OverlayFS`, on the same filesystem as
    /// the upper layer.
    pub work_dir: PathBuf,
    /// Final merged mount point.
    pub merged_dir: PathBuf,
}

impl OverlayConfig {
    /// Creates the upper, work and merged directories if they are missing.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [&self.upper_dir, &self.work_dir, &self.merged_dir] {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(dir)
                .map_err(|e| CorralError::io(dir, e))?;
        }
        Ok(())
    }

    /// Renders the `mount -o` option string.
    #[must_use]
    pub fn options(&self) -> String {
        let lowers = self
            .lower_dirs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        format!(
            "lowerdir={},upperdir={},workdir={}",
            lowers,
            self.upper_dir.display(),
            self.work_dir.display()
        )
    }
}

/// Mounts an `OverlayFS` with the given configuration.
///
/// The upper, work and merged directories must already exist.
///
/// # Errors
///
/// Returns [`CorralError::Workspace`] if the mount syscall fails.
#[cfg(target_os = "linux")]
pub fn mount_overlay(config: &OverlayConfig) -> Result<()> {
    use nix::mount::{MsFlags, mount};

    let opts = config.options();
    mount(
        Some("overlay"),
        &config.merged_dir,
        Some("overlay"),
        MsFlags::empty(),
        Some(opts.as_str()),
    )
    .map_err(|e| CorralError::Workspace {
        message: format!(
            "overlay mount at {} failed: {e}",
            config.merged_dir.display()
        ),
    })?;

    tracing::info!(merged = %config.merged_dir.display(), options = %opts, "overlayfs mounted");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: `OverlayFS` mounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn mount_overlay(_config: &OverlayConfig) -> Result<()> {
    Err(CorralError::config(
        "Linux required for native container operations",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(root: &std::path::Path) -> OverlayConfig {
        OverlayConfig {
            lower_dirs: vec![root.join("lower")],
            upper_dir: root.join("c1/upper"),
            work_dir: root.join("c1/work"),
            merged_dir: root.join("c1/merged"),
        }
    }

    #[test]
    fn options_list_every_layer() {
        let cfg = sample(std::path::Path::new("/var/lib/corral"));
        assert_eq!(
            cfg.options(),
            "lowerdir=/var/lib/corral/lower,upperdir=/var/lib/corral/c1/upper,\
             workdir=/var/lib/corral/c1/work"
        );
    }

    #[test]
    fn multiple_lowers_are_colon_joined() {
        let mut cfg = sample(std::path::Path::new("/r"));
        cfg.lower_dirs.push(PathBuf::from("/r/base"));
        assert!(cfg.options().starts_with("lowerdir=/r/lower:/r/base,"));
    }

    #[test]
    fn create_dirs_makes_all_three() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = sample(dir.path());
        cfg.create_dirs().expect("create");
        assert!(cfg.upper_dir.is_dir());
        assert!(cfg.work_dir.is_dir());
        assert!(cfg.merged_dir.is_dir());
        assert!(!dir.path().join("lower").exists());
    }
}
