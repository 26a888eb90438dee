//! Mount utilities for container filesystem setup.
//!
//! Host-side operations (overlay, volume bind mounts, unmounts) go through
//! the [`Mounter`] trait so workspace logic can be exercised without
//! privileges. The in-namespace helpers (`make_rprivate`, `mount_proc`,
//! `mount_dev`) are plain functions: they only ever run inside init.

use std::fmt;
use std::path::Path;

use corral_common::error::{CorralError, Result};

use super::overlayfs::{self, OverlayConfig};

/// Host mount operations needed to assemble and dismantle a workspace.
pub trait Mounter: fmt::Debug + Send + Sync {
    /// Mounts an overlay filesystem described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails.
    fn mount_overlay(&self, config: &OverlayConfig) -> Result<()>;

    /// Bind-mounts `source` onto `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails.
    fn bind_mount(&self, source: &Path, target: &Path) -> Result<()>;

    /// Unmounts whatever is mounted at `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount fails.
    fn unmount(&self, target: &Path) -> Result<()>;
}

/// [`Mounter`] backed by real `mount(2)` / `umount2(2)` calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostMounter;

impl Mounter for HostMounter {
    fn mount_overlay(&self, config: &OverlayConfig) -> Result<()> {
        overlayfs::mount_overlay(config)
    }

    fn bind_mount(&self, source: &Path, target: &Path) -> Result<()> {
        bind_mount(source, target)
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        unmount(target)
    }
}

#[cfg(target_os = "linux")]
fn mount_error(target: &Path, errno: nix::errno::Errno) -> CorralError {
    CorralError::Mount {
        target: target.to_path_buf(),
        source: std::io::Error::from(errno),
    }
}

/// Creates a recursive bind mount from `source` to `target`.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
#[cfg(target_os = "linux")]
pub fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    use nix::mount::{MsFlags, mount};

    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| mount_error(target, e))?;
    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        "bind mount created"
    );
    Ok(())
}

/// Unmounts `target`.
///
/// # Errors
///
/// Returns an error if the `umount2(2)` syscall fails.
#[cfg(target_os = "linux")]
pub fn unmount(target: &Path) -> Result<()> {
    nix::mount::umount2(target, nix::mount::MntFlags::empty())
        .map_err(|e| mount_error(target, e))?;
    tracing::debug!(target = %target.display(), "unmounted");
    Ok(())
}

/// Makes every mount in the current namespace private, recursively.
///
/// Must run before any other mount change inside a fresh mount namespace;
/// otherwise shared propagation leaks those changes back to the host and
/// `pivot_root(2)` fails with `EINVAL`.
///
/// # Errors
///
/// Returns an error if the remount fails.
#[cfg(target_os = "linux")]
pub fn make_rprivate() -> Result<()> {
    use nix::mount::{MsFlags, mount};

    let root = Path::new("/");
    mount(
        None::<&str>,
        root,
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| mount_error(root, e))?;
    tracing::debug!("root mount made rprivate");
    Ok(())
}

/// Mounts a fresh `proc` at `/proc` with `nosuid,noexec,nodev`.
///
/// # Errors
///
/// Returns an error if the mount point cannot be created or the mount fails.
#[cfg(target_os = "linux")]
pub fn mount_proc() -> Result<()> {
    use nix::mount::{MsFlags, mount};

    let target = Path::new("/proc");
    std::fs::create_dir_all(target).map_err(|e| CorralError::io(target, e))?;
    mount(
        Some("proc"),
        target,
        Some("proc"),
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        None::<&str>,
    )
    .map_err(|e| mount_error(target, e))?;
    tracing::debug!("/proc mounted");
    Ok(())
}

/// Mounts a `tmpfs` at `/dev` with mode `755`.
///
/// # Errors
///
/// Returns an error if the mount point cannot be created or the mount fails.
#[cfg(target_os = "linux")]
pub fn mount_dev() -> Result<()> {
    use nix::mount::{MsFlags, mount};

    let target = Path::new("/dev");
    std::fs::create_dir_all(target).map_err(|e| CorralError::io(target, e))?;
    mount(
        Some("tmpfs"),
        target,
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=755"),
    )
    .map_err(|e| mount_error(target, e))?;
    tracing::debug!("/dev mounted");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn linux_required() -> CorralError {
    CorralError::config("Linux required for native container operations")
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: mounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn bind_mount(_source: &Path, _target: &Path) -> Result<()> {
    Err(linux_required())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: unmounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn unmount(_target: &Path) -> Result<()> {
    Err(linux_required())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: mount propagation requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn make_rprivate() -> Result<()> {
    Err(linux_required())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: `procfs` requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn mount_proc() -> Result<()> {
    Err(linux_required())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: mounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn mount_dev() -> Result<()> {
    Err(linux_required())
}
