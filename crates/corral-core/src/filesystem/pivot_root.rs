//! Root filesystem switching via `pivot_root(2)`.
//!
//! Unlike `chroot`, `pivot_root` changes the root mount of the whole mount
//! namespace, and once the old root is detached nothing of the host's
//! tree remains reachable.

use std::path::Path;

use corral_common::constants::PIVOT_DIR;
use corral_common::error::{CorralError, Result};

fn pivot_error(stage: &str, message: impl std::fmt::Display) -> CorralError {
    CorralError::PivotRoot {
        stage: stage.to_string(),
        message: message.to_string(),
    }
}

/// Makes `new_root` the root of the current mount namespace.
///
/// Bind-mounts `new_root` onto itself (the new root must be a mount
/// point), pivots with the old root parked in `new_root/.pivot_root`,
/// changes directory to `/`, lazily detaches the old root and removes the
/// parking directory. Any failure aborts the sequence.
///
/// The caller must already have made the namespace's mounts private.
///
/// # Errors
///
/// Returns [`CorralError::PivotRoot`] naming the step that failed.
#[cfg(target_os = "linux")]
pub fn pivot_root(new_root: &Path) -> Result<()> {
    use nix::mount::{MntFlags, MsFlags, mount, umount2};

    tracing::info!(new_root = %new_root.display(), "performing pivot_root");

    mount(
        Some(new_root),
        new_root,
        Some("bind"),
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| pivot_error("bind new root", e))?;

    let put_old = new_root.join(PIVOT_DIR);
    match std::fs::create_dir(&put_old) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(pivot_error("create old root dir", e)),
    }

    nix::unistd::pivot_root(new_root, &put_old).map_err(|e| {
        pivot_error(
            "pivot_root",
            format!(
                "new_root={} put_old={}: {e}",
                new_root.display(),
                put_old.display()
            ),
        )
    })?;

    std::env::set_current_dir("/").map_err(|e| pivot_error("chdir to new root", e))?;

    let old_root = Path::new("/").join(PIVOT_DIR);
    umount2(&old_root, MntFlags::MNT_DETACH).map_err(|e| pivot_error("detach old root", e))?;
    std::fs::remove_dir(&old_root).map_err(|e| pivot_error("remove old root dir", e))?;

    tracing::debug!("old root detached");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: `pivot_root(2)` requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn pivot_root(_new_root: &Path) -> Result<()> {
    Err(pivot_error(
        "pivot_root",
        "Linux required for native container operations",
    ))
}
