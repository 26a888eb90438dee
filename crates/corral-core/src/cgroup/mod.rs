//! Cgroup v1 resource management.
//!
//! One [`Subsystem`] per controller writes its limit files and attaches
//! processes; [`CgroupManager`] fans a container's configuration out over
//! every registered subsystem and tears them down together.
//!
//! Subsystems are stateless. All state lives in the cgroup virtual
//! filesystem under `<controller mount point>/<cgroup name>`.

pub mod cpu;
pub mod cpuset;
pub mod hierarchy;
pub mod memory;

use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use corral_common::constants::CGROUP_PREFIX;
use corral_common::error::{CorralError, Result};
use corral_common::types::ResourceConfig;

pub use hierarchy::CgroupHierarchy;

/// Task-attachment file of a cgroup v1 directory.
pub const TASKS_FILE: &str = "tasks";

/// A single cgroup controller.
///
/// Implementors only describe which part of a [`ResourceConfig`] they care
/// about and how to write it; `set`, `apply` and `remove` are shared.
pub trait Subsystem: fmt::Debug + Send + Sync {
    /// Controller name, used for mount point discovery.
    fn name(&self) -> &'static str;

    /// Whether `config` constrains this subsystem at all.
    fn is_configured(&self, config: &ResourceConfig) -> bool;

    /// Writes this subsystem's limit files into an existing cgroup directory.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::ResourceConfig`] if a limit file cannot be
    /// written.
    fn write_limits(&self, dir: &Path, config: &ResourceConfig) -> Result<()>;

    /// Creates the cgroup if needed and writes its limits.
    ///
    /// A no-op when `config` leaves this subsystem unconstrained.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller is not mounted, the directory
    /// cannot be created, or a limit file cannot be written.
    fn set(&self, hierarchy: &CgroupHierarchy, cgroup: &str, config: &ResourceConfig) -> Result<()> {
        if !self.is_configured(config) {
            return Ok(());
        }
        let dir = hierarchy.cgroup_path(self.name(), cgroup, true)?;
        self.write_limits(&dir, config)?;
        tracing::debug!(subsystem = self.name(), cgroup, "limits written");
        Ok(())
    }

    /// Moves `pid` (and its future children) into the cgroup.
    ///
    /// A no-op when `config` leaves this subsystem unconstrained, since
    /// `set` never created a directory for it.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::CgroupNotFound`] if the cgroup does not exist
    /// or [`CorralError::Attach`] if the kernel rejects the pid.
    fn apply(
        &self,
        hierarchy: &CgroupHierarchy,
        cgroup: &str,
        pid: i32,
        config: &ResourceConfig,
    ) -> Result<()> {
        if !self.is_configured(config) {
            return Ok(());
        }
        let dir = hierarchy.cgroup_path(self.name(), cgroup, false)?;
        std::fs::write(dir.join(TASKS_FILE), pid.to_string()).map_err(|e| {
            CorralError::Attach {
                subsystem: self.name().to_string(),
                pid,
                source: e,
            }
        })?;
        tracing::debug!(subsystem = self.name(), cgroup, pid, "process attached");
        Ok(())
    }

    /// Deletes the cgroup directory. An already removed cgroup is success.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed,
    /// typically because a process is still attached.
    fn remove(&self, hierarchy: &CgroupHierarchy, cgroup: &str) -> Result<()> {
        let dir = match hierarchy.cgroup_path(self.name(), cgroup, false) {
            Ok(dir) => dir,
            Err(CorralError::CgroupNotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        remove_cgroup_dir(&dir)?;
        tracing::debug!(subsystem = self.name(), cgroup, "cgroup removed");
        Ok(())
    }
}

/// Writes a single limit value, mapping failures to
/// [`CorralError::ResourceConfig`].
pub(crate) fn write_limit(subsystem: &str, file: &Path, value: &str) -> Result<()> {
    std::fs::write(file, value).map_err(|e| CorralError::ResourceConfig {
        subsystem: subsystem.to_string(),
        file: file.to_path_buf(),
        source: e,
    })
}

/// Removes a cgroup directory.
///
/// On cgroupfs a plain `rmdir` succeeds although the control files appear
/// as entries; anywhere else the directory holds real files and is removed
/// recursively.
fn remove_cgroup_dir(dir: &Path) -> Result<()> {
    match std::fs::remove_dir(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => {
            std::fs::remove_dir_all(dir).map_err(|e| CorralError::io(dir, e))
        }
        Err(e) => Err(CorralError::io(dir, e)),
    }
}

/// Returns the default subsystem set in the order they are configured.
#[must_use]
pub fn default_subsystems() -> Vec<Box<dyn Subsystem>> {
    vec![
        Box::new(memory::MemorySubsystem),
        Box::new(memory::MemorySwapSubsystem),
        Box::new(cpu::CpuSubsystem),
        Box::new(cpuset::CpusetSubsystem),
    ]
}

/// Handle to the cgroups of a single container.
#[derive(Debug)]
pub struct CgroupManager {
    /// Cgroup name, resolved per subsystem under its mount point.
    path: String,
    hierarchy: Arc<CgroupHierarchy>,
    subsystems: Vec<Box<dyn Subsystem>>,
}

impl CgroupManager {
    /// Creates a manager for `path` over the default subsystem set.
    #[must_use]
    pub fn new(path: impl Into<String>, hierarchy: Arc<CgroupHierarchy>) -> Self {
        Self::with_subsystems(path, hierarchy, default_subsystems())
    }

    /// Creates a manager named after a container id (`corral-<id>`).
    #[must_use]
    pub fn for_container(container_id: &str, hierarchy: Arc<CgroupHierarchy>) -> Self {
        Self::new(format!("{CGROUP_PREFIX}-{container_id}"), hierarchy)
    }

    /// Creates a manager over an explicit, ordered subsystem list.
    #[must_use]
    pub fn with_subsystems(
        path: impl Into<String>,
        hierarchy: Arc<CgroupHierarchy>,
        subsystems: Vec<Box<dyn Subsystem>>,
    ) -> Self {
        Self {
            path: path.into(),
            hierarchy,
            subsystems,
        }
    }

    /// Writes `config` through every subsystem, in order.
    ///
    /// # Errors
    ///
    /// Returns the first subsystem error; later subsystems are not touched.
    pub fn set(&self, config: &ResourceConfig) -> Result<()> {
        for subsystem in &self.subsystems {
            subsystem.set(&self.hierarchy, &self.path, config)?;
        }
        tracing::info!(cgroup = %self.path, "cgroup limits set");
        Ok(())
    }

    /// Attaches `pid` through every subsystem, in order.
    ///
    /// # Errors
    ///
    /// Returns the first subsystem error; later subsystems are not touched.
    pub fn apply(&self, pid: i32, config: &ResourceConfig) -> Result<()> {
        for subsystem in &self.subsystems {
            subsystem.apply(&self.hierarchy, &self.path, pid, config)?;
        }
        tracing::info!(cgroup = %self.path, pid, "process attached to cgroup");
        Ok(())
    }

    /// Removes the cgroup from every subsystem.
    ///
    /// Every subsystem is attempted even if an earlier one fails. Safe to
    /// call repeatedly and on a manager whose `set` never ran.
    ///
    /// # Errors
    ///
    /// Returns the first failure after all subsystems have been attempted.
    pub fn destroy(&self) -> Result<()> {
        let mut first_error = None;
        for subsystem in &self.subsystems {
            if let Err(e) = subsystem.remove(&self.hierarchy, &self.path) {
                tracing::warn!(
                    subsystem = subsystem.name(),
                    cgroup = %self.path,
                    error = %e,
                    "failed to remove cgroup"
                );
                let _ = first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!(cgroup = %self.path, "cgroup destroyed");
                Ok(())
            }
        }
    }

    /// Returns the cgroup name.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}
