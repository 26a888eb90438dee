//! Unified error types for the corral workspace.
//!
//! Variants follow the lifecycle of a container: configuration errors are
//! raised before the kernel is touched, cgroup and workspace errors abort a
//! launch, and the init-side variants are fatal inside the new namespaces.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CorralError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A resource configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A volume specification could not be parsed or used.
    #[error("invalid volume spec {spec:?}: {reason}")]
    VolumeSpec {
        /// The raw specification string.
        spec: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The cgroup directory for a subsystem does not exist.
    #[error("cgroup for subsystem {subsystem} not found at {path}")]
    CgroupNotFound {
        /// Subsystem (controller) name.
        subsystem: String,
        /// Expected cgroup directory.
        path: PathBuf,
    },

    /// A subsystem limit file could not be written.
    #[error("failed to set {subsystem} limit in {file}: {source}")]
    ResourceConfig {
        /// Subsystem (controller) name.
        subsystem: String,
        /// Limit file that was being written.
        file: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A process could not be attached to a cgroup.
    #[error("failed to attach pid {pid} to {subsystem} cgroup: {source}")]
    Attach {
        /// Subsystem (controller) name.
        subsystem: String,
        /// Process that was being attached.
        pid: i32,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Building the container's layered filesystem failed.
    #[error("workspace error: {message}")]
    Workspace {
        /// Description of the failure.
        message: String,
    },

    /// A mount or unmount call failed.
    #[error("mount operation on {target} failed: {source}")]
    Mount {
        /// Mount point the operation targeted.
        target: PathBuf,
        /// Underlying errno.
        source: std::io::Error,
    },

    /// Switching the root filesystem failed inside the container.
    #[error("pivot_root failed during {stage}: {message}")]
    PivotRoot {
        /// Init stage in which the failure happened.
        stage: String,
        /// Description of the failure.
        message: String,
    },

    /// The init process received an empty command.
    #[error("no command received from parent")]
    NoCommand,

    /// The container process could not be created.
    #[error("failed to launch container process: {message}")]
    Launch {
        /// Description of the failure.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl CorralError {
    /// Builds an [`CorralError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`CorralError::Config`] from any displayable message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CorralError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cgroup_not_found_names_subsystem_and_path() {
        let err = CorralError::CgroupNotFound {
            subsystem: "memory".into(),
            path: PathBuf::from("/sys/fs/cgroup/memory/corral-abc"),
        };
        let msg = err.to_string();
        assert!(msg.contains("memory"));
        assert!(msg.contains("/sys/fs/cgroup/memory/corral-abc"));
    }

    #[test]
    fn volume_spec_error_quotes_raw_spec() {
        let err = CorralError::VolumeSpec {
            spec: "onlyonepart".into(),
            reason: "expected hostPath:containerPath".into(),
        };
        assert!(err.to_string().contains("\"onlyonepart\""));
    }
}
