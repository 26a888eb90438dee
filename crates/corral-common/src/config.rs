//! Runtime configuration: where corral keeps images, layers, and state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;

/// Root configuration for the corral runtime.
///
/// Every on-disk location is derived from `root`, so tests can point a
/// whole runtime at a temporary directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Base directory for corral state and data.
    pub root: PathBuf,
    /// Mount table scanned for cgroup hierarchies.
    pub mounts_table: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(constants::DEFAULT_ROOT),
            mounts_table: PathBuf::from(constants::DEFAULT_MOUNTS_TABLE),
        }
    }
}

impl RuntimeConfig {
    /// Creates a configuration rooted at `root`.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Resolves the configuration from `CORRAL_ROOT`, falling back to
    /// `/var/lib/corral`.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var_os(constants::ROOT_ENV)
            .filter(|v| !v.is_empty())
            .map_or_else(Self::default, Self::with_root)
    }

    /// Directory holding image archives.
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    /// Directory holding extracted, shared lower layers.
    #[must_use]
    pub fn layers_dir(&self) -> PathBuf {
        self.root.join("layers")
    }

    /// Per-container overlay directory (`upper`, `work`, `merged`).
    #[must_use]
    pub fn overlay_dir(&self, container_id: &str) -> PathBuf {
        self.root.join("overlay").join(container_id)
    }

    /// Per-container metadata directory.
    #[must_use]
    pub fn container_dir(&self, container_id: &str) -> PathBuf {
        self.root.join("containers").join(container_id)
    }

    /// Root of all metadata directories.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.root.join("containers")
    }

    /// Log file receiving a detached container's stdout and stderr.
    #[must_use]
    pub fn log_file(&self, container_id: &str) -> PathBuf {
        self.container_dir(container_id)
            .join(format!("{container_id}-json.log"))
    }

    /// Returns the data root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}
