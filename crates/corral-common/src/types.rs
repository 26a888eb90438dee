//! Domain primitive types used across the corral workspace.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::CONTAINER_ID_LEN;
use crate::error::{CorralError, Result};

/// Unique identifier for a container instance.
///
/// Keys the cgroup name, the workspace directories, and the metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a short random container ID.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(CONTAINER_ID_LEN);
        Self(id)
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 hash digest used to identify an extracted image archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Creates a hash from a hex-encoded string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 64-character hex string.
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let hex = hex.into();
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CorralError::config(format!(
                "invalid SHA-256 hex string: {hex}"
            )));
        }
        Ok(Self(hex))
    }

    /// Returns the hex-encoded hash string.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

/// Resource limits for a container's cgroup.
///
/// `None` means "do not constrain this dimension", which is distinct from
/// a limit of zero. Values are validated when the config is built, so a
/// malformed limit never reaches the kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    memory_limit: Option<u64>,
    memory_swappiness: Option<u8>,
    cpu_shares: Option<u64>,
    cpuset_cpus: Option<String>,
}

impl ResourceConfig {
    /// Starts building a config. Every dimension is unset by default.
    #[must_use]
    pub fn builder() -> ResourceConfigBuilder {
        ResourceConfigBuilder::default()
    }

    /// Memory limit in bytes.
    #[must_use]
    pub const fn memory_limit(&self) -> Option<u64> {
        self.memory_limit
    }

    /// Swappiness percentage (0-100).
    #[must_use]
    pub const fn memory_swappiness(&self) -> Option<u8> {
        self.memory_swappiness
    }

    /// Relative CPU weight.
    #[must_use]
    pub const fn cpu_shares(&self) -> Option<u64> {
        self.cpu_shares
    }

    /// CPU list such as `0-2,4`.
    #[must_use]
    pub fn cpuset_cpus(&self) -> Option<&str> {
        self.cpuset_cpus.as_deref()
    }

    /// Returns `true` when no dimension is constrained.
    #[must_use]
    pub const fn is_unconstrained(&self) -> bool {
        self.memory_limit.is_none()
            && self.memory_swappiness.is_none()
            && self.cpu_shares.is_none()
            && self.cpuset_cpus.is_none()
    }
}

/// Builder for [`ResourceConfig`] accepting the raw CLI forms.
///
/// Empty strings and a zero swappiness leave the dimension unset.
#[derive(Debug, Clone, Default)]
pub struct ResourceConfigBuilder {
    memory_limit: String,
    memory_swappiness: u32,
    cpu_shares: String,
    cpuset_cpus: String,
}

impl ResourceConfigBuilder {
    /// Memory limit such as `100m`, `1g`, `512MiB`, or a byte count.
    #[must_use]
    pub fn memory_limit(mut self, value: impl Into<String>) -> Self {
        self.memory_limit = value.into();
        self
    }

    /// Swappiness percentage; only applied together with a memory limit.
    #[must_use]
    pub const fn memory_swappiness(mut self, value: u32) -> Self {
        self.memory_swappiness = value;
        self
    }

    /// CPU shares (relative weight).
    #[must_use]
    pub fn cpu_shares(mut self, value: impl Into<String>) -> Self {
        self.cpu_shares = value.into();
        self
    }

    /// CPU list for the cpuset controller.
    #[must_use]
    pub fn cpuset_cpus(mut self, value: impl Into<String>) -> Self {
        self.cpuset_cpus = value.into();
        self
    }

    /// Validates every set dimension and builds the config.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Config`] if any value is malformed or out of
    /// range.
    pub fn build(self) -> Result<ResourceConfig> {
        let memory_limit = non_empty(&self.memory_limit)
            .map(|raw| {
                parse_memory_limit(raw)
                    .ok_or_else(|| CorralError::config(format!("invalid memory limit: {raw}")))
            })
            .transpose()?;

        let memory_swappiness = match self.memory_swappiness {
            0 => None,
            v @ 1..=100 => u8::try_from(v).ok(),
            v => {
                return Err(CorralError::config(format!(
                    "memory swappiness must be between 0 and 100, got {v}"
                )));
            }
        };

        let cpu_shares = non_empty(&self.cpu_shares)
            .map(|raw| match raw.parse::<u64>() {
                Ok(v) if v > 0 => Ok(v),
                _ => Err(CorralError::config(format!("invalid cpu shares: {raw}"))),
            })
            .transpose()?;

        let cpuset_cpus = non_empty(&self.cpuset_cpus)
            .map(|raw| {
                if is_cpu_list(raw) {
                    Ok(raw.to_string())
                } else {
                    Err(CorralError::config(format!("invalid cpuset: {raw}")))
                }
            })
            .transpose()?;

        Ok(ResourceConfig {
            memory_limit,
            memory_swappiness,
            cpu_shares,
            cpuset_cpus,
        })
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

/// Parses memory strings like `100m`, `1g`, `128MiB`, `256MB` into bytes.
///
/// Single-letter suffixes follow the kernel's binary meaning.
#[allow(clippy::option_if_let_else)]
#[must_use]
pub fn parse_memory_limit(s: &str) -> Option<u64> {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    let s = s.trim();
    let (num_str, multiplier) = if let Some(n) = s.strip_suffix("GiB") {
        (n, GIB)
    } else if let Some(n) = s.strip_suffix("GB") {
        (n, 1_000_000_000)
    } else if let Some(n) = s.strip_suffix("MiB") {
        (n, MIB)
    } else if let Some(n) = s.strip_suffix("MB") {
        (n, 1_000_000)
    } else if let Some(n) = s.strip_suffix("KiB") {
        (n, KIB)
    } else if let Some(n) = s.strip_suffix("KB") {
        (n, 1000)
    } else if let Some(n) = s.strip_suffix(['g', 'G']) {
        (n, GIB)
    } else if let Some(n) = s.strip_suffix(['m', 'M']) {
        (n, MIB)
    } else if let Some(n) = s.strip_suffix(['k', 'K']) {
        (n, KIB)
    } else {
        (s, 1)
    };
    num_str
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
}

/// Checks the kernel's cpu list syntax: `0`, `0-3`, `0-1,4,6-7`.
fn is_cpu_list(s: &str) -> bool {
    s.split(',').all(|part| match part.split_once('-') {
        Some((lo, hi)) => match (lo.parse::<u32>(), hi.parse::<u32>()) {
            (Ok(lo), Ok(hi)) => lo <= hi,
            _ => false,
        },
        None => part.parse::<u32>().is_ok(),
    })
}

/// A host directory bind-mounted into the container: `hostPath:containerPath`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Directory on the host.
    pub host: PathBuf,
    /// Absolute path inside the container.
    pub container: PathBuf,
}

impl VolumeSpec {
    /// Returns the container path relative to the container root, so it
    /// can be joined onto the merged directory.
    #[must_use]
    pub fn container_relative(&self) -> PathBuf {
        self.container
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect()
    }
}

impl FromStr for VolumeSpec {
    type Err = CorralError;

    fn from_str(spec: &str) -> Result<Self> {
        let reject = |reason: &str| CorralError::VolumeSpec {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = spec.split(':').collect();
        let [host, container] = parts.as_slice() else {
            return Err(reject("expected hostPath:containerPath"));
        };
        if host.is_empty() || container.is_empty() {
            return Err(reject("both paths must be non-empty"));
        }
        let (host, container) = (Path::new(host), Path::new(container));
        if !host.is_absolute() || !container.is_absolute() {
            return Err(reject("both paths must be absolute"));
        }
        if container
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(reject("container path must not contain '..'"));
        }
        Ok(Self {
            host: host.to_path_buf(),
            container: container.to_path_buf(),
        })
    }
}

impl fmt::Display for VolumeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host.display(), self.container.display())
    }
}

/// Lifecycle status recorded for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// The container's init process is running.
    Running,
    /// The container was stopped by a signal.
    Stopped,
    /// The container's process exited on its own.
    Exited,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Exited => write!(f, "exited"),
        }
    }
}
