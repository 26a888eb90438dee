//! System-wide constants and default paths.

/// Default base directory for corral state and data.
pub const DEFAULT_ROOT: &str = "/var/lib/corral";

/// Environment variable overriding the data root.
pub const ROOT_ENV: &str = "CORRAL_ROOT";

/// Host mount table scanned for cgroup v1 hierarchies.
pub const DEFAULT_MOUNTS_TABLE: &str = "/proc/self/mounts";

/// Filesystem type of cgroup v1 hierarchies in the mount table.
pub const CGROUP_FS_TYPE: &str = "cgroup";

/// Prefix of every cgroup directory created for a container.
pub const CGROUP_PREFIX: &str = "corral";

/// First argument that makes the binary act as the in-namespace init.
pub const INIT_ARG: &str = "init";

/// Descriptor slot the handoff pipe occupies in the child: the first one
/// after stdin, stdout and stderr.
pub const DEFAULT_PIPE_FD: i32 = 3;

/// Number of hex characters in a generated container id.
pub const CONTAINER_ID_LEN: usize = 10;

/// Name of the per-container metadata record file.
pub const RECORD_FILE: &str = "config.json";

/// Marker written last into a fully extracted lower layer.
pub const LAYER_MARKER: &str = ".corral-layer";

/// Directory under the new root that temporarily holds the old root.
pub const PIVOT_DIR: &str = ".pivot_root";

/// Application name used in CLI output.
pub const APP_NAME: &str = "corral";
