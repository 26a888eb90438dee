//! Discovery of cgroup v1 hierarchy mount points.
//!
//! Each controller (memory, cpu, cpuset, ...) is mounted at its own point,
//! found by scanning the host mount table for a `cgroup` entry whose options
//! list the controller. The table is parsed once, on first use, and cached
//! for the lifetime of the [`CgroupHierarchy`].

use std::collections::HashMap;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use corral_common::constants::{CGROUP_FS_TYPE, DEFAULT_MOUNTS_TABLE};
use corral_common::error::{CorralError, Result};

/// Lazily populated `controller -> mount point` lookup table.
///
/// Shared by every subsystem of every container in the process; the first
/// lookup populates it under the mutex.
#[derive(Debug)]
pub struct CgroupHierarchy {
    mounts_table: PathBuf,
    mount_points: Mutex<Option<HashMap<String, PathBuf>>>,
}

impl CgroupHierarchy {
    /// Creates a lookup table backed by the given mount table file.
    #[must_use]
    pub fn new(mounts_table: impl Into<PathBuf>) -> Self {
        Self {
            mounts_table: mounts_table.into(),
            mount_points: Mutex::new(None),
        }
    }

    /// Creates a lookup table backed by the host's `/proc/self/mounts`.
    #[must_use]
    pub fn host() -> Self {
        Self::new(DEFAULT_MOUNTS_TABLE)
    }

    /// Returns the mount point of the hierarchy carrying `subsystem`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be read or no cgroup
    /// hierarchy carries the controller.
    pub fn mount_point(&self, subsystem: &str) -> Result<PathBuf> {
        let mut guard = self
            .mount_points
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            let content = std::fs::read_to_string(&self.mounts_table)
                .map_err(|e| CorralError::io(&self.mounts_table, e))?;
            let table = parse_mount_table(&content);
            tracing::debug!(
                table = %self.mounts_table.display(),
                controllers = table.len(),
                "cgroup mount table loaded"
            );
            *guard = Some(table);
        }
        guard
            .as_ref()
            .and_then(|table| table.get(subsystem).cloned())
            .ok_or_else(|| CorralError::CgroupNotFound {
                subsystem: subsystem.to_string(),
                path: self.mounts_table.clone(),
            })
    }

    /// Resolves `<mount point>/<cgroup>` for a subsystem.
    ///
    /// With `create` set, a missing directory is created (mode `0755`);
    /// otherwise a missing directory is a [`CorralError::CgroupNotFound`].
    ///
    /// # Errors
    ///
    /// Returns an error if the controller is not mounted, the directory is
    /// absent and `create` is false, or creation fails.
    pub fn cgroup_path(&self, subsystem: &str, cgroup: &str, create: bool) -> Result<PathBuf> {
        let path = self.mount_point(subsystem)?.join(cgroup);
        if path.is_dir() {
            return Ok(path);
        }
        if !create {
            return Err(CorralError::CgroupNotFound {
                subsystem: subsystem.to_string(),
                path,
            });
        }
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(&path)
            .map_err(|e| CorralError::io(&path, e))?;
        tracing::debug!(subsystem, path = %path.display(), "cgroup created");
        Ok(path)
    }

    /// Returns the mount table this hierarchy reads.
    #[must_use]
    pub fn mounts_table(&self) -> &Path {
        &self.mounts_table
    }
}

impl Default for CgroupHierarchy {
    fn default() -> Self {
        Self::host()
    }
}

/// Parses `/proc/mounts` lines (`source target fstype options dump pass`)
/// into a map from controller name to mount point.
///
/// The first hierarchy listing a controller wins.
fn parse_mount_table(content: &str) -> HashMap<String, PathBuf> {
    let mut table = HashMap::new();
    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let (Some(_source), Some(target), Some(fstype), Some(options)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if fstype != CGROUP_FS_TYPE {
            continue;
        }
        let target = PathBuf::from(unescape_mount_field(target));
        for option in options.split(',') {
            let _ = table
                .entry(option.to_string())
                .or_insert_with(|| target.clone());
        }
    }
    table
}

/// Decodes the octal escapes (`\040` for space, ...) the kernel uses for
/// whitespace in mount table fields.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or_default();
            if let Ok(value) = u8::from_str_radix(digits, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
tmpfs /sys/fs/cgroup tmpfs ro,nosuid,nodev,noexec,mode=755 0 0
cgroup /sys/fs/cgroup/memory cgroup rw,nosuid,nodev,noexec,relatime,memory 0 0
cgroup /sys/fs/cgroup/cpu,cpuacct cgroup rw,nosuid,nodev,noexec,relatime,cpu,cpuacct 0 0
cgroup /sys/fs/cgroup/cpuset cgroup rw,nosuid,nodev,noexec,relatime,cpuset 0 0
cgroup2 /sys/fs/cgroup/unified cgroup2 rw,nosuid,nodev,noexec,relatime 0 0
";

    #[test]
    fn parse_finds_each_controller() {
        let table = parse_mount_table(SAMPLE);
        assert_eq!(table["memory"], PathBuf::from("/sys/fs/cgroup/memory"));
        assert_eq!(table["cpu"], PathBuf::from("/sys/fs/cgroup/cpu,cpuacct"));
        assert_eq!(table["cpuacct"], PathBuf::from("/sys/fs/cgroup/cpu,cpuacct"));
        assert_eq!(table["cpuset"], PathBuf::from("/sys/fs/cgroup/cpuset"));
    }

    #[test]
    fn parse_matches_options_exactly() {
        let table = parse_mount_table(SAMPLE);
        // "cpu" must not resolve to the cpuset hierarchy.
        assert_ne!(table["cpu"], PathBuf::from("/sys/fs/cgroup/cpuset"));
        assert!(!table.contains_key("pids"));
    }

    #[test]
    fn parse_ignores_non_cgroup_entries() {
        let table = parse_mount_table(SAMPLE);
        assert!(!table.values().any(|p| p == Path::new("/sys")));
        assert!(!table.values().any(|p| p == Path::new("/sys/fs/cgroup/unified")));
    }

    #[test]
    fn parse_skips_malformed_lines() {
        let table = parse_mount_table("garbage\n\ncgroup /x cgroup\n");
        assert!(table.is_empty());
    }

    #[test]
    fn unescape_decodes_octal_space() {
        assert_eq!(unescape_mount_field("/mnt/with\\040space"), "/mnt/with space");
        assert_eq!(unescape_mount_field("/plain"), "/plain");
    }

    #[test]
    fn mount_point_is_cached_after_first_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = dir.path().join("mounts");
        std::fs::write(&table, SAMPLE).expect("write table");

        let hierarchy = CgroupHierarchy::new(&table);
        let first = hierarchy.mount_point("memory").expect("memory");

        std::fs::remove_file(&table).expect("remove table");
        let second = hierarchy.mount_point("memory").expect("cached");
        assert_eq!(first, second);
    }

    #[test]
    fn missing_controller_is_cgroup_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = dir.path().join("mounts");
        std::fs::write(&table, SAMPLE).expect("write table");

        let hierarchy = CgroupHierarchy::new(&table);
        let err = hierarchy.mount_point("pids").expect_err("pids not mounted");
        assert!(matches!(err, CorralError::CgroupNotFound { .. }));
    }

    #[test]
    fn cgroup_path_creates_only_on_request() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mem = dir.path().join("memory");
        std::fs::create_dir(&mem).expect("mkdir");
        let table = dir.path().join("mounts");
        std::fs::write(
            &table,
            format!("cgroup {} cgroup rw,memory 0 0\n", mem.display()),
        )
        .expect("write table");

        let hierarchy = CgroupHierarchy::new(&table);
        let err = hierarchy
            .cgroup_path("memory", "corral-test", false)
            .expect_err("absent");
        assert!(matches!(err, CorralError::CgroupNotFound { .. }));

        let path = hierarchy
            .cgroup_path("memory", "corral-test", true)
            .expect("create");
        assert_eq!(path, mem.join("corral-test"));
        assert!(path.is_dir());
        assert_eq!(
            hierarchy
                .cgroup_path("memory", "corral-test", false)
                .expect("exists"),
            path
        );
    }

    #[test]
    fn concurrent_first_use_sees_one_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = dir.path().join("mounts");
        std::fs::write(&table, SAMPLE).expect("write table");
        let hierarchy = std::sync::Arc::new(CgroupHierarchy::new(&table));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let h = std::sync::Arc::clone(&hierarchy);
                std::thread::spawn(move || h.mount_point("cpuset").expect("cpuset"))
            })
            .collect();
        for handle in handles {
            assert_eq!(
                handle.join().expect("join"),
                PathBuf::from("/sys/fs/cgroup/cpuset")
            );
        }
    }
}
