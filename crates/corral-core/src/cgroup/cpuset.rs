//! CPU pinning via the cgroup v1 `cpuset` controller.
//!
//! Writes `cpuset.cpus`. A fresh cpuset group starts with empty
//! `cpuset.mems`, and the kernel refuses to attach tasks until it is
//! populated, so the parent's memory nodes are copied down.

use std::path::Path;

use corral_common::error::Result;
use corral_common::types::ResourceConfig;

use super::{Subsystem, write_limit};

/// CPU list the container may run on.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpusetSubsystem;

impl CpusetSubsystem {
    fn inherit_mems(&self, dir: &Path) -> Result<()> {
        let mems = dir.join("cpuset.mems");
        let current = std::fs::read_to_string(&mems).unwrap_or_default();
        if !current.trim().is_empty() {
            return Ok(());
        }
        let Some(parent) = dir.parent() else {
            return Ok(());
        };
        let Ok(parent_mems) = std::fs::read_to_string(parent.join("cpuset.mems")) else {
            return Ok(());
        };
        let parent_mems = parent_mems.trim();
        if parent_mems.is_empty() {
            return Ok(());
        }
        write_limit(self.name(), &mems, parent_mems)
    }
}

impl Subsystem for CpusetSubsystem {
    fn name(&self) -> &'static str {
        "cpuset"
    }

    fn is_configured(&self, config: &ResourceConfig) -> bool {
        config.cpuset_cpus().is_some()
    }

    fn write_limits(&self, dir: &Path, config: &ResourceConfig) -> Result<()> {
        if let Some(cpus) = config.cpuset_cpus() {
            write_limit(self.name(), &dir.join("cpuset.cpus"), cpus)?;
            self.inherit_mems(dir)?;
            tracing::debug!(cpus, "cpuset set");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::testutil::FakeCgroupRoot;

    #[test]
    fn cpus_written_and_mems_inherited() {
        let root = FakeCgroupRoot::new();
        let config = ResourceConfig::builder()
            .cpuset_cpus("0-1")
            .build()
            .expect("config");
        CpusetSubsystem
            .set(&root.hierarchy(), "corral-s1", &config)
            .expect("set");
        assert_eq!(root.read("cpuset", "corral-s1", "cpuset.cpus"), "0-1");
        assert_eq!(root.read("cpuset", "corral-s1", "cpuset.mems"), "0");
    }

    #[test]
    fn existing_mems_are_kept() {
        let root = FakeCgroupRoot::new();
        let dir = root.controller("cpuset").join("corral-s2");
        std::fs::create_dir(&dir).expect("mkdir");
        std::fs::write(dir.join("cpuset.mems"), "1").expect("mems");

        let config = ResourceConfig::builder()
            .cpuset_cpus("2")
            .build()
            .expect("config");
        CpusetSubsystem
            .set(&root.hierarchy(), "corral-s2", &config)
            .expect("set");
        assert_eq!(root.read("cpuset", "corral-s2", "cpuset.mems"), "1");
    }
}
