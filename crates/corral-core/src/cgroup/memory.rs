//! Memory resource control via the cgroup v1 `memory` controller.
//!
//! Manages `memory.limit_in_bytes` and `memory.swappiness`.

use std::path::Path;

use corral_common::error::Result;
use corral_common::types::ResourceConfig;

use super::{Subsystem, write_limit};

/// Hard memory limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemorySubsystem;

impl Subsystem for MemorySubsystem {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_configured(&self, config: &ResourceConfig) -> bool {
        config.memory_limit().is_some()
    }

    fn write_limits(&self, dir: &Path, config: &ResourceConfig) -> Result<()> {
        if let Some(bytes) = config.memory_limit() {
            write_limit(self.name(), &dir.join("memory.limit_in_bytes"), &bytes.to_string())?;
            tracing::debug!(bytes, "memory limit set");
        }
        Ok(())
    }
}

/// Swap tendency of the memory cgroup.
///
/// Lives in the memory hierarchy and only applies on top of a memory
/// limit: a swappiness without a limit leaves the cgroup untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemorySwapSubsystem;

impl Subsystem for MemorySwapSubsystem {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_configured(&self, config: &ResourceConfig) -> bool {
        config.memory_limit().is_some() && config.memory_swappiness().is_some()
    }

    fn write_limits(&self, dir: &Path, config: &ResourceConfig) -> Result<()> {
        if let Some(swappiness) = config.memory_swappiness() {
            write_limit(self.name(), &dir.join("memory.swappiness"), &swappiness.to_string())?;
            tracing::debug!(swappiness, "memory swappiness set");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::testutil::FakeCgroupRoot;

    #[test]
    fn empty_memory_limit_is_a_noop() {
        let root = FakeCgroupRoot::new();
        let hierarchy = root.hierarchy();
        let config = ResourceConfig::builder()
            .memory_swappiness(30)
            .cpu_shares("100")
            .build()
            .expect("config");

        MemorySubsystem.set(&hierarchy, "corral-m1", &config).expect("set");
        MemorySwapSubsystem.set(&hierarchy, "corral-m1", &config).expect("set");
        assert!(!root.exists("memory", "corral-m1"));
    }

    #[test]
    fn limit_is_written_in_bytes() {
        let root = FakeCgroupRoot::new();
        let hierarchy = root.hierarchy();
        let config = ResourceConfig::builder()
            .memory_limit("100m")
            .build()
            .expect("config");

        MemorySubsystem.set(&hierarchy, "corral-m2", &config).expect("set");
        assert_eq!(
            root.read("memory", "corral-m2", "memory.limit_in_bytes"),
            (100 * 1024 * 1024).to_string()
        );
    }

    #[test]
    fn zero_swappiness_counts_as_unset() {
        let root = FakeCgroupRoot::new();
        let config = ResourceConfig::builder()
            .memory_limit("64m")
            .memory_swappiness(0)
            .build()
            .expect("config");

        MemorySwapSubsystem
            .set(&root.hierarchy(), "corral-m3", &config)
            .expect("set");
        assert!(!root.exists("memory", "corral-m3"));
    }

    #[test]
    fn swappiness_needs_a_memory_limit() {
        let root = FakeCgroupRoot::new();
        let hierarchy = root.hierarchy();
        let config = ResourceConfig::builder()
            .memory_swappiness(25)
            .build()
            .expect("config");

        MemorySwapSubsystem.set(&hierarchy, "corral-m5", &config).expect("set");
        assert!(!root.exists("memory", "corral-m5"));

        let config = ResourceConfig::builder()
            .memory_limit("64m")
            .memory_swappiness(25)
            .build()
            .expect("config");
        MemorySwapSubsystem.set(&hierarchy, "corral-m5", &config).expect("set");
        assert_eq!(root.read("memory", "corral-m5", "memory.swappiness"), "25");
    }

    #[test]
    fn both_variants_share_one_directory() {
        let root = FakeCgroupRoot::new();
        let hierarchy = root.hierarchy();
        let config = ResourceConfig::builder()
            .memory_limit("1g")
            .memory_swappiness(60)
            .build()
            .expect("config");

        MemorySubsystem.set(&hierarchy, "corral-m4", &config).expect("set");
        MemorySwapSubsystem.set(&hierarchy, "corral-m4", &config).expect("set");
        MemorySubsystem.remove(&hierarchy, "corral-m4").expect("remove");
        MemorySwapSubsystem
            .remove(&hierarchy, "corral-m4")
            .expect("second remove sees it gone");
        assert!(!root.exists("memory", "corral-m4"));
    }
}
