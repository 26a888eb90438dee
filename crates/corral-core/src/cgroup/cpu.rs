//! CPU resource control via the cgroup v1 `cpu` controller.
//!
//! Manages `cpu.shares`, the relative CPU weight under contention.

use std::path::Path;

use corral_common::error::Result;
use corral_common::types::ResourceConfig;

use super::{Subsystem, write_limit};

/// Relative CPU weight.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuSubsystem;

impl Subsystem for CpuSubsystem {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn is_configured(&self, config: &ResourceConfig) -> bool {
        config.cpu_shares().is_some()
    }

    fn write_limits(&self, dir: &Path, config: &ResourceConfig) -> Result<()> {
        if let Some(shares) = config.cpu_shares() {
            write_limit(self.name(), &dir.join("cpu.shares"), &shares.to_string())?;
            tracing::debug!(shares, "CPU shares set");
        }
        Ok(())
    }
}
