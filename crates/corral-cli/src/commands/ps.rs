//! `corral ps`: list containers.

use clap::Args;
use corral_common::types::ContainerStatus;
use corral_runtime::Engine;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Show all containers (including stopped and exited).
    #[arg(short, long)]
    pub all: bool,
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the container records cannot be read.
pub fn execute(engine: &Engine, args: &PsArgs) -> anyhow::Result<()> {
    let records: Vec<_> = engine
        .list()?
        .into_iter()
        .filter(|r| args.all || r.status == ContainerStatus::Running)
        .collect();

    if records.is_empty() {
        crate::output::line("No containers found.");
        return Ok(());
    }
    crate::output::line(crate::output::container_table(&records).trim_end());
    Ok(())
}
