//! `corral stop`: stop running containers.

use clap::Args;
use corral_runtime::Engine;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container IDs to stop.
    #[arg(required = true)]
    pub containers: Vec<String>,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns the first container that could not be stopped.
pub fn execute(engine: &Engine, args: &StopArgs) -> anyhow::Result<()> {
    for id in &args.containers {
        engine.stop(id)?;
        crate::output::line(id);
    }
    Ok(())
}
