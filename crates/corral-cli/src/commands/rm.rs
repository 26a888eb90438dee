//! `corral rm`: remove containers and their resources.

use clap::Args;
use corral_runtime::Engine;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container IDs to remove.
    #[arg(required = true)]
    pub containers: Vec<String>,

    /// Stop running containers before removing them.
    #[arg(short, long)]
    pub force: bool,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns the first container that could not be removed.
pub fn execute(engine: &Engine, args: &RmArgs) -> anyhow::Result<()> {
    for id in &args.containers {
        engine.remove(id, args.force)?;
        crate::output::line(id);
    }
    Ok(())
}
