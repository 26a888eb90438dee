//! `corral exec`: execute a command inside a running container.

use clap::Args;
use corral_runtime::Engine;

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Container ID.
    pub container: String,

    /// Command to execute.
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command, exiting with the command's exit code.
///
/// # Errors
///
/// Returns an error if the container is not running or namespace joining fails.
pub fn execute(engine: &Engine, args: &ExecArgs) -> anyhow::Result<()> {
    let code = engine.exec(&args.container, &args.command)?;
    std::process::exit(code);
}
