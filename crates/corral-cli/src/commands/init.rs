//! `corral init`: container-side half of the launch handshake.

use clap::Args;
use corral_common::constants::DEFAULT_PIPE_FD;

/// Arguments for the hidden `init` command.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Descriptor the command pipe was inherited on.
    #[arg(long, default_value_t = DEFAULT_PIPE_FD)]
    pub pipe_fd: i32,
}

/// Executes the `init` command.
///
/// On success the process image is replaced and this never returns.
///
/// # Errors
///
/// Returns the init failure; the container then exits.
pub fn execute(args: &InitArgs) -> anyhow::Result<()> {
    tracing::info!(pipe_fd = args.pipe_fd, "container init starting");
    match corral_runtime::init::run_container_init(args.pipe_fd) {
        Ok(never) => match never {},
        Err(e) => {
            tracing::error!(error = %e, "container init failed");
            Err(e.into())
        }
    }
}
