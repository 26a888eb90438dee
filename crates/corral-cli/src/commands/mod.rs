//! CLI command definitions and dispatch.

pub mod exec;
pub mod init;
pub mod logs;
pub mod ps;
pub mod rm;
pub mod run;
pub mod stop;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use corral_common::config::RuntimeConfig;
use corral_common::constants::{DEFAULT_ROOT, ROOT_ENV};
use corral_runtime::Engine;

/// corral: a minimal container runtime.
#[derive(Parser, Debug)]
#[command(name = "corral", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Data root holding images, layers and container state.
    #[arg(long, global = true, env = ROOT_ENV, default_value = DEFAULT_ROOT)]
    pub root: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and run a container.
    Run(run::RunArgs),
    /// Container-side init; invoked by `run`, not by users.
    #[command(hide = true)]
    Init(init::InitArgs),
    /// List containers.
    Ps(ps::PsArgs),
    /// Print a detached container's output.
    Logs(logs::LogsArgs),
    /// Execute a command inside a running container.
    Exec(exec::ExecArgs),
    /// Stop a running container.
    Stop(stop::StopArgs),
    /// Remove a container and its resources.
    Rm(rm::RmArgs),
}

impl Cli {
    fn engine(&self) -> Engine {
        let engine = Engine::new(RuntimeConfig::with_root(&self.root));
        if self.log_json {
            engine.with_init_flags(vec!["--log-json".to_string()])
        } else {
            engine
        }
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let engine = cli.engine();
    match cli.command {
        Command::Run(args) => run::execute(&engine, args),
        Command::Init(args) => init::execute(&args),
        Command::Ps(args) => ps::execute(&engine, &args),
        Command::Logs(args) => logs::execute(&engine, &args),
        Command::Exec(args) => exec::execute(&engine, &args),
        Command::Stop(args) => stop::execute(&engine, &args),
        Command::Rm(args) => rm::execute(&engine, &args),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn init_defaults_to_fourth_descriptor() {
        let cli = Cli::try_parse_from(["corral", "init"]).expect("parse");
        let Command::Init(args) = cli.command else {
            panic!("expected init");
        };
        assert_eq!(args.pipe_fd, 3);
    }

    #[test]
    fn global_flags_precede_init() {
        let cli = Cli::try_parse_from(["corral", "--log-json", "init", "--pipe-fd", "5"])
            .expect("parse");
        assert!(cli.log_json);
        assert!(matches!(cli.command, Command::Init(ref a) if a.pipe_fd == 5));
    }
}
