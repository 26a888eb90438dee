//! `corral run`: create and run a container.

use clap::Args;
use corral_common::types::ResourceConfig;
use corral_runtime::{Engine, RunOptions, RunOutcome};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct RunArgs {
    /// Keep stdin open and share the terminal (`-it`).
    #[arg(short, long)]
    pub interactive: bool,

    /// Allocate the caller's terminal to the container.
    #[arg(short, long)]
    pub tty: bool,

    /// Run in the background; output goes to the container log.
    #[arg(short, long, conflicts_with_all = ["interactive", "tty"])]
    pub detach: bool,

    /// Memory limit, e.g. `100m` or `1g`.
    #[arg(short, long, default_value = "")]
    pub memory: String,

    /// Swappiness percentage (1-100); needs a memory limit.
    #[arg(long, default_value_t = 0)]
    pub memory_swappiness: u32,

    /// Relative CPU weight.
    #[arg(long, default_value = "")]
    pub cpu_shares: String,

    /// CPUs the container may run on, e.g. `0-2,4`.
    #[arg(long, default_value = "")]
    pub cpuset: String,

    /// Bind-mount a host directory: `hostPath:containerPath`.
    #[arg(short, long)]
    pub volume: Option<String>,

    /// Extra environment variables (`KEY=VALUE`).
    #[arg(short, long = "env")]
    pub env: Vec<String>,

    /// Container name.
    #[arg(long)]
    pub name: Option<String>,

    /// Image to run.
    pub image: String,

    /// Command to run inside the container.
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    fn resources(&self) -> anyhow::Result<ResourceConfig> {
        Ok(ResourceConfig::builder()
            .memory_limit(&self.memory)
            .memory_swappiness(self.memory_swappiness)
            .cpu_shares(&self.cpu_shares)
            .cpuset_cpus(&self.cpuset)
            .build()?)
    }

    fn options(self) -> anyhow::Result<RunOptions> {
        Ok(RunOptions {
            interactive: self.interactive || self.tty,
            resources: self.resources()?,
            command: self.command,
            volume: self.volume,
            name: self.name,
            image: self.image,
            env: self.env,
        })
    }
}

/// Executes the `run` command.
///
/// Interactive containers exit the CLI with the container's exit code.
///
/// # Errors
///
/// Returns an error if the arguments are invalid or the container cannot
/// be started.
pub fn execute(engine: &Engine, args: RunArgs) -> anyhow::Result<()> {
    let options = args.options()?;
    match engine.run(&options)? {
        RunOutcome::Detached { id, .. } => {
            crate::output::line(id.as_str());
            Ok(())
        }
        RunOutcome::Exited { code, .. } => std::process::exit(code),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use crate::commands::{Cli, Command};

    fn parse(args: &[&str]) -> super::RunArgs {
        let cli = Cli::try_parse_from(args).expect("parse");
        match cli.command {
            Command::Run(args) => args,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn combined_it_flag_is_interactive() {
        let args = parse(&["corral", "run", "-it", "busybox", "/bin/sh"]);
        let opts = args.options().expect("options");
        assert!(opts.interactive);
        assert_eq!(opts.command, vec!["/bin/sh"]);
    }

    #[test]
    fn command_keeps_its_own_flags() {
        let args = parse(&["corral", "run", "-d", "-m", "100m", "busybox", "ls", "-al", "/"]);
        assert_eq!(args.command, vec!["ls", "-al", "/"]);
        let opts = args.options().expect("options");
        assert!(!opts.interactive);
        assert_eq!(opts.resources.memory_limit(), Some(100 * 1024 * 1024));
    }

    #[test]
    fn detach_conflicts_with_tty() {
        assert!(Cli::try_parse_from(["corral", "run", "-it", "-d", "busybox", "sh"]).is_err());
    }

    #[test]
    fn invalid_memory_is_rejected_before_running() {
        let args = parse(&["corral", "run", "-m", "lots", "busybox", "sh"]);
        assert!(args.options().is_err());
    }

    #[test]
    fn volume_env_and_name_are_passed_through() {
        let args = parse(&[
            "corral", "run", "-v", "/data:/mnt", "-e", "A=1", "-e", "B=2", "--name", "web",
            "busybox", "top",
        ]);
        let opts = args.options().expect("options");
        assert_eq!(opts.volume.as_deref(), Some("/data:/mnt"));
        assert_eq!(opts.env, vec!["A=1", "B=2"]);
        assert_eq!(opts.name.as_deref(), Some("web"));
    }
}
