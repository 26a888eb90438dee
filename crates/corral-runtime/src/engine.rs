//! Runtime engine that orchestrates container lifecycle.
//!
//! A run is one sequential pipeline: workspace, clone, cgroup limits and
//! attachment, metadata record, command handoff, and for interactive
//! containers a blocking wait followed by cleanup. Anything failing after
//! the clone rolls the whole container back.

use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use corral_common::config::RuntimeConfig;
use corral_common::constants::DEFAULT_PIPE_FD;
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, ContainerStatus, ResourceConfig};
use corral_core::cgroup::{CgroupHierarchy, CgroupManager};
use corral_core::filesystem::{HostMounter, Mounter};
use corral_core::namespace::NamespaceConfig;

use crate::process::{self, ContainerProcess, LaunchConfig};
use crate::state::{ContainerRecord, RecordStore};
use crate::workspace::Workspace;

const STOP_GRACE: Duration = Duration::from_secs(10);
const KILL_GRACE: Duration = Duration::from_secs(5);
const EXIT_POLL: Duration = Duration::from_millis(20);

/// Parameters of a single `run`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Share the caller's terminal and wait for the container to exit.
    pub interactive: bool,
    /// Command and arguments to run inside the container.
    pub command: Vec<String>,
    /// Resource limits.
    pub resources: ResourceConfig,
    /// Optional `hostPath:containerPath` volume.
    pub volume: Option<String>,
    /// Container name; defaults to the generated id.
    pub name: Option<String>,
    /// Image providing the lower layer.
    pub image: String,
    /// `KEY=VALUE` pairs added to the container's environment.
    pub env: Vec<String>,
}

/// How a run ended from the caller's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Interactive container ran to completion and was cleaned up.
    Exited {
        /// Container identifier.
        id: ContainerId,
        /// Exit code, or `128 + signal`.
        code: i32,
    },
    /// Detached container left running in the background.
    Detached {
        /// Container identifier.
        id: ContainerId,
        /// Host PID of its init.
        pid: i32,
    },
}

/// The runtime engine that coordinates all container operations.
#[derive(Debug, Clone)]
pub struct Engine {
    config: RuntimeConfig,
    hierarchy: Arc<CgroupHierarchy>,
    workspace: Workspace,
    records: RecordStore,
    namespaces: NamespaceConfig,
    pipe_fd: RawFd,
    init_flags: Vec<String>,
}

impl Engine {
    /// Creates an engine acting on the host's mounts and cgroups.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        let hierarchy = Arc::new(CgroupHierarchy::new(&config.mounts_table));
        Self::with_parts(config, hierarchy, Arc::new(HostMounter))
    }

    /// Creates an engine over an explicit cgroup hierarchy and mounter.
    #[must_use]
    pub fn with_parts(
        config: RuntimeConfig,
        hierarchy: Arc<CgroupHierarchy>,
        mounter: Arc<dyn Mounter>,
    ) -> Self {
        Self {
            workspace: Workspace::new(config.clone(), mounter),
            records: RecordStore::new(config.clone()),
            config,
            hierarchy,
            namespaces: NamespaceConfig::default(),
            pipe_fd: DEFAULT_PIPE_FD,
            init_flags: Vec::new(),
        }
    }

    /// Uses `fd` as the handoff descriptor slot in the child.
    #[must_use]
    pub const fn with_pipe_fd(mut self, fd: RawFd) -> Self {
        self.pipe_fd = fd;
        self
    }

    /// Passes global flags such as `--log-json` on to the child's init.
    #[must_use]
    pub fn with_init_flags(mut self, flags: Vec<String>) -> Self {
        self.init_flags = flags;
        self
    }

    /// Runs a container.
    ///
    /// # Errors
    ///
    /// Returns the first setup error. By then the container has been rolled
    /// back: no child left running, no cgroup, no workspace, no record.
    pub fn run(&self, opts: &RunOptions) -> Result<RunOutcome> {
        if opts.command.is_empty() {
            return Err(CorralError::NoCommand);
        }
        let id = ContainerId::generate();
        let name = opts.name.clone().unwrap_or_else(|| id.to_string());
        tracing::info!(id = %id, name, image = %opts.image, "running container");

        let merged = self
            .workspace
            .build(id.as_str(), &opts.image, opts.volume.as_deref())?;

        let launch = LaunchConfig {
            container_id: id.clone(),
            interactive: opts.interactive,
            merged_dir: merged,
            env: opts.env.clone(),
            namespaces: self.namespaces,
            pipe_fd: self.pipe_fd,
            init_flags: self.init_flags.clone(),
        };
        let cgroup = CgroupManager::for_container(id.as_str(), Arc::clone(&self.hierarchy));

        let (mut child, pipe) = match process::launch(&self.config, &launch) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.rollback(&id, None, &cgroup, opts.volume.as_deref());
                return Err(e);
            }
        };
        let pid = match child.spawn() {
            Ok(pid) => pid,
            Err(e) => {
                self.rollback(&id, None, &cgroup, opts.volume.as_deref());
                return Err(e);
            }
        };

        let started = cgroup
            .set(&opts.resources)
            .and_then(|()| cgroup.apply(pid, &opts.resources))
            .and_then(|()| {
                self.records.save(&ContainerRecord::running(
                    pid,
                    id.clone(),
                    name,
                    &opts.command,
                    opts.volume.clone(),
                    opts.image.clone(),
                ))
            })
            .and_then(|()| process::send_command(pipe, &opts.command));
        if let Err(e) = started {
            tracing::error!(id = %id, error = %e, "container setup failed, rolling back");
            self.rollback(&id, Some(&mut child), &cgroup, opts.volume.as_deref());
            return Err(e);
        }

        if !opts.interactive {
            tracing::info!(id = %id, pid, "container detached");
            return Ok(RunOutcome::Detached { id, pid });
        }

        let code = child.wait();
        self.cleanup(&id, &cgroup, opts.volume.as_deref());
        Ok(RunOutcome::Exited { id, code: code? })
    }

    fn rollback(
        &self,
        id: &ContainerId,
        child: Option<&mut ContainerProcess>,
        cgroup: &CgroupManager,
        volume: Option<&str>,
    ) {
        if let Some(child) = child {
            child.kill();
        }
        self.cleanup(id, cgroup, volume);
    }

    /// Best-effort removal of everything a container owns.
    fn cleanup(&self, id: &ContainerId, cgroup: &CgroupManager, volume: Option<&str>) {
        if let Err(e) = cgroup.destroy() {
            tracing::warn!(id = %id, error = %e, "cgroup cleanup incomplete");
        }
        if let Err(e) = self.workspace.teardown(id.as_str(), volume) {
            tracing::warn!(id = %id, error = %e, "workspace cleanup incomplete");
        }
        if let Err(e) = self.records.delete(id.as_str()) {
            tracing::warn!(id = %id, error = %e, "record cleanup incomplete");
        }
    }

    /// Lists all containers, marking running ones whose process is gone as
    /// exited.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be read.
    pub fn list(&self) -> Result<Vec<ContainerRecord>> {
        let mut records = self.records.list()?;
        for record in &mut records {
            if record.status == ContainerStatus::Running && !process_alive(record.pid) {
                record.status = ContainerStatus::Exited;
                if let Err(e) = self.records.save(record) {
                    tracing::warn!(id = %record.id, error = %e, "failed to persist exit");
                }
            }
        }
        Ok(records)
    }

    /// Returns the log of container `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] for an unknown container.
    pub fn logs(&self, id: &str) -> Result<String> {
        let _ = self.records.load(id)?;
        crate::logs::read_logs(&self.config, id)
    }

    /// Stops container `id` and records it as stopped.
    ///
    /// Sends `SIGTERM` and waits up to ten seconds; an init that ignores
    /// it (PID 1 of a namespace drops signals it has no handler for) is
    /// then killed with `SIGKILL`.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] for an unknown container, or an
    /// error if the process cannot be signalled or outlives `SIGKILL`.
    pub fn stop(&self, id: &str) -> Result<()> {
        let record = self.records.load(id)?;
        if !process_alive(record.pid) {
            if record.status == ContainerStatus::Running {
                let _ = self.records.update_status(id, ContainerStatus::Exited)?;
            }
            tracing::info!(id, status = %record.status, "container not running");
            return Ok(());
        }
        signal(record.pid, Termination::Graceful)?;
        if !wait_for_exit(record.pid, STOP_GRACE) {
            tracing::warn!(id, pid = record.pid, "container ignored SIGTERM, killing");
            kill_and_wait(record.pid)?;
        }
        let _ = self.records.update_status(id, ContainerStatus::Stopped)?;
        tracing::info!(id, pid = record.pid, "container stopped");
        Ok(())
    }

    /// Removes container `id`: cgroup, workspace and record.
    ///
    /// Liveness is checked on the process itself, whatever the record
    /// says. With `force` a live container is killed and reaped first.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Config`] if the container's process is alive
    /// and `force` is not set, [`CorralError::NotFound`] if it does not
    /// exist.
    pub fn remove(&self, id: &str, force: bool) -> Result<()> {
        let record = self.records.load(id)?;
        if process_alive(record.pid) {
            if !force {
                return Err(CorralError::config(format!(
                    "container {id} is running; stop it first or use --force"
                )));
            }
            kill_and_wait(record.pid)?;
        }
        let cgroup = CgroupManager::for_container(id, Arc::clone(&self.hierarchy));
        self.cleanup(&record.id, &cgroup, record.volume.as_deref());
        tracing::info!(id, "container removed");
        Ok(())
    }

    /// Runs `command` inside running container `id`; returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Config`] if the container is not running.
    pub fn exec(&self, id: &str, command: &[String]) -> Result<i32> {
        let record = self.records.load(id)?;
        if record.status != ContainerStatus::Running || !process_alive(record.pid) {
            return Err(CorralError::config(format!("container {id} is not running")));
        }
        crate::exec::exec_in_container(record.pid, command)
    }

    /// Returns the runtime configuration.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    pid > 0 && kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(target_os = "linux"))]
const fn process_alive(_pid: i32) -> bool {
    false
}

/// How hard to ask a container to go away.
#[derive(Debug, Clone, Copy)]
enum Termination {
    Graceful,
    Kill,
}

#[cfg(target_os = "linux")]
fn signal(pid: i32, how: Termination) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let sig = match how {
        Termination::Graceful => Signal::SIGTERM,
        Termination::Kill => Signal::SIGKILL,
    };
    match kill(Pid::from_raw(pid), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(CorralError::io(
            format!("/proc/{pid}"),
            std::io::Error::from(e),
        )),
    }
}

#[cfg(not(target_os = "linux"))]
fn signal(_pid: i32, _how: Termination) -> Result<()> {
    Err(CorralError::config(
        "Linux required for native container operations",
    ))
}

/// Polls until `pid` is gone; `false` if it is still alive at `timeout`.
fn wait_for_exit(pid: i32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while process_alive(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(EXIT_POLL);
    }
    true
}

fn kill_and_wait(pid: i32) -> Result<()> {
    signal(pid, Termination::Kill)?;
    if wait_for_exit(pid, KILL_GRACE) {
        tracing::debug!(pid, "process killed");
        Ok(())
    } else {
        Err(CorralError::config(format!(
            "process {pid} still alive after SIGKILL"
        )))
    }
}
