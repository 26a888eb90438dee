//! Process launch into fresh namespaces.
//!
//! The container's init is the current executable re-invoked as
//! `<exe> init --pipe-fd <n>`, cloned straight into new UTS, PID, mount,
//! network and IPC namespaces. Preparation and start are separate steps:
//! [`launch`] builds everything the child needs and the handoff pipe,
//! [`ContainerProcess::spawn`] performs the clone.
//!
//! Between `clone(2)` and `execve(2)` the child only makes raw syscalls on
//! buffers prepared beforehand; it never allocates.

use std::ffi::{CString, OsString};
use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use corral_common::config::RuntimeConfig;
use corral_common::constants::{APP_NAME, INIT_ARG};
use corral_common::error::{CorralError, Result};
use corral_common::types::ContainerId;
use corral_core::namespace::NamespaceConfig;

/// Stack handed to the cloned child; it only needs enough to reach `execve`.
const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Child exit code when descriptor or directory setup fails.
const EXIT_SETUP_FAILED: isize = 126;
/// Child exit code when `execve` returns.
const EXIT_EXEC_FAILED: isize = 127;

/// Executable the child re-invokes to become init.
const SELF_EXE: &str = "/proc/self/exe";

fn launch_error(message: impl std::fmt::Display) -> CorralError {
    CorralError::Launch {
        message: message.to_string(),
    }
}

/// Everything needed to start one container's init.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Container the process belongs to.
    pub container_id: ContainerId,
    /// Share the launcher's terminal instead of writing to the log file.
    pub interactive: bool,
    /// Workspace merge point; becomes the child's working directory.
    pub merged_dir: PathBuf,
    /// `KEY=VALUE` pairs appended to the inherited environment.
    pub env: Vec<String>,
    /// Namespaces to create.
    pub namespaces: NamespaceConfig,
    /// Descriptor slot the pipe's read end occupies in the child.
    pub pipe_fd: RawFd,
    /// Extra global arguments placed before `init` (e.g. `--log-json`).
    pub init_flags: Vec<String>,
}

/// Streams of a detached container.
#[derive(Debug)]
struct DetachedStdio {
    stdin: File,
    log: File,
}

/// A prepared, not yet started, container init process.
#[derive(Debug)]
pub struct ContainerProcess {
    container_id: ContainerId,
    argv: Vec<CString>,
    envp: Vec<CString>,
    cwd: CString,
    namespaces: NamespaceConfig,
    pipe_fd: RawFd,
    pipe_read: Option<OwnedFd>,
    stdio: Option<DetachedStdio>,
    pid: Option<i32>,
}

/// Prepares a container init process and its handoff pipe.
///
/// Returns the unstarted process and the pipe's write end; the command is
/// written there once the process has been spawned and constrained.
///
/// # Errors
///
/// Returns [`CorralError::Launch`] if the pipe cannot be created or an
/// argument contains a NUL byte, and an I/O error if the detached log file
/// cannot be created.
pub fn launch(config: &RuntimeConfig, spec: &LaunchConfig) -> Result<(ContainerProcess, File)> {
    let (pipe_read, pipe_write) = nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
        .map_err(|e| launch_error(format!("creating handoff pipe: {e}")))?;

    let stdio = if spec.interactive {
        None
    } else {
        let log = crate::logs::create_log_file(config, spec.container_id.as_str())?;
        let stdin = File::open("/dev/null").map_err(|e| CorralError::io("/dev/null", e))?;
        Some(DetachedStdio { stdin, log })
    };

    let process = ContainerProcess {
        container_id: spec.container_id.clone(),
        argv: init_argv(&spec.init_flags, spec.pipe_fd)?,
        envp: child_env(&spec.env)?,
        cwd: path_cstring(&spec.merged_dir)?,
        namespaces: spec.namespaces,
        pipe_fd: spec.pipe_fd,
        pipe_read: Some(pipe_read),
        stdio,
        pid: None,
    };
    tracing::debug!(
        id = %spec.container_id,
        interactive = spec.interactive,
        cwd = %spec.merged_dir.display(),
        "container process prepared"
    );
    Ok((process, File::from(pipe_write)))
}

fn cstring(value: impl Into<Vec<u8>>) -> Result<CString> {
    CString::new(value).map_err(|e| launch_error(format!("argument contains NUL: {e}")))
}

fn path_cstring(path: &Path) -> Result<CString> {
    cstring(path.as_os_str().to_os_string().into_vec())
}

fn init_argv(init_flags: &[String], pipe_fd: RawFd) -> Result<Vec<CString>> {
    let argv0 = std::env::args_os()
        .next()
        .unwrap_or_else(|| OsString::from(APP_NAME));
    let mut argv = vec![cstring(argv0.into_vec())?];
    for flag in init_flags {
        argv.push(cstring(flag.as_str())?);
    }
    argv.push(cstring(INIT_ARG)?);
    argv.push(cstring("--pipe-fd")?);
    argv.push(cstring(pipe_fd.to_string())?);
    Ok(argv)
}

fn child_env(extra: &[String]) -> Result<Vec<CString>> {
    let mut envp = Vec::new();
    for (key, value) in std::env::vars_os() {
        let mut entry = key.into_vec();
        entry.push(b'=');
        entry.extend(value.into_vec());
        // An inherited variable with an embedded NUL cannot be passed on.
        if let Ok(entry) = CString::new(entry) {
            envp.push(entry);
        }
    }
    for entry in extra {
        envp.push(cstring(entry.as_str())?);
    }
    Ok(envp)
}

/// Writes the space-joined command into the handoff pipe and closes it.
///
/// # Errors
///
/// Returns [`CorralError::Launch`] if the child closed its end early.
pub fn send_command(mut pipe: File, command: &[String]) -> Result<()> {
    let line = command.join(" ");
    tracing::info!(command = %line, "sending command to init");
    pipe.write_all(line.as_bytes())
        .map_err(|e| launch_error(format!("writing command to init: {e}")))
}

impl ContainerProcess {
    /// Host PID of the started process.
    #[must_use]
    pub const fn pid(&self) -> Option<i32> {
        self.pid
    }

    /// Container the process belongs to.
    #[must_use]
    pub const fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    /// Argument vector init will be started with.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        self.argv
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

/// Pointers the child dereferences after `clone(2)`.
#[cfg(target_os = "linux")]
struct ChildSetup {
    exe: *const libc::c_char,
    argv: *const *const libc::c_char,
    envp: *const *const libc::c_char,
    cwd: *const libc::c_char,
    read_fd: RawFd,
    slot: RawFd,
    stdin_fd: Option<RawFd>,
    log_fd: Option<RawFd>,
}

#[cfg(target_os = "linux")]
fn child_main(s: &ChildSetup) -> isize {
    // SAFETY: only async-signal-safe syscalls on descriptors and
    // NUL-terminated buffers owned by the parent's copy of the address
    // space, which outlives this call.
    unsafe {
        if let Some(log) = s.log_fd {
            if libc::dup2(log, libc::STDOUT_FILENO) < 0 || libc::dup2(log, libc::STDERR_FILENO) < 0
            {
                return EXIT_SETUP_FAILED;
            }
        }
        if let Some(stdin) = s.stdin_fd {
            if libc::dup2(stdin, libc::STDIN_FILENO) < 0 {
                return EXIT_SETUP_FAILED;
            }
        }
        // dup2 onto itself keeps FD_CLOEXEC, so clear it by hand.
        let placed = if s.read_fd == s.slot {
            libc::fcntl(s.slot, libc::F_SETFD, 0)
        } else {
            libc::dup2(s.read_fd, s.slot)
        };
        if placed < 0 || libc::chdir(s.cwd) < 0 {
            return EXIT_SETUP_FAILED;
        }
        let _ = libc::execve(s.exe, s.argv, s.envp);
    }
    EXIT_EXEC_FAILED
}

#[cfg(target_os = "linux")]
fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

#[cfg(target_os = "linux")]
impl ContainerProcess {
    /// Clones the child into its namespaces and starts init.
    ///
    /// The child blocks reading the pipe until the command is sent.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Launch`] if the process was already spawned
    /// or `clone(2)` fails.
    pub fn spawn(&mut self) -> Result<i32> {
        use nix::sched::clone;

        let Some(pipe_read) = self.pipe_read.take() else {
            return Err(launch_error("container process already spawned"));
        };
        let exe = cstring(SELF_EXE)?;
        let argv = null_terminated(&self.argv);
        let envp = null_terminated(&self.envp);
        let setup = ChildSetup {
            exe: exe.as_ptr(),
            argv: argv.as_ptr(),
            envp: envp.as_ptr(),
            cwd: self.cwd.as_ptr(),
            read_fd: pipe_read.as_raw_fd(),
            slot: self.pipe_fd,
            stdin_fd: self.stdio.as_ref().map(|s| s.stdin.as_raw_fd()),
            log_fd: self.stdio.as_ref().map(|s| s.log.as_raw_fd()),
        };

        let mut stack = vec![0_u8; CHILD_STACK_SIZE];
        let flags = self.namespaces.clone_flags();
        // SAFETY: without CLONE_VM the child runs on a private copy of the
        // address space and only calls `child_main`, which does not
        // allocate or take locks.
        let pid = unsafe {
            clone(
                Box::new(|| child_main(&setup)),
                &mut stack,
                flags,
                Some(libc::SIGCHLD),
            )
        }
        .map_err(|e| launch_error(format!("clone failed: {e}")))?;

        // The child holds its own copies now.
        drop(pipe_read);
        self.stdio = None;

        let pid = pid.as_raw();
        self.pid = Some(pid);
        tracing::info!(id = %self.container_id, pid, ?flags, "container process cloned");
        Ok(pid)
    }

    /// Blocks until the process exits.
    ///
    /// Returns its exit code, or `128 + signal` if it was killed.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Launch`] if the process was never spawned or
    /// cannot be waited for.
    pub fn wait(&mut self) -> Result<i32> {
        use nix::errno::Errno;
        use nix::sys::wait::{WaitStatus, waitpid};
        use nix::unistd::Pid;

        let pid = self
            .pid
            .ok_or_else(|| launch_error("container process not spawned"))?;
        loop {
            match waitpid(Pid::from_raw(pid), None) {
                Ok(WaitStatus::Exited(_, code)) => {
                    tracing::info!(id = %self.container_id, pid, code, "container exited");
                    return Ok(code);
                }
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    tracing::info!(id = %self.container_id, pid, %signal, "container killed");
                    return Ok(128 + signal as i32);
                }
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => return Err(launch_error(format!("waiting for {pid}: {e}"))),
            }
        }
    }

    /// Kills the process with `SIGKILL` and reaps it. Best effort.
    pub fn kill(&mut self) {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else { return };
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGKILL) {
            tracing::warn!(pid, error = %e, "failed to kill container process");
            return;
        }
        let _ = self.wait();
    }
}

#[cfg(not(target_os = "linux"))]
impl ContainerProcess {
    /// Stub for non-Linux platforms.
    ///
    /// # Errors
    ///
    /// Always returns an error: namespaces require Linux.
    pub fn spawn(&mut self) -> Result<i32> {
        Err(launch_error("Linux required for native container operations"))
    }

    /// Stub for non-Linux platforms.
    ///
    /// # Errors
    ///
    /// Always returns an error: namespaces require Linux.
    pub fn wait(&mut self) -> Result<i32> {
        Err(launch_error("Linux required for native container operations"))
    }

    /// Stub for non-Linux platforms.
    pub const fn kill(&mut self) {}
}
