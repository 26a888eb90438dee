//! In-namespace init: the receiving side of the command handoff.
//!
//! Runs as the first code inside the new namespaces. It reads the command
//! from the inherited pipe, makes the mount namespace private, pivots into
//! the workspace, mounts `/proc` and `/dev`, then replaces itself with the
//! user's program. Every failure is fatal: there is no partial state to
//! continue from.

use std::convert::Infallible;
use std::ffi::CString;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::os::fd::{FromRawFd, RawFd};
use std::os::unix::ffi::OsStringExt;

use corral_common::error::{CorralError, Result};
use corral_core::filesystem::{mount, pivot_root};

/// Progress of init through the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    /// Waiting for the command on the pipe.
    Handshaking,
    /// Mount propagation detached from the host.
    NamespacePrivate,
    /// Root switched to the workspace.
    RootPivoted,
    /// `/proc` and `/dev` mounted.
    PseudoFsMounted,
    /// About to become the user's program.
    Running,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Handshaking => "handshaking",
            Self::NamespacePrivate => "namespace-private",
            Self::RootPivoted => "root-pivoted",
            Self::PseudoFsMounted => "pseudo-fs-mounted",
            Self::Running => "running",
        };
        f.write_str(name)
    }
}

fn enter(stage: InitStage) {
    tracing::info!(%stage, "init stage");
}

/// Splits a command line on single spaces.
///
/// Arguments containing spaces cannot be expressed; consecutive spaces
/// yield empty arguments.
#[must_use]
pub fn split_command(line: &str) -> Vec<String> {
    line.split(' ').map(String::from).collect()
}

/// Reads the whole command from `reader` until end of stream.
///
/// # Errors
///
/// Returns [`CorralError::NoCommand`] if nothing was sent, or an I/O error
/// if the read fails.
pub fn read_command(mut reader: impl Read) -> Result<Vec<String>> {
    let mut buf = Vec::new();
    let _ = reader
        .read_to_end(&mut buf)
        .map_err(|e| CorralError::io("<handoff pipe>", e))?;
    if buf.is_empty() {
        return Err(CorralError::NoCommand);
    }
    Ok(split_command(&String::from_utf8_lossy(&buf)))
}

/// Takes ownership of the pipe at `fd` and reads the command from it.
///
/// # Errors
///
/// See [`read_command`].
pub fn read_command_fd(fd: RawFd) -> Result<Vec<String>> {
    // SAFETY: F_GETFD only inspects the descriptor table.
    if unsafe { libc::fcntl(fd, libc::F_GETFD) } < 0 {
        return Err(CorralError::io(
            format!("/proc/self/fd/{fd}"),
            std::io::Error::last_os_error(),
        ));
    }
    // SAFETY: the launcher placed the pipe's read end at `fd` and nothing
    // else in this process refers to it.
    let pipe = unsafe { File::from_raw_fd(fd) };
    read_command(pipe)
}

/// Runs the init sequence and execs the user's program.
///
/// Only returns on failure.
///
/// # Errors
///
/// Returns [`CorralError::NoCommand`] for an empty handoff,
/// [`CorralError::PivotRoot`] or [`CorralError::Mount`] if the filesystem
/// cannot be finalized, [`CorralError::NotFound`] if the program is not on
/// the container's `PATH`, and [`CorralError::Launch`] if `execve` fails.
pub fn run_container_init(pipe_fd: RawFd) -> Result<Infallible> {
    enter(InitStage::Handshaking);
    let argv = read_command_fd(pipe_fd)?;
    tracing::info!(command = ?argv, "command received");

    mount::make_rprivate()?;
    enter(InitStage::NamespacePrivate);

    let root = std::env::current_dir().map_err(|e| CorralError::PivotRoot {
        stage: InitStage::NamespacePrivate.to_string(),
        message: format!("reading working directory: {e}"),
    })?;
    pivot_root::pivot_root(&root)?;
    enter(InitStage::RootPivoted);

    mount::mount_proc()?;
    mount::mount_dev()?;
    enter(InitStage::PseudoFsMounted);

    let program = which::which(&argv[0]).map_err(|e| CorralError::NotFound {
        kind: "executable",
        id: format!("{}: {e}", argv[0]),
    })?;
    tracing::info!(path = %program.display(), "resolved program");

    let path = CString::new(program.into_os_string().into_vec())
        .map_err(|e| exec_error(&argv[0], e))?;
    let args = argv
        .iter()
        .map(|a| CString::new(a.as_bytes()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| exec_error(&argv[0], e))?;
    let env = std::env::vars_os()
        .filter_map(|(k, v)| {
            let mut entry = k.into_vec();
            entry.push(b'=');
            entry.extend(v.into_vec());
            CString::new(entry).ok()
        })
        .collect::<Vec<_>>();

    enter(InitStage::Running);
    exec(&path, &args, &env).map_err(|e| exec_error(&argv[0], e))
}

fn exec_error(program: &str, e: impl fmt::Display) -> CorralError {
    CorralError::Launch {
        message: format!("exec {program}: {e}"),
    }
}

#[cfg(target_os = "linux")]
fn exec(path: &CString, args: &[CString], env: &[CString]) -> nix::Result<Infallible> {
    nix::unistd::execve(path, args, env)
}

#[cfg(not(target_os = "linux"))]
fn exec(_path: &CString, _args: &[CString], _env: &[CString]) -> nix::Result<Infallible> {
    Err(nix::errno::Errno::ENOSYS)
}
