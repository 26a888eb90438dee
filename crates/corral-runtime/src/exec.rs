//! Namespace joining for executing commands in running containers.

use corral_common::error::{CorralError, Result};

/// Runs `command` inside the namespaces of the process `pid`.
///
/// Uses `nsenter` to enter the target's mount, UTS, IPC, network and PID
/// namespaces. Standard streams are inherited so interactive shells work.
/// Returns the command's exit code, or `128 + signal` if it was killed.
///
/// # Errors
///
/// Returns an error if the command is empty or `nsenter` cannot be started.
#[cfg(target_os = "linux")]
pub fn exec_in_container(pid: i32, command: &[String]) -> Result<i32> {
    use std::os::unix::process::ExitStatusExt;

    if command.is_empty() {
        return Err(CorralError::config("exec command is empty"));
    }
    tracing::info!(pid, cmd = ?command, "exec into container");

    let status = std::process::Command::new("nsenter")
        .args(nsenter_args(pid))
        .args(command)
        .status()
        .map_err(|e| CorralError::io("nsenter", e))?;

    Ok(status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(-1))
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn exec_in_container(_pid: i32, _command: &[String]) -> Result<i32> {
    Err(CorralError::config(
        "Linux required for native container operations",
    ))
}

fn nsenter_args(pid: i32) -> Vec<String> {
    [
        "--target",
        &pid.to_string(),
        "--mount",
        "--uts",
        "--ipc",
        "--net",
        "--pid",
        "--",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nsenter_enters_all_five_namespaces() {
        let args = nsenter_args(99);
        assert_eq!(&args[..2], ["--target", "99"]);
        for ns in ["--mount", "--uts", "--ipc", "--net", "--pid"] {
            assert!(args.iter().any(|a| a == ns), "missing {ns}");
        }
        assert_eq!(args.last().map(String::as_str), Some("--"));
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(
            exec_in_container(1, &[]),
            Err(CorralError::Config { .. })
        ));
    }
}
