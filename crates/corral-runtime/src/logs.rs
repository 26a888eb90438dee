//! Container log files.
//!
//! A detached container's stdout and stderr both land in
//! `containers/<id>/<id>-json.log`; interactive containers have no log.

use std::fs::File;

use corral_common::config::RuntimeConfig;
use corral_common::error::{CorralError, Result};

/// Creates (truncating) the log file for container `id`.
///
/// # Errors
///
/// Returns an error if the metadata directory or file cannot be created.
pub fn create_log_file(config: &RuntimeConfig, id: &str) -> Result<File> {
    let dir = config.container_dir(id);
    std::fs::create_dir_all(&dir).map_err(|e| CorralError::io(&dir, e))?;
    let path = config.log_file(id);
    let file = File::create(&path).map_err(|e| CorralError::io(&path, e))?;
    tracing::debug!(id, path = %path.display(), "log file created");
    Ok(file)
}

/// Reads a container's log.
///
/// Returns an empty string if the log file does not exist yet.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_logs(config: &RuntimeConfig, id: &str) -> Result<String> {
    let path = config.log_file(id);
    match std::fs::read(&path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(CorralError::io(&path, e)),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn read_logs_missing_file_returns_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = RuntimeConfig::with_root(dir.path());
        assert!(read_logs(&cfg, "nonexistent").expect("read").is_empty());
    }

    #[test]
    fn written_output_is_read_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = RuntimeConfig::with_root(dir.path());
        let mut file = create_log_file(&cfg, "c1").expect("create");
        writeln!(file, "line one").expect("write");
        writeln!(file, "line two").expect("write");

        assert_eq!(read_logs(&cfg, "c1").expect("read"), "line one\nline two\n");
    }

    #[test]
    fn create_truncates_previous_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = RuntimeConfig::with_root(dir.path());
        let mut file = create_log_file(&cfg, "c1").expect("create");
        writeln!(file, "stale").expect("write");
        drop(file);

        let _ = create_log_file(&cfg, "c1").expect("recreate");
        assert!(read_logs(&cfg, "c1").expect("read").is_empty());
    }

    #[test]
    fn separate_containers_have_separate_logs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = RuntimeConfig::with_root(dir.path());
        writeln!(create_log_file(&cfg, "a").expect("a"), "from a").expect("write");
        writeln!(create_log_file(&cfg, "b").expect("b"), "from b").expect("write");

        let a_logs = read_logs(&cfg, "a").expect("read a");
        assert!(a_logs.contains("from a"));
        assert!(!a_logs.contains("from b"));
    }
}
