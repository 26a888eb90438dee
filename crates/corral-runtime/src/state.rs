//! Persistent container records.
//!
//! Each container owns `containers/<id>/config.json`, written once after
//! the clone and read back by `ps`, `stop`, `rm`, `exec` and `logs`. There
//! is no daemon; the records are the only shared view of what is running.

use std::path::PathBuf;

use corral_common::config::RuntimeConfig;
use corral_common::constants::RECORD_FILE;
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, ContainerStatus};
use serde::{Deserialize, Serialize};

/// Metadata recorded for one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    /// Host PID of the container's init process.
    pub pid: i32,
    /// Container identifier.
    pub id: ContainerId,
    /// Human-readable name; defaults to the id.
    pub name: String,
    /// Command line handed to init, space-joined.
    pub command: String,
    /// Local creation time, `YYYY-MM-DD HH:MM:SS`.
    pub created_time: String,
    /// Current lifecycle status.
    pub status: ContainerStatus,
    /// Raw `hostPath:containerPath` volume spec, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    /// Image the lower layer was taken from.
    pub image: String,
}

impl ContainerRecord {
    /// Creates a running record stamped with the current local time.
    #[must_use]
    pub fn running(
        pid: i32,
        id: ContainerId,
        name: String,
        command: &[String],
        volume: Option<String>,
        image: String,
    ) -> Self {
        Self {
            pid,
            id,
            name,
            command: command.join(" "),
            created_time: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            status: ContainerStatus::Running,
            volume,
            image,
        }
    }
}

/// JSON record store keyed by container id.
#[derive(Debug, Clone)]
pub struct RecordStore {
    config: RuntimeConfig,
}

impl RecordStore {
    /// Creates a store rooted at the runtime's `containers/` directory.
    #[must_use]
    pub const fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.config.container_dir(id).join(RECORD_FILE)
    }

    /// Writes `record`, replacing any previous version atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, record: &ContainerRecord) -> Result<()> {
        let dir = self.config.container_dir(record.id.as_str());
        std::fs::create_dir_all(&dir).map_err(|e| CorralError::io(&dir, e))?;

        let path = self.record_path(record.id.as_str());
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(record)?;
        std::fs::write(&tmp, json).map_err(|e| CorralError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| CorralError::io(&path, e))?;
        tracing::debug!(id = %record.id, status = %record.status, "container record saved");
        Ok(())
    }

    /// Loads the record of container `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] if no record exists.
    pub fn load(&self, id: &str) -> Result<ContainerRecord> {
        let path = self.record_path(id);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CorralError::NotFound {
                    kind: "container",
                    id: id.to_string(),
                });
            }
            Err(e) => return Err(CorralError::io(&path, e)),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    /// Lists every readable record, oldest first.
    ///
    /// Unreadable records are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the containers directory cannot be listed.
    pub fn list(&self) -> Result<Vec<ContainerRecord>> {
        let dir = self.config.containers_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CorralError::io(&dir, e)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CorralError::io(&dir, e))?;
            let id = entry.file_name().to_string_lossy().into_owned();
            match self.load(&id) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(id, error = %e, "skipping unreadable container record"),
            }
        }
        records.sort_by(|a, b| a.created_time.cmp(&b.created_time));
        Ok(records)
    }

    /// Rewrites the status of container `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be loaded or saved.
    pub fn update_status(&self, id: &str, status: ContainerStatus) -> Result<ContainerRecord> {
        let mut record = self.load(id)?;
        record.status = status;
        self.save(&record)?;
        Ok(record)
    }

    /// Deletes the container's metadata directory, log file included.
    ///
    /// Deleting a missing record succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn delete(&self, id: &str) -> Result<()> {
        let dir = self.config.container_dir(id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!(id, "container record deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CorralError::io(&dir, e)),
        }
    }
}
