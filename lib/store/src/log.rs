//! Execution log documents stored under the log directory.
//!
//! File names are `{task_id}_{YYYYMMDDTHHMMSSZ}_{execution_id}.md`. Listings
//! are ordered by the embedded timestamp, oldest first.

use crate::error::StoreError;
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use taskward_audit::{AuditError, ExecutionLog, LogSink};
use taskward_core::TaskId;
use tokio::fs;

const LOG_EXTENSION: &str = ".md";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// A stored log document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// File name inside the log directory.
    pub name: String,
    /// Full path.
    pub path: PathBuf,
    /// Task the log belongs to.
    pub task_id: String,
}

/// Returns the file name for a log.
#[must_use]
pub fn log_file_name(log: &ExecutionLog) -> String {
    format!(
        "{}_{}_{}{LOG_EXTENSION}",
        log.task_id(),
        log.timestamp().format(TIMESTAMP_FORMAT),
        log.execution_id()
    )
}

/// Splits a log file name into its task id and timestamp.
fn name_parts(name: &str) -> Option<(&str, &str)> {
    let stem = name.strip_suffix(LOG_EXTENSION)?;
    // `{task}_{timestamp}_exec_{ulid}`; the task id may itself contain `_`.
    let mut parts = stem.rsplitn(4, '_');
    let _ulid = parts.next()?;
    (parts.next()? == "exec").then_some(())?;
    let timestamp = parts.next()?;
    let task = parts.next().filter(|task| !task.is_empty())?;
    Some((task, timestamp))
}

fn task_of(name: &str) -> Option<&str> {
    name_parts(name).map(|(task, _)| task)
}

/// Directory of execution log documents.
#[derive(Debug, Clone)]
pub struct FileLogStore {
    dir: PathBuf,
}

impl FileLogStore {
    /// Creates a store over `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The log directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes a document under `name`, replacing the target atomically.
    async fn write(&self, name: &str, document: &str) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, &e))?;
        let path = self.dir.join(name);
        let partial = self.dir.join(format!(".{name}.partial"));
        fs::write(&partial, document)
            .await
            .map_err(|e| StoreError::io(&partial, &e))?;
        fs::rename(&partial, &path)
            .await
            .map_err(|e| StoreError::io(&path, &e))?;
        Ok(path)
    }

    /// Lists stored logs, oldest first, optionally for one task.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub async fn list_logs(
        &self,
        task_id: Option<&TaskId>,
    ) -> Result<Vec<LogEntry>, Report<StoreError>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.dir, &e).into()),
        };

        let mut logs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.dir, &e))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(task) = task_of(&name) else {
                continue;
            };
            if task_id.is_some_and(|id| id.as_str() != task) {
                continue;
            }
            logs.push(LogEntry {
                task_id: task.to_string(),
                path: entry.path(),
                name,
            });
        }
        logs.sort_by_cached_key(|entry| {
            let timestamp = name_parts(&entry.name).map(|(_, ts)| ts.to_string());
            (timestamp, entry.name.clone())
        });
        Ok(logs)
    }

    /// Reads a log document by file name.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a plain log file name or the file
    /// cannot be read.
    pub async fn read_log(&self, name: &str) -> Result<String, Report<StoreError>> {
        if name.contains(['/', '\\']) || name.starts_with('.') || task_of(name).is_none() {
            return Err(StoreError::InvalidLogName {
                name: name.to_string(),
            }
            .into());
        }
        let path = self.dir.join(name);
        Ok(fs::read_to_string(&path)
            .await
            .map_err(|e| StoreError::io(&path, &e))?)
    }
}

#[async_trait]
impl LogSink for FileLogStore {
    async fn persist(&self, log: &ExecutionLog, document: &str) -> Result<PathBuf, AuditError> {
        self.write(&log_file_name(log), document)
            .await
            .map_err(|e| AuditError::PersistFailed {
                reason: e.to_string(),
            })
    }
}
