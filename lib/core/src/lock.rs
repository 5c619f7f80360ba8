//! Per-task execution lock.
//!
//! An execution holds `<locks_dir>/<task_id>.lock` for as long as it runs.
//! The registrar refuses to re-register a task whose lock is live, so a
//! trigger is never replaced underneath a running execution. A lock older
//! than the caller's staleness bound is treated as abandoned.

use crate::error::LockError;
use crate::id::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Contents of a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Process id of the holder.
    pub pid: u32,
    /// When the lock was taken.
    pub started_at: DateTime<Utc>,
}

impl LockInfo {
    /// Returns whether the lock is older than `stale_after`.
    #[must_use]
    pub fn is_stale(&self, stale_after: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.started_at);
        age.to_std().is_ok_and(|age| age > stale_after)
    }
}

/// Returns the lock file path for a task.
#[must_use]
pub fn lock_path(locks_dir: &Path, task_id: &TaskId) -> PathBuf {
    locks_dir.join(format!("{task_id}.lock"))
}

/// Reads the lock of a task, if one exists.
///
/// # Errors
///
/// Returns an error if the lock file exists but cannot be read. A lock
/// file with unparseable contents is reported as held since the last
/// modification time.
pub fn read_lock(locks_dir: &Path, task_id: &TaskId) -> Result<Option<LockInfo>, LockError> {
    let path = lock_path(locks_dir, task_id);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(&path, &e)),
    };
    match serde_json::from_str(&contents) {
        Ok(info) => Ok(Some(info)),
        Err(_) => {
            let started_at = fs::metadata(&path)
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            Ok(Some(LockInfo { pid: 0, started_at }))
        }
    }
}

/// Returns whether a live (non-stale) lock exists for the task.
///
/// # Errors
///
/// Returns an error if the lock file cannot be read.
pub fn is_held(
    locks_dir: &Path,
    task_id: &TaskId,
    stale_after: Duration,
) -> Result<bool, LockError> {
    Ok(read_lock(locks_dir, task_id)?.is_some_and(|info| !info.is_stale(stale_after)))
}

/// Guard over a held execution lock. The lock file is removed on drop.
#[derive(Debug)]
pub struct ExecutionLock {
    path: PathBuf,
    task_id: TaskId,
}

impl ExecutionLock {
    /// Takes the lock for a task.
    ///
    /// A stale lock is replaced.
    ///
    /// # Errors
    ///
    /// Returns `LockError::Held` if a live lock exists, or an I/O error.
    pub fn acquire(
        locks_dir: &Path,
        task_id: &TaskId,
        stale_after: Duration,
    ) -> Result<Self, LockError> {
        fs::create_dir_all(locks_dir).map_err(|e| io_error(locks_dir, &e))?;
        let path = lock_path(locks_dir, task_id);

        match Self::create(&path, task_id) {
            Err(LockError::Held { .. }) => {
                if is_held(locks_dir, task_id, stale_after)? {
                    return Err(LockError::Held {
                        task_id: task_id.to_string(),
                    });
                }
                tracing::warn!(task_id = %task_id, "replacing stale execution lock");
                fs::remove_file(&path).map_err(|e| io_error(&path, &e))?;
                Self::create(&path, task_id)
            }
            other => other,
        }
    }

    fn create(path: &Path, task_id: &TaskId) -> Result<Self, LockError> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(LockError::Held {
                    task_id: task_id.to_string(),
                });
            }
            Err(e) => return Err(io_error(path, &e)),
        };
        let info = LockInfo {
            pid: std::process::id(),
            started_at: Utc::now(),
        };
        let contents = serde_json::to_string(&info).map_err(|e| LockError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let guard = Self {
            path: path.to_path_buf(),
            task_id: task_id.clone(),
        };
        file.write_all(contents.as_bytes())
            .map_err(|e| io_error(path, &e))?;
        Ok(guard)
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ExecutionLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(task_id = %self.task_id, error = %e, "failed to release execution lock");
        }
    }
}

fn io_error(path: &Path, e: &std::io::Error) -> LockError {
    LockError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}
