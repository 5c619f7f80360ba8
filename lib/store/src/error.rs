//! Error types for file-backed storage.

use std::fmt;
use std::path::Path;

/// Errors from the task and log stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Filesystem access failed.
    Io { path: String, reason: String },
    /// A stored document could not be parsed.
    Parse { path: String, reason: String },
    /// A task document's id does not match its file name.
    IdMismatch { expected: String, found: String },
    /// A log name is not a plain file name in the log directory.
    InvalidLogName { name: String },
}

impl StoreError {
    pub(crate) fn io(path: &Path, e: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, reason } => write!(f, "'{path}': {reason}"),
            Self::Parse { path, reason } => write!(f, "failed to parse '{path}': {reason}"),
            Self::IdMismatch { expected, found } => {
                write!(f, "task file for '{expected}' declares id '{found}'")
            }
            Self::InvalidLogName { name } => write!(f, "invalid log name '{name}'"),
        }
    }
}

impl std::error::Error for StoreError {}
