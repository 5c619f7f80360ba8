//! Error handling foundation for taskward.
//!
//! This module provides the `Result` type alias using rootcause plus the
//! error enums for the core types. Each crate defines its own
//! domain-specific errors in its own error module; public operations wrap
//! them in a rootcause `Report` as they propagate to the caller.

use rootcause::Report;
use std::fmt;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

/// Errors from splitting a `+++`-delimited document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontmatterError {
    /// The document does not start with the opening delimiter.
    MissingOpening,
    /// The header is never closed.
    MissingClosing,
}

impl fmt::Display for FrontmatterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingOpening => write!(f, "document does not start with '+++'"),
            Self::MissingClosing => write!(f, "document header is not terminated by '+++'"),
        }
    }
}

impl std::error::Error for FrontmatterError {}

/// Errors from parsing a task definition document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskParseError {
    /// The frontmatter could not be located.
    Frontmatter(FrontmatterError),
    /// The header is not valid against the task schema.
    InvalidHeader { reason: String },
    /// The task could not be serialized.
    SerializeFailed { reason: String },
}

impl fmt::Display for TaskParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frontmatter(e) => write!(f, "invalid task document: {e}"),
            Self::InvalidHeader { reason } => write!(f, "invalid task header: {reason}"),
            Self::SerializeFailed { reason } => {
                write!(f, "failed to serialize task: {reason}")
            }
        }
    }
}

impl std::error::Error for TaskParseError {}

impl From<FrontmatterError> for TaskParseError {
    fn from(e: FrontmatterError) -> Self {
        Self::Frontmatter(e)
    }
}

/// Errors from loading configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No configuration directory could be determined for this platform.
    NoConfigDir,
    /// A configuration source could not be read or deserialized.
    LoadFailed { reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoConfigDir => write!(f, "could not determine a configuration directory"),
            Self::LoadFailed { reason } => write!(f, "failed to load configuration: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        Self::LoadFailed {
            reason: e.to_string(),
        }
    }
}

/// Errors from the per-task execution lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Another live execution holds the lock.
    Held { task_id: String },
    /// Lock file I/O failed.
    Io { path: String, reason: String },
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Held { task_id } => {
                write!(f, "an execution of task '{task_id}' is already in flight")
            }
            Self::Io { path, reason } => write!(f, "lock file '{path}': {reason}"),
        }
    }
}

impl std::error::Error for LockError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_type_works() {
        let ok: Result<i32> = Ok(42);
        assert_eq!(ok.expect("should be ok"), 42);
    }

    #[test]
    fn task_parse_error_display() {
        let err = TaskParseError::from(FrontmatterError::MissingClosing);
        assert!(err.to_string().contains("not terminated"));
    }

    #[test]
    fn lock_error_display() {
        let err = LockError::Held {
            task_id: "nightly".to_string(),
        };
        assert!(err.to_string().contains("nightly"));
        assert!(err.to_string().contains("in flight"));
    }
}
