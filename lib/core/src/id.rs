//! Identifier types.
//!
//! Execution ids use ULID (Universally Unique Lexicographically Sortable
//! Identifier) format: a millisecond timestamp prefix followed by a random
//! suffix, so ids sort chronologically by construction. Task ids are
//! user-chosen strings restricted to a filename- and scheduler-safe alphabet.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Maximum length of a task id.
pub const MAX_TASK_ID_LEN: usize = 64;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Unique identifier for a single execution attempt of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(Ulid);

impl ExecutionId {
    /// Creates a new ID from the current time and fresh randomness.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Creates an ID from a ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// Returns the prefix used for display formatting.
    #[must_use]
    pub const fn prefix() -> &'static str {
        "exec"
    }

    /// Returns the creation time encoded in the id.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        let millis = i64::try_from(self.0.timestamp_ms()).unwrap_or(i64::MAX);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", Self::prefix(), self.0)
    }
}

impl FromStr for ExecutionId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid_str = s.strip_prefix("exec_").unwrap_or(s);
        Ulid::from_str(ulid_str)
            .map(Self)
            .map_err(|e| ParseIdError {
                id_type: "ExecutionId",
                reason: e.to_string(),
            })
    }
}

impl From<Ulid> for ExecutionId {
    fn from(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

/// Stable identifier of a task definition.
///
/// Restricted to ASCII letters, digits, `-` and `_` so the id can be
/// embedded in native scheduler names, lock files and log filenames
/// without escaping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Parses and validates a task id.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is empty, too long, or contains
    /// characters outside `[A-Za-z0-9_-]`.
    pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ParseIdError {
                id_type: "TaskId",
                reason: "id is empty".to_string(),
            });
        }
        if id.len() > MAX_TASK_ID_LEN {
            return Err(ParseIdError {
                id_type: "TaskId",
                reason: format!("id is longer than {MAX_TASK_ID_LEN} characters"),
            });
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(ParseIdError {
                id_type: "TaskId",
                reason: format!("character '{bad}' is not allowed"),
            });
        }
        Ok(Self(id))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TaskId {
    type Error = ParseIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
