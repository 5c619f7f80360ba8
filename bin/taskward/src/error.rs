//! Errors surfaced by the command line.

use rootcause::prelude::Report;
use std::fmt;
use taskward_audit::{AuditError, KeyError};
use taskward_core::{ConfigError, ParseIdError};
use taskward_scheduler::{ScheduleError, SchedulerError};
use taskward_store::StoreError;

/// Anything a subcommand can fail with.
#[derive(Debug)]
pub enum CommandError {
    Config(ConfigError),
    InvalidTaskId(ParseIdError),
    TaskNotFound { task_id: String },
    Schedule(ScheduleError),
    Scheduler(Report<SchedulerError>),
    Store(Report<StoreError>),
    Audit(Report<AuditError>),
    Key(Report<KeyError>),
    Io { context: String, reason: String },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::InvalidTaskId(e) => write!(f, "{e}"),
            Self::TaskNotFound { task_id } => write!(f, "task '{task_id}' not found"),
            Self::Schedule(e) => write!(f, "{e}"),
            Self::Scheduler(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "{e}"),
            Self::Audit(e) => write!(f, "{e}"),
            Self::Key(e) => write!(f, "{e}"),
            Self::Io { context, reason } => write!(f, "{context}: {reason}"),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<ConfigError> for CommandError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<ParseIdError> for CommandError {
    fn from(e: ParseIdError) -> Self {
        Self::InvalidTaskId(e)
    }
}

impl From<ScheduleError> for CommandError {
    fn from(e: ScheduleError) -> Self {
        Self::Schedule(e)
    }
}

impl From<Report<SchedulerError>> for CommandError {
    fn from(e: Report<SchedulerError>) -> Self {
        Self::Scheduler(e)
    }
}

impl From<Report<StoreError>> for CommandError {
    fn from(e: Report<StoreError>) -> Self {
        Self::Store(e)
    }
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.into())
    }
}

impl From<Report<AuditError>> for CommandError {
    fn from(e: Report<AuditError>) -> Self {
        Self::Audit(e)
    }
}

impl From<Report<KeyError>> for CommandError {
    fn from(e: Report<KeyError>) -> Self {
        Self::Key(e)
    }
}
