//! Error types for the scheduler crate.
//!
//! Registrar operations wrap these in a rootcause `Report`:
//! - `ScheduleError`: Cron translation failures
//! - `NativeError`: Failures reported by a native scheduler adapter
//! - `SchedulerError`: Registrar-level errors surfaced to the caller

use std::fmt;
use taskward_core::LockError;

/// Errors from schedule translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// Invalid cron expression.
    InvalidCronExpression { expression: String, reason: String },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCronExpression { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

/// Errors from a native scheduler adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeError {
    /// The helper process could not be started.
    SpawnFailed { command: String, reason: String },
    /// The helper process exited unsuccessfully.
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    /// The native object does not exist.
    NotFound { name: String },
    /// The trigger cannot be expressed by this backend.
    Unsupported { backend: String, reason: String },
    /// A temporary script could not be written.
    ScriptFailed { reason: String },
    /// The native scheduler's answer could not be parsed.
    ParseFailed { reason: String },
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpawnFailed { command, reason } => {
                write!(f, "failed to start '{command}': {reason}")
            }
            Self::CommandFailed {
                command,
                code,
                stderr,
            } => match code {
                Some(code) => write!(f, "'{command}' exited with code {code}: {stderr}"),
                None => write!(f, "'{command}' was terminated: {stderr}"),
            },
            Self::NotFound { name } => write!(f, "native task not found: {name}"),
            Self::Unsupported { backend, reason } => {
                write!(f, "{backend} cannot install this trigger: {reason}")
            }
            Self::ScriptFailed { reason } => {
                write!(f, "failed to prepare registration script: {reason}")
            }
            Self::ParseFailed { reason } => {
                write!(f, "failed to parse native scheduler output: {reason}")
            }
        }
    }
}

impl std::error::Error for NativeError {}

/// High-level registrar errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The task's schedule could not be translated.
    InvalidSchedule(ScheduleError),
    /// Registration failed after exhausting the elevation fallback.
    RegistrationFailed { task_name: String, reason: String },
    /// The elevated registration attempt itself failed.
    ElevationFailed { task_name: String, source: NativeError },
    /// An execution of the task is running.
    ExecutionInFlight { task_id: String },
    /// The execution lock could not be inspected.
    Lock(LockError),
    /// A native scheduler error, passed through unchanged.
    Native(NativeError),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSchedule(e) => write!(f, "{e}"),
            Self::RegistrationFailed { task_name, reason } => {
                write!(f, "registration of '{task_name}' failed: {reason}")
            }
            Self::ElevationFailed { task_name, source } => {
                write!(f, "elevated registration of '{task_name}' failed: {source}")
            }
            Self::ExecutionInFlight { task_id } => write!(
                f,
                "task '{task_id}' has an execution in flight; retry once it finishes"
            ),
            Self::Lock(e) => write!(f, "{e}"),
            Self::Native(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<ScheduleError> for SchedulerError {
    fn from(e: ScheduleError) -> Self {
        Self::InvalidSchedule(e)
    }
}

impl From<NativeError> for SchedulerError {
    fn from(e: NativeError) -> Self {
        Self::Native(e)
    }
}

impl From<LockError> for SchedulerError {
    fn from(e: LockError) -> Self {
        Self::Lock(e)
    }
}
