//! Error types for task execution.
//!
//! Execution errors never escape `TaskExecutor::execute`; each one becomes
//! a failure step in the execution log, labeled by [`ExecutionError::action`].

use std::fmt;
use std::time::Duration;

/// Failures inside one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The CLI process outlived the execution timeout and was killed.
    Timeout { limit: Duration },
    /// The CLI process could not be started.
    SpawnFailed { command: String, reason: String },
    /// The instructions could not be written to a temporary file.
    InstructionsWriteFailed { reason: String },
    /// No API key is configured.
    CredentialMissing { variable: String },
    /// The API request failed or returned a non-success status.
    ApiRequestFailed { status: Option<u16>, body: String },
    /// The API response has no usable text.
    ResponseParseFailed { reason: String },
}

impl ExecutionError {
    /// Step label recorded for this error.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::SpawnFailed { .. } => "spawn_error",
            Self::InstructionsWriteFailed { .. } => "instructions_error",
            Self::CredentialMissing { .. } => "credential_missing",
            Self::ApiRequestFailed { .. } => "api_error",
            Self::ResponseParseFailed { .. } => "api_response_error",
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { limit } => write!(
                f,
                "execution exceeded the {}s timeout and was terminated",
                limit.as_secs()
            ),
            Self::SpawnFailed { command, reason } => {
                write!(f, "failed to start '{command}': {reason}")
            }
            Self::InstructionsWriteFailed { reason } => {
                write!(f, "failed to write instructions file: {reason}")
            }
            Self::CredentialMissing { variable } => {
                write!(f, "API key not configured: set the {variable} environment variable")
            }
            Self::ApiRequestFailed { status, body } => match status {
                Some(status) => write!(f, "API request failed with status {status}: {body}"),
                None => write!(f, "API request failed: {body}"),
            },
            Self::ResponseParseFailed { reason } => {
                write!(f, "unexpected API response: {reason}")
            }
        }
    }
}

impl std::error::Error for ExecutionError {}

/// A notification could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError {
    pub reason: String,
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "notification failed: {}", self.reason)
    }
}

impl std::error::Error for NotifyError {}
