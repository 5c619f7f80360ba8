//! In-memory execution records.

use crate::error::AuditError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use taskward_core::{ExecutionId, TaskId};

/// Lifecycle state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failure,
}

impl ExecutionStatus {
    /// Returns the string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    /// Returns whether this is a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of an execution's step trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStep {
    /// When the step was recorded.
    pub timestamp: DateTime<Utc>,
    /// Short label, e.g. `cli_execution` or `timeout`.
    pub action: String,
    /// Captured output.
    pub output: Option<String>,
    /// Captured error detail.
    pub error: Option<String>,
}

/// The record of one execution attempt.
///
/// Steps are append-only and the status moves from `Running` to a
/// terminal value exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionLog {
    task_id: TaskId,
    execution_id: ExecutionId,
    timestamp: DateTime<Utc>,
    status: ExecutionStatus,
    steps: Vec<LogStep>,
    signature: Option<String>,
}

impl ExecutionLog {
    /// Starts a running log with a fresh execution id.
    #[must_use]
    pub fn new(task_id: TaskId) -> Self {
        let execution_id = ExecutionId::new();
        Self {
            task_id,
            timestamp: execution_id.created_at(),
            execution_id,
            status: ExecutionStatus::Running,
            steps: Vec::new(),
            signature: None,
        }
    }

    /// Task this execution belongs to.
    #[must_use]
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Unique, time-ordered execution id.
    #[must_use]
    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    /// Creation time.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    /// Recorded steps, in execution order.
    #[must_use]
    pub fn steps(&self) -> &[LogStep] {
        &self.steps
    }

    /// Hex HMAC signature, present after finalization.
    #[must_use]
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    /// Appends a step.
    pub fn push_step(
        &mut self,
        action: impl Into<String>,
        output: Option<String>,
        error: Option<String>,
    ) {
        self.steps.push(LogStep {
            timestamp: Utc::now(),
            action: action.into(),
            output,
            error,
        });
    }

    /// Moves the log to its terminal status.
    ///
    /// # Errors
    ///
    /// Returns `AuditError::AlreadyFinalized` if the status is already terminal.
    pub fn complete(&mut self, success: bool) -> Result<(), AuditError> {
        if self.status.is_terminal() {
            return Err(AuditError::AlreadyFinalized {
                execution_id: self.execution_id.to_string(),
            });
        }
        self.status = if success {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failure
        };
        Ok(())
    }

    pub(crate) fn set_signature(&mut self, signature: String) {
        self.signature = Some(signature);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> ExecutionLog {
        ExecutionLog::new(TaskId::new("nightly").expect("valid id"))
    }

    #[test]
    fn new_log_is_running_and_empty() {
        let log = log();
        assert_eq!(log.status(), ExecutionStatus::Running);
        assert!(log.steps().is_empty());
        assert!(log.signature().is_none());
        assert_eq!(log.timestamp(), log.execution_id().created_at());
    }

    #[test]
    fn steps_keep_append_order() {
        let mut log = log();
        log.push_step("start", None, None);
        log.push_step("cli_execution", Some("done".to_string()), None);
        log.push_step("cleanup", None, Some("busy".to_string()));

        let actions: Vec<&str> = log.steps().iter().map(|s| s.action.as_str()).collect();
        assert_eq!(actions, ["start", "cli_execution", "cleanup"]);
        assert!(log.steps()[0].timestamp <= log.steps()[2].timestamp);
    }

    #[test]
    fn status_transitions_once() {
        let mut log = log();
        log.complete(true).expect("first transition");
        assert_eq!(log.status(), ExecutionStatus::Success);

        let err = log.complete(false).unwrap_err();
        assert!(matches!(err, AuditError::AlreadyFinalized { .. }));
        assert_eq!(log.status(), ExecutionStatus::Success);
    }

    #[test]
    fn execution_ids_are_unique() {
        assert_ne!(log().execution_id(), log().execution_id());
    }
}
