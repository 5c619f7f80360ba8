//! Runs one task definition and leaves a signed record behind.
//!
//! Nothing that goes wrong while running a task escapes `execute`: every
//! failure becomes a step in the log and the log is always finalized. The
//! only error a caller sees is a failure to persist that log.

use crate::api::{ApiClient, api_key_from_env};
use crate::cli::CliRunner;
use crate::error::ExecutionError;
use crate::notify::{Notifier, TracingNotifier};
use std::path::PathBuf;
use std::sync::Arc;
use taskward_audit::{AuditError, AuditLogger, ExecutionLog, ExecutionStatus};
use taskward_core::{
    AppContext, ExecutionId, ExecutionLock, InvocationMode, LockError, TaskDefinition,
};
use tracing::instrument;

/// Outcome of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    /// Where the signed log was written.
    pub log_path: PathBuf,
}

impl ExecutionSummary {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Executes tasks through the CLI or API backend.
#[derive(Clone)]
pub struct TaskExecutor {
    context: AppContext,
    audit: AuditLogger,
    notifier: Arc<dyn Notifier>,
    cli_path: Option<PathBuf>,
}

impl TaskExecutor {
    /// Creates an executor that notifies through the tracing log.
    #[must_use]
    pub fn new(context: AppContext, audit: AuditLogger) -> Self {
        Self {
            context,
            audit,
            notifier: Arc::new(TracingNotifier),
            cli_path: None,
        }
    }

    /// Replaces the notification collaborator.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Overrides the configured CLI command with a resolved path.
    #[must_use]
    pub fn with_cli_path(mut self, cli_path: Option<PathBuf>) -> Self {
        self.cli_path = cli_path;
        self
    }

    /// Runs a task, records its trace, and finalizes the log.
    ///
    /// # Errors
    ///
    /// Returns an error only if the log cannot be signed or persisted.
    /// Execution failures are recorded in the log and reported through
    /// the summary status.
    #[instrument(skip_all, fields(task_id = %task.id, invocation = %task.invocation))]
    pub async fn execute(
        &self,
        task: &TaskDefinition,
    ) -> taskward_core::Result<ExecutionSummary, AuditError> {
        let mut log = self.audit.create_log(&task.id);
        let _lock = self.acquire_lock(task);

        let success = if task.enabled {
            tracing::info!(execution_id = %log.execution_id(), "executing task");
            let result = match task.invocation {
                InvocationMode::Cli => self.run_cli(task, &mut log).await,
                InvocationMode::Api => self.run_api(task, &mut log).await,
            };
            match result {
                Ok(success) => success,
                Err(e) => {
                    tracing::warn!(error = %e, "task execution failed");
                    self.audit.add_step(&mut log, e.action(), None, Some(e.to_string()));
                    false
                }
            }
        } else {
            tracing::info!("task is disabled, skipping");
            self.audit.add_step(
                &mut log,
                "skipped",
                Some("task is disabled".to_string()),
                None,
            );
            false
        };

        let finalized = self.audit.finalize(&mut log, success).await?;
        let summary = ExecutionSummary {
            execution_id: log.execution_id(),
            status: log.status(),
            log_path: finalized.path,
        };

        if task.notifications.toast {
            self.send_notification(task, &summary).await;
        }
        Ok(summary)
    }

    fn acquire_lock(&self, task: &TaskDefinition) -> Option<ExecutionLock> {
        let stale_after = self.context.execution().timeout() * 2;
        match ExecutionLock::acquire(&self.context.paths().locks_dir(), &task.id, stale_after) {
            Ok(lock) => Some(lock),
            Err(LockError::Held { .. }) => {
                tracing::warn!(
                    "another execution of this task is running; continuing without the lock"
                );
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not take execution lock; continuing without it");
                None
            }
        }
    }

    async fn run_cli(
        &self,
        task: &TaskDefinition,
        log: &mut ExecutionLog,
    ) -> Result<bool, ExecutionError> {
        let execution = self.context.execution();
        let program = self
            .cli_path
            .as_ref()
            .map_or_else(|| execution.cli_command.clone(), |p| p.display().to_string());
        let runner = CliRunner::new(program, execution.cli_args.clone(), execution.timeout());

        let exit = runner.run(&task.instructions).await?;
        let detail = match exit.code {
            Some(code) => format!("{} exited with code {code}", runner.program()),
            None => format!("{} was terminated by a signal", runner.program()),
        };
        if exit.success() {
            self.audit.add_step(log, "cli_execution", Some(detail), None);
        } else {
            self.audit.add_step(log, "cli_execution", None, Some(detail));
        }
        Ok(exit.success())
    }

    async fn run_api(
        &self,
        task: &TaskDefinition,
        log: &mut ExecutionLog,
    ) -> Result<bool, ExecutionError> {
        let api = self.context.api();
        let key = api_key_from_env(&api.api_key_env)?;
        let client = ApiClient::new(api.clone(), self.context.execution().timeout());
        let output = client.complete(&key, &task.instructions).await?;
        self.audit.add_step(log, "api_execution", Some(output), None);
        Ok(true)
    }

    async fn send_notification(&self, task: &TaskDefinition, summary: &ExecutionSummary) {
        let outcome = if summary.succeeded() { "succeeded" } else { "failed" };
        let title = format!("Task {} {outcome}", task.display_name());
        let message = format!(
            "Execution {} finished with status {}",
            summary.execution_id, summary.status
        );
        if let Err(e) = self
            .notifier
            .notify(&title, &message, summary.succeeded())
            .await
        {
            tracing::warn!(error = %e, "notification failed");
        }
    }
}
