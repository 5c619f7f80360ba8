//! Registration of tasks with the native scheduler.
//!
//! Every task maps to exactly one native object named
//! `<task_prefix><task_id>`. The native action calls back into the
//! `taskward run` entry point with the task's file path.

use crate::error::SchedulerError;
use crate::native::{NativeScheduler, NativeTaskSpec, is_permission_denied};
use crate::schedule::{ScheduleTrigger, translate};
use chrono::{DateTime, Datelike, Utc};
use rootcause::prelude::Report;
use std::path::{Path, PathBuf};
use taskward_core::{AppContext, TaskId, lock};
use tracing::{debug, info, instrument, warn};

/// Native schedulers report "never" as a date in the distant past.
const SENTINEL_YEAR_BEFORE: i32 = 2000;

/// Native state of a task, as reported by `status`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStatus {
    /// Whether the native object exists.
    pub exists: bool,
    /// Whether it is enabled; `None` when it does not exist.
    pub enabled: Option<bool>,
    /// Last run time, unset if it never ran.
    pub last_run: Option<DateTime<Utc>>,
    /// Next scheduled run, unset if none.
    pub next_run: Option<DateTime<Utc>>,
}

/// Installs, toggles and inspects task triggers.
pub struct SchedulerRegistrar<N> {
    native: N,
    context: AppContext,
    cli_path: Option<PathBuf>,
}

impl<N: NativeScheduler> SchedulerRegistrar<N> {
    /// Creates a registrar, resolving the CLI tool on `PATH`.
    #[must_use]
    pub fn new(native: N, context: AppContext) -> Self {
        let cli_path = which::which(&context.execution().cli_command).ok();
        match &cli_path {
            Some(path) => debug!(cli_path = %path.display(), "resolved CLI tool"),
            None => debug!(
                cli_command = %context.execution().cli_command,
                "CLI tool not found on PATH"
            ),
        }
        Self {
            native,
            context,
            cli_path,
        }
    }

    /// Overrides the resolved CLI tool path.
    #[must_use]
    pub fn with_cli_path(mut self, cli_path: Option<PathBuf>) -> Self {
        self.cli_path = cli_path;
        self
    }

    /// The native adapter.
    pub fn native(&self) -> &N {
        &self.native
    }

    /// Derives the native object name for a task.
    #[must_use]
    pub fn native_name(&self, task_id: &TaskId) -> String {
        format!("{}{}", self.context.scheduler().task_prefix, task_id)
    }

    /// Builds the native task description without installing it.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidSchedule` if the cron expression is
    /// malformed.
    pub fn build_spec(
        &self,
        task_id: &TaskId,
        task_path: &Path,
        cron: &str,
        install_root: &Path,
        enabled: bool,
    ) -> Result<NativeTaskSpec, SchedulerError> {
        let trigger = translate(cron)?;

        let executable = if cfg!(windows) {
            "taskward.exe"
        } else {
            "taskward"
        };
        let mut arguments = vec![
            "run".to_string(),
            task_path.display().to_string(),
            "--config-dir".to_string(),
            self.context.paths().config_dir.display().to_string(),
        ];
        if let Some(cli_path) = &self.cli_path {
            arguments.push("--cli-path".to_string());
            arguments.push(cli_path.display().to_string());
        }

        Ok(NativeTaskSpec {
            name: self.native_name(task_id),
            description: format!("taskward task {task_id} ({cron})"),
            trigger,
            program: install_root.join(executable),
            arguments,
            working_dir: install_root.to_path_buf(),
            enabled,
        })
    }

    /// Installs or replaces the native trigger for a task, active or not
    /// according to `enabled`.
    ///
    /// A permission-denied failure is retried once through the adapter's
    /// elevation flow, and success is then confirmed by querying the
    /// native scheduler.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchedule` for a malformed cron expression,
    /// `ExecutionInFlight` if the task is running, `RegistrationFailed` or
    /// `ElevationFailed` if the elevation fallback does not produce the
    /// task, and `Native` for any other adapter error.
    #[instrument(skip_all, fields(task_id = %task_id, backend = self.native.backend_name()))]
    pub async fn register(
        &self,
        task_id: &TaskId,
        task_path: &Path,
        cron: &str,
        install_root: &Path,
        enabled: bool,
    ) -> Result<ScheduleTrigger, Report<SchedulerError>> {
        let spec = self.build_spec(task_id, task_path, cron, install_root, enabled)?;

        let stale_after = self.context.execution().timeout() * 2;
        if lock::is_held(&self.context.paths().locks_dir(), task_id, stale_after)
            .map_err(SchedulerError::from)?
        {
            return Err(SchedulerError::ExecutionInFlight {
                task_id: task_id.to_string(),
            }
            .into());
        }

        match self.native.register(&spec).await {
            Ok(()) => {
                info!(
                    native_name = %spec.name,
                    trigger = %spec.trigger,
                    enabled,
                    "registered task"
                );
                Ok(spec.trigger)
            }
            Err(e) if is_permission_denied(&e) => {
                warn!(error = %e, "registration denied, retrying with elevation");
                self.register_with_elevation(&spec).await?;
                info!(
                    native_name = %spec.name,
                    trigger = %spec.trigger,
                    enabled,
                    "registered task with elevation"
                );
                Ok(spec.trigger)
            }
            Err(e) => Err(SchedulerError::from(e).into()),
        }
    }

    async fn register_with_elevation(&self, spec: &NativeTaskSpec) -> Result<(), SchedulerError> {
        self.native
            .register_elevated(spec)
            .await
            .map_err(|source| SchedulerError::ElevationFailed {
                task_name: spec.name.clone(),
                source,
            })?;

        match self.native.query(&spec.name).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(SchedulerError::RegistrationFailed {
                task_name: spec.name.clone(),
                reason: "task not found after elevated registration".to_string(),
            }),
            Err(e) => Err(SchedulerError::RegistrationFailed {
                task_name: spec.name.clone(),
                reason: format!("could not confirm elevated registration: {e}"),
            }),
        }
    }

    /// Removes the native trigger for a task.
    ///
    /// # Errors
    ///
    /// Returns the adapter's error unchanged.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub async fn unregister(&self, task_id: &TaskId) -> Result<(), Report<SchedulerError>> {
        self.native
            .unregister(&self.native_name(task_id))
            .await
            .map_err(SchedulerError::from)?;
        info!("unregistered task");
        Ok(())
    }

    /// Enables the native trigger for a task.
    ///
    /// # Errors
    ///
    /// Returns the adapter's error unchanged.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub async fn enable(&self, task_id: &TaskId) -> Result<(), Report<SchedulerError>> {
        self.set_enabled(task_id, true).await
    }

    /// Disables the native trigger for a task.
    ///
    /// # Errors
    ///
    /// Returns the adapter's error unchanged.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub async fn disable(&self, task_id: &TaskId) -> Result<(), Report<SchedulerError>> {
        self.set_enabled(task_id, false).await
    }

    async fn set_enabled(
        &self,
        task_id: &TaskId,
        enabled: bool,
    ) -> Result<(), Report<SchedulerError>> {
        self.native
            .set_enabled(&self.native_name(task_id), enabled)
            .await
            .map_err(SchedulerError::from)?;
        info!(enabled, "updated task state");
        Ok(())
    }

    /// Reports the native state of a task.
    ///
    /// # Errors
    ///
    /// Returns the adapter's error unchanged.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub async fn status(&self, task_id: &TaskId) -> Result<TaskStatus, Report<SchedulerError>> {
        let info = self
            .native
            .query(&self.native_name(task_id))
            .await
            .map_err(SchedulerError::from)?;

        Ok(match info {
            Some(info) => TaskStatus {
                exists: true,
                enabled: Some(info.enabled),
                last_run: normalize_run_time(info.last_run),
                next_run: normalize_run_time(info.next_run),
            },
            None => TaskStatus::default(),
        })
    }
}

/// Maps a "never" sentinel to unset.
fn normalize_run_time(time: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    time.filter(|t| t.year() >= SENTINEL_YEAR_BEFORE)
}
