//! The native scheduler seam.
//!
//! A [`NativeScheduler`] installs, removes, toggles and queries named
//! triggers in the operating system's scheduler. Adapters live in
//! [`crate::powershell`] and [`crate::crontab`].

use crate::crontab::CrontabScheduler;
use crate::error::NativeError;
use crate::powershell::PowerShellScheduler;
use crate::schedule::ScheduleTrigger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::Stdio;
use taskward_core::config::SchedulerBackend;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Everything a native scheduler needs to install one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeTaskSpec {
    /// Native object name, unique per task.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// When to fire.
    pub trigger: ScheduleTrigger,
    /// Executable to launch.
    pub program: PathBuf,
    /// Arguments passed to the executable.
    pub arguments: Vec<String>,
    /// Working directory of the launched process.
    pub working_dir: PathBuf,
    /// Whether the trigger is installed active.
    pub enabled: bool,
}

/// What the native scheduler reports about an installed task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeTaskInfo {
    /// Whether the trigger is active.
    pub enabled: bool,
    /// Last run time as reported by the scheduler, possibly a sentinel.
    pub last_run: Option<DateTime<Utc>>,
    /// Next run time as reported by the scheduler, possibly a sentinel.
    pub next_run: Option<DateTime<Utc>>,
}

/// An operating-system scheduler.
#[async_trait]
pub trait NativeScheduler: Send + Sync {
    /// Short adapter name used in logs and errors.
    fn backend_name(&self) -> &'static str;

    /// Whether `query` can report when a task last ran.
    fn tracks_last_run(&self) -> bool {
        true
    }

    /// Creates or replaces a task with the caller's privileges.
    async fn register(&self, spec: &NativeTaskSpec) -> Result<(), NativeError>;

    /// Creates or replaces a task through an elevation prompt.
    async fn register_elevated(&self, spec: &NativeTaskSpec) -> Result<(), NativeError>;

    /// Removes a task. Removing an absent task is not an error.
    async fn unregister(&self, name: &str) -> Result<(), NativeError>;

    /// Enables or disables a task.
    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), NativeError>;

    /// Looks up a task, returning `None` if it is not installed.
    async fn query(&self, name: &str) -> Result<Option<NativeTaskInfo>, NativeError>;
}

#[async_trait]
impl<T: NativeScheduler + ?Sized> NativeScheduler for Box<T> {
    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }

    fn tracks_last_run(&self) -> bool {
        (**self).tracks_last_run()
    }

    async fn register(&self, spec: &NativeTaskSpec) -> Result<(), NativeError> {
        (**self).register(spec).await
    }

    async fn register_elevated(&self, spec: &NativeTaskSpec) -> Result<(), NativeError> {
        (**self).register_elevated(spec).await
    }

    async fn unregister(&self, name: &str) -> Result<(), NativeError> {
        (**self).unregister(name).await
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), NativeError> {
        (**self).set_enabled(name, enabled).await
    }

    async fn query(&self, name: &str) -> Result<Option<NativeTaskInfo>, NativeError> {
        (**self).query(name).await
    }
}

/// Returns the adapter for a configured backend.
///
/// `Auto` picks the Windows Task Scheduler on Windows and the user's
/// crontab everywhere else.
#[must_use]
pub fn for_backend(backend: SchedulerBackend) -> Box<dyn NativeScheduler> {
    match backend {
        SchedulerBackend::Powershell => Box::new(PowerShellScheduler::new()),
        SchedulerBackend::Crontab => Box::new(CrontabScheduler::new()),
        SchedulerBackend::Auto if cfg!(windows) => Box::new(PowerShellScheduler::new()),
        SchedulerBackend::Auto => Box::new(CrontabScheduler::new()),
    }
}

const PERMISSION_MARKERS: &[&str] = &[
    "access is denied",
    "access denied",
    "0x80070005",
    "e_accessdenied",
    "-2147024891",
    "unauthorizedaccess",
    "permission denied",
    "not permitted",
];

/// Returns whether an adapter error means the caller lacks privileges.
#[must_use]
pub fn is_permission_denied(error: &NativeError) -> bool {
    let message = match error {
        NativeError::CommandFailed { stderr, .. } => stderr.to_lowercase(),
        NativeError::SpawnFailed { reason, .. } => reason.to_lowercase(),
        _ => return false,
    };
    PERMISSION_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Output of a finished helper command.
#[derive(Debug)]
pub(crate) struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl CommandOutput {
    pub(crate) fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub(crate) fn into_error(self, command: &str) -> NativeError {
        let stderr = if self.stderr.trim().is_empty() {
            self.stdout
        } else {
            self.stderr
        };
        NativeError::CommandFailed {
            command: command.to_string(),
            code: self.code,
            stderr: stderr.trim().to_string(),
        }
    }
}

/// Runs a helper program to completion, optionally feeding `stdin`.
pub(crate) async fn run_command(
    program: &str,
    args: &[String],
    stdin: Option<&str>,
) -> Result<CommandOutput, NativeError> {
    tracing::debug!(program, ?args, "running native scheduler command");

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| NativeError::SpawnFailed {
            command: program.to_string(),
            reason: e.to_string(),
        })?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes())
            .await
            .map_err(|e| NativeError::SpawnFailed {
                command: program.to_string(),
                reason: format!("failed to write stdin: {e}"),
            })?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| NativeError::SpawnFailed {
            command: program.to_string(),
            reason: e.to_string(),
        })?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        code: output.status.code(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> NativeError {
        NativeError::CommandFailed {
            command: "powershell".to_string(),
            code: Some(1),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn permission_markers_are_recognized() {
        assert!(is_permission_denied(&failed(
            "Register-ScheduledTask : Access is denied."
        )));
        assert!(is_permission_denied(&failed("HRESULT: 0x80070005")));
        assert!(is_permission_denied(&failed(
            "+ CategoryInfo : PermissionDenied: (UnauthorizedAccess)"
        )));
        assert!(is_permission_denied(&failed(
            "crontab: Permission denied"
        )));
        assert!(!is_permission_denied(&failed("The task XML is malformed")));
    }

    #[test]
    fn explicit_backends_are_honored() {
        assert_eq!(
            for_backend(SchedulerBackend::Crontab).backend_name(),
            CrontabScheduler::new().backend_name()
        );
        assert_eq!(
            for_backend(SchedulerBackend::Powershell).backend_name(),
            PowerShellScheduler::new().backend_name()
        );
    }

    #[test]
    fn only_cron_lacks_run_history() {
        assert!(!for_backend(SchedulerBackend::Crontab).tracks_last_run());
        assert!(for_backend(SchedulerBackend::Powershell).tracks_last_run());
    }

    #[test]
    fn non_command_errors_are_not_permission_errors() {
        assert!(!is_permission_denied(&NativeError::NotFound {
            name: "Access denied".to_string()
        }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_command_captures_output_and_stdin() {
        let output = run_command("cat", &[], Some("hello"))
            .await
            .expect("cat runs");
        assert!(output.success());
        assert_eq!(output.stdout, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_command_prefers_stderr() {
        let output = run_command(
            "sh",
            &["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()],
            None,
        )
        .await
        .expect("sh runs");
        assert!(!output.success());
        let err = output.into_error("sh");
        assert_eq!(
            err,
            NativeError::CommandFailed {
                command: "sh".to_string(),
                code: Some(3),
                stderr: "err".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn missing_program_is_spawn_failure() {
        let err = run_command("taskward-no-such-program", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, NativeError::SpawnFailed { .. }));
    }
}
