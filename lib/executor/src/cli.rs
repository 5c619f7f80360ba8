//! CLI invocation: hands the task instructions to an external agent tool.
//!
//! The instructions are written to a temporary file that lives exactly as
//! long as the run, and the tool is told to read it. Standard streams are
//! inherited so the tool's output lands wherever the scheduler sends ours.
//!
//! On unix the tool runs in its own process group, so a timeout kills
//! everything it started along with it.

use crate::error::ExecutionError;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::{Child, Command};
use tokio::time::timeout;

/// Result of a CLI run that exited on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CliExit {
    /// Exit code, or `None` if the process was killed by a signal.
    pub code: Option<i32>,
}

impl CliExit {
    /// Whether the run counts as a success.
    #[must_use]
    pub const fn success(self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Spawns the external CLI tool for one set of instructions.
#[derive(Debug, Clone)]
pub struct CliRunner {
    program: String,
    args: Vec<String>,
    limit: Duration,
}

impl CliRunner {
    /// Creates a runner for `program` with its non-interactive flags.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>, limit: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            limit,
        }
    }

    /// The program that will be spawned.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Runs the tool to completion or until the time limit.
    ///
    /// # Errors
    ///
    /// Returns `InstructionsWriteFailed` if the temporary file cannot be
    /// written, `SpawnFailed` if the process cannot be started, and
    /// `Timeout` if it was killed for running too long.
    pub async fn run(&self, instructions: &str) -> Result<CliExit, ExecutionError> {
        let file = write_instructions(instructions)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(prompt_for(file.path()))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| ExecutionError::SpawnFailed {
            command: self.program.clone(),
            reason: e.to_string(),
        })?;
        tracing::debug!(program = %self.program, pid = ?child.id(), "spawned CLI tool");

        match timeout(self.limit, child.wait()).await {
            Ok(Ok(status)) => Ok(CliExit {
                code: status.code(),
            }),
            Ok(Err(e)) => Err(ExecutionError::SpawnFailed {
                command: self.program.clone(),
                reason: e.to_string(),
            }),
            Err(_) => {
                tracing::warn!(
                    program = %self.program,
                    limit_secs = self.limit.as_secs(),
                    "CLI tool timed out"
                );
                kill_process_tree(&mut child).await;
                Err(ExecutionError::Timeout { limit: self.limit })
            }
        }
    }
}

async fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pgid) = child.id().and_then(|id| libc::pid_t::try_from(id).ok()) {
            // The child leads its own group, so its pid is the group id.
            let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
            if rc != 0 {
                let e = std::io::Error::last_os_error();
                tracing::warn!(error = %e, pgid, "failed to kill CLI process group");
            }
        }
    }
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "failed to kill timed out CLI tool");
    }
}

fn write_instructions(instructions: &str) -> Result<NamedTempFile, ExecutionError> {
    let write_failed = |e: std::io::Error| ExecutionError::InstructionsWriteFailed {
        reason: e.to_string(),
    };
    let mut file = tempfile::Builder::new()
        .prefix("taskward-instructions-")
        .suffix(".md")
        .tempfile()
        .map_err(write_failed)?;
    file.write_all(instructions.as_bytes()).map_err(write_failed)?;
    file.flush().map_err(write_failed)?;
    Ok(file)
}

fn prompt_for(path: &Path) -> String {
    format!(
        "Read the task instructions in {} and carry them out.",
        path.display()
    )
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, limit: Duration) -> CliRunner {
        CliRunner::new("sh", vec!["-c".to_string(), script.to_string()], limit)
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        let exit = sh("exit 0", Duration::from_secs(10))
            .run("do it")
            .await
            .expect("run");
        assert!(exit.success());
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let exit = sh("exit 3", Duration::from_secs(10))
            .run("do it")
            .await
            .expect("run");
        assert_eq!(exit.code, Some(3));
        assert!(!exit.success());
    }

    #[tokio::test]
    async fn instructions_file_is_readable_during_run() {
        // The prompt is passed as $0; extract the path from it.
        let script = concat!(
            r#"path=$(printf '%s' "$0" | "#,
            r#"sed 's/^Read the task instructions in //; s/ and carry them out\.$//'); "#,
            r#"grep -q 'marker-text' "$path""#,
        );
        let exit = sh(script, Duration::from_secs(10))
            .run("marker-text")
            .await
            .expect("run");
        assert!(exit.success());
    }

    #[tokio::test]
    async fn long_run_times_out() {
        let started = std::time::Instant::now();
        let err = sh("sleep 30", Duration::from_millis(200))
            .run("wait")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_kills_processes_started_by_the_tool() {
        fn is_running(pid: &str) -> bool {
            std::fs::read_to_string(format!("/proc/{pid}/stat"))
                .ok()
                .and_then(|stat| stat.rsplit(')').next().map(str::trim_start).map(str::to_owned))
                .is_some_and(|state| !state.starts_with('Z'))
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let pid_file = dir.path().join("sleeper.pid");
        let script = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());

        let err = sh(&script, Duration::from_millis(500))
            .run("spawn")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout { .. }));

        let pid = std::fs::read_to_string(&pid_file).expect("pid file");
        let pid = pid.trim();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while is_running(pid) && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!is_running(pid), "background sleep {pid} survived the timeout");
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let runner = CliRunner::new(
            "taskward-definitely-not-installed",
            Vec::new(),
            Duration::from_secs(1),
        );
        let err = runner.run("x").await.unwrap_err();
        assert!(matches!(err, ExecutionError::SpawnFailed { .. }));
    }

    #[test]
    fn temp_file_is_removed_on_drop() {
        let file = write_instructions("body").expect("write");
        let path = file.path().to_path_buf();
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "body");
        drop(file);
        assert!(!path.exists());
    }
}
