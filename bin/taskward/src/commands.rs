//! Subcommand implementations.

use crate::Command;
use crate::error::CommandError;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use taskward_audit::{AuditLogger, SecretKeyManager};
use taskward_core::{AppContext, TaskId, TaskStore};
use taskward_executor::TaskExecutor;
use taskward_scheduler::{NativeScheduler, SchedulerRegistrar, for_backend, translate};
use taskward_store::{FileLogStore, FileTaskStore, load_task_file};

/// Runs one subcommand and returns the process exit code.
pub async fn dispatch(
    command: Command,
    config_dir: Option<&Path>,
) -> Result<ExitCode, CommandError> {
    let load = || AppContext::load(config_dir);
    match command {
        Command::Run {
            task_file,
            cli_path,
        } => run(load()?, &task_file, cli_path).await,
        Command::Register { task_id } => register(load()?, &task_id).await,
        Command::Unregister { task_id } => {
            let id = TaskId::new(task_id)?;
            registrar(load()?).unregister(&id).await?;
            println!("unregistered {id}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Enable { task_id } => {
            let id = TaskId::new(task_id)?;
            registrar(load()?).enable(&id).await?;
            println!("enabled {id}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Disable { task_id } => {
            let id = TaskId::new(task_id)?;
            registrar(load()?).disable(&id).await?;
            println!("disabled {id}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { task_id } => status(load()?, &task_id).await,
        Command::Tasks => list_tasks(&load()?).await,
        Command::Verify { log } => verify(&load()?, &log).await,
        Command::Logs { task } => list_logs(&load()?, task).await,
        Command::Translate { expression } => translate_expression(&expression),
    }
}

fn audit_logger(context: &AppContext) -> AuditLogger {
    let keys = SecretKeyManager::from_file(context.paths().signing_key_file());
    let sink = FileLogStore::new(context.paths().logs_dir());
    AuditLogger::new(Arc::new(keys), Arc::new(sink))
}

fn registrar(context: AppContext) -> SchedulerRegistrar<Box<dyn NativeScheduler>> {
    let native = for_backend(context.scheduler().backend);
    SchedulerRegistrar::new(native, context)
}

fn install_root() -> Result<PathBuf, CommandError> {
    let exe = std::env::current_exe().map_err(|e| CommandError::Io {
        context: "locating the taskward executable".to_string(),
        reason: e.to_string(),
    })?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| CommandError::Io {
            context: "locating the taskward executable".to_string(),
            reason: format!("'{}' has no parent directory", exe.display()),
        })
}

async fn run(
    context: AppContext,
    task_file: &Path,
    cli_path: Option<PathBuf>,
) -> Result<ExitCode, CommandError> {
    let task = load_task_file(task_file).await?;
    let executor =
        TaskExecutor::new(context.clone(), audit_logger(&context)).with_cli_path(cli_path);
    let summary = executor.execute(&task).await?;

    println!(
        "{} {} {}",
        summary.execution_id,
        summary.status,
        summary.log_path.display()
    );
    Ok(if summary.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn register(context: AppContext, task_id: &str) -> Result<ExitCode, CommandError> {
    let id = TaskId::new(task_id)?;
    let store = FileTaskStore::new(context.paths().tasks_dir());
    let task = store
        .get_task(&id)
        .await?
        .ok_or_else(|| CommandError::TaskNotFound {
            task_id: id.to_string(),
        })?;

    let root = install_root()?;
    let registrar = registrar(context);
    let trigger = registrar
        .register(
            &id,
            &store.task_file_path(&id),
            &task.schedule,
            &root,
            task.enabled,
        )
        .await?;

    println!("registered {} ({trigger})", registrar.native_name(&id));
    Ok(ExitCode::SUCCESS)
}

async fn status(context: AppContext, task_id: &str) -> Result<ExitCode, CommandError> {
    let id = TaskId::new(task_id)?;
    let registrar = registrar(context);
    let status = registrar.status(&id).await?;

    let name = registrar.native_name(&id);
    if !status.exists {
        println!("{name}: not registered");
        return Ok(ExitCode::FAILURE);
    }
    let enabled = match status.enabled {
        Some(true) => "enabled",
        Some(false) => "disabled",
        None => "unknown",
    };
    let show = |time: Option<DateTime<Utc>>| {
        time.map_or_else(|| "never".to_string(), |t| t.to_rfc3339())
    };
    let last_run = if registrar.native().tracks_last_run() {
        show(status.last_run)
    } else {
        format!("not tracked by {}", registrar.native().backend_name())
    };
    println!("{name}: {enabled}");
    println!("  last run: {last_run}");
    println!("  next run: {}", show(status.next_run));
    Ok(ExitCode::SUCCESS)
}

async fn list_tasks(context: &AppContext) -> Result<ExitCode, CommandError> {
    let store = FileTaskStore::new(context.paths().tasks_dir());
    for task in store.list_tasks().await? {
        let state = if task.enabled { "enabled" } else { "disabled" };
        println!("{}\t{}\t{}\t{state}", task.id, task.schedule, task.invocation);
    }
    Ok(ExitCode::SUCCESS)
}

async fn verify(context: &AppContext, log: &str) -> Result<ExitCode, CommandError> {
    let path = Path::new(log);
    let document = if path.is_file() {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CommandError::Io {
                context: format!("reading '{log}'"),
                reason: e.to_string(),
            })?
    } else {
        FileLogStore::new(context.paths().logs_dir())
            .read_log(log)
            .await?
    };

    let report = audit_logger(context).verify(&document);
    match (&report.log, &report.error) {
        (Some(entry), None) if report.valid => {
            println!(
                "valid: task {} execution {} ({}) at {}",
                entry.task_id, entry.execution_id, entry.status, entry.timestamp
            );
            Ok(ExitCode::SUCCESS)
        }
        (_, Some(error)) => {
            println!("invalid: {error}");
            Ok(ExitCode::FAILURE)
        }
        _ => {
            println!("invalid");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn list_logs(context: &AppContext, task: Option<String>) -> Result<ExitCode, CommandError> {
    let task = task.map(TaskId::new).transpose()?;
    let store = FileLogStore::new(context.paths().logs_dir());
    for entry in store.list_logs(task.as_ref()).await? {
        println!("{}", entry.name);
    }
    Ok(ExitCode::SUCCESS)
}

fn translate_expression(expression: &str) -> Result<ExitCode, CommandError> {
    let trigger = translate(expression)?;
    let json = serde_json::to_string_pretty(&trigger).map_err(|e| CommandError::Io {
        context: "rendering trigger".to_string(),
        reason: e.to_string(),
    })?;
    println!("{trigger}");
    println!("{json}");
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskward_core::{InvocationMode, TaskDefinition};

    fn write_task(dir: &Path, task: &TaskDefinition) -> PathBuf {
        let tasks = dir.join("tasks");
        std::fs::create_dir_all(&tasks).expect("mkdir");
        let path = tasks.join(format!("{}.md", task.id));
        std::fs::write(&path, task.to_document().expect("render")).expect("write");
        path
    }

    #[tokio::test]
    async fn translate_rejects_bad_expression() {
        let err = dispatch(
            Command::Translate {
                expression: "61 * * * *".to_string(),
            },
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CommandError::Schedule(_)));
    }

    #[tokio::test]
    async fn translate_accepts_daily_expression() {
        let code = dispatch(
            Command::Translate {
                expression: "30 9 * * *".to_string(),
            },
            None,
        )
        .await
        .expect("translate");
        assert_eq!(code, ExitCode::SUCCESS);
    }

    #[tokio::test]
    async fn run_writes_a_log_that_verifies() {
        let dir = tempfile::tempdir().expect("tempdir");
        let task = TaskDefinition::new(
            TaskId::new("nightly").expect("valid id"),
            "0 9 * * *",
            "Summarize the inbox.",
        )
        .with_invocation(InvocationMode::Cli)
        .with_enabled(false);
        let task_file = write_task(dir.path(), &task);

        let code = dispatch(
            Command::Run {
                task_file,
                cli_path: None,
            },
            Some(dir.path()),
        )
        .await
        .expect("run");
        assert_eq!(code, ExitCode::FAILURE);

        let context = AppContext::load(Some(dir.path())).expect("config");
        let logs = FileLogStore::new(context.paths().logs_dir())
            .list_logs(Some(&task.id))
            .await
            .expect("list");
        assert_eq!(logs.len(), 1);

        let code = dispatch(
            Command::Verify {
                log: logs[0].name.clone(),
            },
            Some(dir.path()),
        )
        .await
        .expect("verify");
        assert_eq!(code, ExitCode::SUCCESS);

        let tampered = std::fs::read_to_string(&logs[0].path)
            .expect("read")
            .replace("task is disabled", "task is fine");
        let tampered_path = dir.path().join("tampered.md");
        std::fs::write(&tampered_path, tampered).expect("write");
        let code = dispatch(
            Command::Verify {
                log: tampered_path.display().to_string(),
            },
            Some(dir.path()),
        )
        .await
        .expect("verify");
        assert_eq!(code, ExitCode::FAILURE);
    }

    #[tokio::test]
    async fn register_unknown_task_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = dispatch(
            Command::Register {
                task_id: "ghost".to_string(),
            },
            Some(dir.path()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CommandError::TaskNotFound { .. }));
    }

    #[tokio::test]
    async fn invalid_task_id_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = dispatch(
            Command::Status {
                task_id: "../etc".to_string(),
            },
            Some(dir.path()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CommandError::InvalidTaskId(_)));
    }
}
