//! The taskward executable.
//!
//! The native scheduler calls `taskward run <task-file>` at each trigger;
//! the remaining subcommands manage registrations and inspect logs.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "taskward")]
#[command(version)]
#[command(about = "Run agent tasks on a schedule and keep signed execution logs")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration directory (defaults to the platform config dir).
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a task definition file now.
    Run {
        /// Path to the task document.
        task_file: PathBuf,
        /// Resolved path of the CLI tool, overriding the configured command.
        #[arg(long)]
        cli_path: Option<PathBuf>,
    },
    /// Install or replace the native trigger for a task.
    Register {
        task_id: String,
    },
    /// Remove the native trigger for a task.
    Unregister {
        task_id: String,
    },
    /// Enable the native trigger for a task.
    Enable {
        task_id: String,
    },
    /// Disable the native trigger for a task.
    Disable {
        task_id: String,
    },
    /// Show the native state of a task.
    Status {
        task_id: String,
    },
    /// List stored task definitions.
    Tasks,
    /// Check the signature of an execution log.
    Verify {
        /// Log file path, or a file name inside the log directory.
        log: String,
    },
    /// List execution logs.
    Logs {
        /// Only show logs for this task.
        #[arg(short, long)]
        task: Option<String>,
    },
    /// Show the native trigger a cron expression translates to.
    Translate {
        /// Five-field cron expression.
        expression: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout belongs to the CLI tool and command output.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match commands::dispatch(cli.command, cli.config_dir.as_deref()).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
