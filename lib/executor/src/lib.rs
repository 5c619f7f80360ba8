//! Task execution.
//!
//! [`TaskExecutor`] runs a [`taskward_core::TaskDefinition`] either by
//! spawning an external agent CLI ([`cli`]) or by calling a remote
//! text-generation API ([`api`]), records each step in an execution log
//! and finalizes that log through the audit logger.

pub mod api;
pub mod cli;
pub mod error;
pub mod executor;
pub mod notify;

pub use api::ApiClient;
pub use cli::{CliExit, CliRunner};
pub use error::{ExecutionError, NotifyError};
pub use executor::{ExecutionSummary, TaskExecutor};
pub use notify::{Notifier, TracingNotifier};
