//! File-backed storage for task definitions and execution logs.

pub mod error;
pub mod log;
pub mod task;

pub use error::StoreError;
pub use log::{FileLogStore, LogEntry, log_file_name};
pub use task::{FileTaskStore, load_task_file};
