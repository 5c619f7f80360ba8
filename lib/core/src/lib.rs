//! Core domain types and utilities for taskward.
//!
//! This crate provides the types every other taskward crate agrees on:
//! task definitions and their on-disk schema, execution identifiers,
//! the explicit configuration context, and the per-task execution lock.

pub mod config;
pub mod error;
pub mod frontmatter;
pub mod id;
pub mod lock;
pub mod task;

pub use config::{AppConfig, AppContext};
pub use error::{ConfigError, FrontmatterError, LockError, Result, TaskParseError};
pub use id::{ExecutionId, ParseIdError, TaskId};
pub use lock::ExecutionLock;
pub use task::{InvocationMode, Notifications, TaskDefinition, TaskMetadata, TaskStore};
