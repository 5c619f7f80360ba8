//! Task definitions and the storage collaborator contract.
//!
//! A task is stored as a document whose TOML header carries the schedule
//! and execution settings and whose body is the free-form instruction text
//! handed to the invocation backend:
//!
//! ```text
//! +++
//! id = "daily-report"
//! schedule = "0 9 * * *"
//! invocation = "cli"
//!
//! [notifications]
//! toast = true
//! +++
//! Summarize yesterday's commits.
//! ```
//!
//! `id` and `schedule` are required; every other field has a default.
//! Unknown header keys are rejected.

use crate::error::TaskParseError;
use crate::frontmatter;
use crate::id::TaskId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The execution backend for a task body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationMode {
    /// Run the external CLI tool as a subprocess.
    #[default]
    Cli,
    /// Send the instructions to the remote text-generation API.
    Api,
}

impl InvocationMode {
    /// Returns the mode as its wire string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cli => "cli",
            Self::Api => "api",
        }
    }
}

impl fmt::Display for InvocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion notification settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Notifications {
    /// Whether a desktop notification is raised when an execution finishes.
    #[serde(default)]
    pub toast: bool,
}

/// Header schema of a task document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskHeader {
    id: TaskId,
    schedule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    invocation: InvocationMode,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    notifications: Notifications,
}

fn default_enabled() -> bool {
    true
}

/// A scheduled task definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    /// Stable identifier.
    pub id: TaskId,
    /// Cron expression.
    pub schedule: String,
    /// Display name.
    pub name: Option<String>,
    /// Short description.
    pub description: Option<String>,
    /// Execution backend.
    pub invocation: InvocationMode,
    /// Completion notification settings.
    pub notifications: Notifications,
    /// Whether the task should run when triggered.
    pub enabled: bool,
    /// When the definition was created.
    pub created_at: Option<DateTime<Utc>>,
    /// When the definition was last updated.
    pub updated_at: Option<DateTime<Utc>>,
    /// Instruction text passed to the invocation backend.
    pub instructions: String,
}

impl TaskDefinition {
    /// Creates an enabled CLI task with default settings.
    #[must_use]
    pub fn new(id: TaskId, schedule: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            id,
            schedule: schedule.into(),
            name: None,
            description: None,
            invocation: InvocationMode::default(),
            notifications: Notifications::default(),
            enabled: true,
            created_at: None,
            updated_at: None,
            instructions: instructions.into(),
        }
    }

    /// Sets the invocation mode.
    #[must_use]
    pub fn with_invocation(mut self, invocation: InvocationMode) -> Self {
        self.invocation = invocation;
        self
    }

    /// Sets whether the task is enabled.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Enables or disables the completion notification.
    #[must_use]
    pub fn with_toast(mut self, toast: bool) -> Self {
        self.notifications.toast = toast;
        self
    }

    /// Returns the name to show to people, falling back to the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    /// Parses a task document.
    ///
    /// # Errors
    ///
    /// Returns an error if the framing is broken, a required field is
    /// missing, a field has the wrong type, or an unknown key is present.
    pub fn from_document(document: &str) -> Result<Self, TaskParseError> {
        let (header, body) = frontmatter::split(document)?;
        let header: TaskHeader =
            toml::from_str(header).map_err(|e| TaskParseError::InvalidHeader {
                reason: e.message().to_string(),
            })?;
        if header.schedule.trim().is_empty() {
            return Err(TaskParseError::InvalidHeader {
                reason: "schedule must not be empty".to_string(),
            });
        }

        Ok(Self {
            id: header.id,
            schedule: header.schedule,
            name: header.name,
            description: header.description,
            invocation: header.invocation,
            notifications: header.notifications,
            enabled: header.enabled,
            created_at: header.created_at,
            updated_at: header.updated_at,
            instructions: body.trim().to_string(),
        })
    }

    /// Renders the task as a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be serialized.
    pub fn to_document(&self) -> Result<String, TaskParseError> {
        let header = TaskHeader {
            id: self.id.clone(),
            schedule: self.schedule.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            invocation: self.invocation,
            enabled: self.enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
            notifications: self.notifications,
        };
        let header = toml::to_string(&header).map_err(|e| TaskParseError::SerializeFailed {
            reason: e.to_string(),
        })?;
        let mut body = self.instructions.clone();
        body.push('\n');
        Ok(frontmatter::join(&header, &body))
    }

    /// Returns the listing summary of this task.
    #[must_use]
    pub fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            id: self.id.clone(),
            name: self.name.clone(),
            schedule: self.schedule.clone(),
            invocation: self.invocation,
            enabled: self.enabled,
        }
    }
}

/// Listing summary of a stored task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Task id.
    pub id: TaskId,
    /// Display name.
    pub name: Option<String>,
    /// Cron expression.
    pub schedule: String,
    /// Execution backend.
    pub invocation: InvocationMode,
    /// Whether the task is enabled.
    pub enabled: bool,
}

/// Storage collaborator that owns task definitions.
///
/// The core only reads definitions through this trait; creation and
/// editing belong to whatever backs it.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Error type of the backing storage.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the path of the document that stores the task.
    fn task_file_path(&self, id: &TaskId) -> PathBuf;

    /// Loads a task, or `None` if it does not exist.
    async fn get_task(&self, id: &TaskId) -> Result<Option<TaskDefinition>, Self::Error>;

    /// Lists all stored tasks.
    async fn list_tasks(&self) -> Result<Vec<TaskMetadata>, Self::Error>;

    /// Returns whether a task exists.
    async fn exists(&self, id: &TaskId) -> Result<bool, Self::Error>;
}
