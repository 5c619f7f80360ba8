//! Centralized configuration.
//!
//! [`AppConfig`] is loaded via the `config` crate from built-in defaults,
//! an optional `taskward.toml` in the configuration directory, and
//! environment variables prefixed `TASKWARD` with `__` as the section
//! separator (for example `TASKWARD__EXECUTION__TIMEOUT_SECS=120`).
//!
//! [`AppContext`] wraps the loaded configuration. It is built once at
//! process start and handed to the audit logger, executor and registrar
//! explicitly.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the optional configuration file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "taskward.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "TASKWARD";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Filesystem locations.
    pub paths: PathsConfig,

    /// Task execution settings.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Remote API settings for `api` invocation.
    #[serde(default)]
    pub api: ApiConfig,

    /// Native scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Filesystem locations.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the signing key and `taskward.toml`.
    pub config_dir: PathBuf,
    /// Directory of task documents. Defaults to `<config_dir>/tasks`.
    #[serde(default)]
    pub tasks_dir: Option<PathBuf>,
    /// Directory of execution logs. Defaults to `<config_dir>/logs`.
    #[serde(default)]
    pub logs_dir: Option<PathBuf>,
    /// Directory of runtime state such as locks. Defaults to `<config_dir>/state`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

impl PathsConfig {
    /// Creates a layout rooted at `config_dir` with default subdirectories.
    #[must_use]
    pub fn rooted_at(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            tasks_dir: None,
            logs_dir: None,
            state_dir: None,
        }
    }

    /// Directory of task documents.
    #[must_use]
    pub fn tasks_dir(&self) -> PathBuf {
        self.tasks_dir
            .clone()
            .unwrap_or_else(|| self.config_dir.join("tasks"))
    }

    /// Directory of execution logs.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.logs_dir
            .clone()
            .unwrap_or_else(|| self.config_dir.join("logs"))
    }

    /// Directory of runtime state.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.config_dir.join("state"))
    }

    /// Directory of per-task execution locks.
    #[must_use]
    pub fn locks_dir(&self) -> PathBuf {
        self.state_dir().join("locks")
    }

    /// Path of the persisted signing key.
    #[must_use]
    pub fn signing_key_file(&self) -> PathBuf {
        self.config_dir.join("signing.key")
    }
}

/// Task execution settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Upper bound on a CLI execution's wall-clock time.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// External CLI tool used for `cli` invocation.
    #[serde(default = "default_cli_command")]
    pub cli_command: String,

    /// Flags that make the CLI tool run non-interactively and exit when done.
    #[serde(default = "default_cli_args")]
    pub cli_args: Vec<String>,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_cli_command() -> String {
    "claude".to_string()
}

fn default_cli_args() -> Vec<String> {
    vec![
        "--dangerously-skip-permissions".to_string(),
        "--print".to_string(),
    ]
}

impl ExecutionConfig {
    /// The execution timeout as a duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            cli_command: default_cli_command(),
            cli_args: default_cli_args(),
        }
    }
}

/// Remote text-generation API settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the API.
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// Model identifier.
    #[serde(default = "default_api_model")]
    pub model: String,

    /// Maximum tokens to generate.
    #[serde(default = "default_api_max_tokens")]
    pub max_tokens: u32,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Value of the API version header.
    #[serde(default = "default_api_version")]
    pub version_header: String,
}

fn default_api_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_api_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_api_max_tokens() -> u32 {
    4096
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_api_version() -> String {
    "2023-06-01".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            model: default_api_model(),
            max_tokens: default_api_max_tokens(),
            api_key_env: default_api_key_env(),
            version_header: default_api_version(),
        }
    }
}

/// Which native scheduler adapter to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerBackend {
    /// Pick the adapter for the current platform.
    #[default]
    Auto,
    /// Windows Task Scheduler through PowerShell.
    Powershell,
    /// The user's crontab.
    Crontab,
}

/// Native scheduler settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Prefix of every native scheduler object name.
    #[serde(default = "default_task_prefix")]
    pub task_prefix: String,

    /// Adapter selection.
    #[serde(default)]
    pub backend: SchedulerBackend,
}

fn default_task_prefix() -> String {
    "Taskward_".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            task_prefix: default_task_prefix(),
            backend: SchedulerBackend::default(),
        }
    }
}

impl AppConfig {
    /// Creates a configuration with defaults rooted at `config_dir`.
    #[must_use]
    pub fn with_config_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig::rooted_at(config_dir),
            execution: ExecutionConfig::default(),
            api: ApiConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }

    /// Loads configuration from defaults, the config file, and the environment.
    ///
    /// `config_dir` overrides the platform default location.
    ///
    /// # Errors
    ///
    /// Returns an error if no config directory can be determined, or if a
    /// source is unreadable or does not match the schema.
    pub fn load(config_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let config_dir = match config_dir {
            Some(dir) => dir.to_path_buf(),
            None => default_config_dir().ok_or(ConfigError::NoConfigDir)?,
        };

        let settings = config::Config::builder()
            .set_default("paths.config_dir", config_dir.display().to_string())?
            .add_source(config::File::from(config_dir.join(CONFIG_FILE_NAME)).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("execution.cli_args")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }
}

/// Returns the platform default configuration directory.
#[must_use]
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("taskward"))
}

/// Explicit configuration context passed to the core services.
#[derive(Debug, Clone)]
pub struct AppContext {
    config: AppConfig,
}

impl AppContext {
    /// Wraps a loaded configuration.
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Loads configuration and builds the context.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading fails.
    pub fn load(config_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let config = AppConfig::load(config_dir)?;
        tracing::debug!(config_dir = %config.paths.config_dir.display(), "loaded configuration");
        Ok(Self::new(config))
    }

    /// The full configuration.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Filesystem locations.
    #[must_use]
    pub fn paths(&self) -> &PathsConfig {
        &self.config.paths
    }

    /// Execution settings.
    #[must_use]
    pub fn execution(&self) -> &ExecutionConfig {
        &self.config.execution
    }

    /// API settings.
    #[must_use]
    pub fn api(&self) -> &ApiConfig {
        &self.config.api
    }

    /// Native scheduler settings.
    #[must_use]
    pub fn scheduler(&self) -> &SchedulerConfig {
        &self.config.scheduler
    }
}
