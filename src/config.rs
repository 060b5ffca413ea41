//! Executor configuration.
//!
//! [`ExecutorConfig`] holds every operator-tunable window. It is usually
//! loaded from a TOML file, optionally overridden by environment variables.
//!
//! # Example Configuration File
//!
//! ```toml
//! heartbeat_timeout_secs = 300
//! purge_retention_secs = 3600
//! success_purge_retention_secs = 300
//! heartbeat_interval_secs = 30
//! sync_interval_secs = 5
//! default_queue = "default"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_HEARTBEAT_TIMEOUT_SECS, DEFAULT_PURGE_RETENTION_SECS,
    DEFAULT_QUEUE, DEFAULT_RUNNER_PROGRAM, DEFAULT_SYNC_INTERVAL_SECS, ENV_PREFIX,
};
use crate::error::ConfigError;

/// Configuration of the admission controller and reconciliation engine.
///
/// `heartbeat_timeout` (orphan detection) and `purge_retention` (record
/// retention) are independent windows; [`validate`](Self::validate)
/// requires the former to be strictly shorter.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use edge_executor::config::ExecutorConfig;
///
/// let config = ExecutorConfig::from_toml(
///     "heartbeat_timeout_secs = 60\npurge_retention_secs = 600\n",
/// )
/// .unwrap();
/// assert_eq!(config.heartbeat_timeout(), Duration::from_secs(60));
/// assert_eq!(config.success_purge_retention(), Duration::from_secs(600));
/// assert_eq!(config.default_queue, "default");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// A running job without a heartbeat for this long is reclaimed.
    pub heartbeat_timeout_secs: u64,

    /// Terminal jobs older than this are purged.
    pub purge_retention_secs: u64,

    /// Retention for successful jobs; falls back to `purge_retention_secs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_purge_retention_secs: Option<u64>,

    /// Interval at which workers are expected to heartbeat.
    pub heartbeat_interval_secs: u64,

    /// Number of heartbeat intervals a worker may miss before it is
    /// considered unknown.
    pub missed_heartbeats: u32,

    /// Polling period of the sync loop.
    pub sync_interval_secs: u64,

    /// Queue used when a submission carries an empty queue label.
    pub default_queue: String,

    /// Program name argv commands must start with.
    pub runner_program: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: DEFAULT_HEARTBEAT_TIMEOUT_SECS,
            purge_retention_secs: DEFAULT_PURGE_RETENTION_SECS,
            success_purge_retention_secs: None,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            missed_heartbeats: 1,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            default_queue: DEFAULT_QUEUE.to_string(),
            runner_program: DEFAULT_RUNNER_PROGRAM.to_string(),
        }
    }
}

impl ExecutorConfig {
    /// Load configuration from a TOML file and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed or fails
    /// validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// Missing keys take their default values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on parse or validation failure.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialize`] if rendering fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Overrides fields from `EDGE_EXECUTOR_*` environment variables.
    ///
    /// Recognized variables: `EDGE_EXECUTOR_HEARTBEAT_TIMEOUT_SECS`,
    /// `EDGE_EXECUTOR_PURGE_RETENTION_SECS`,
    /// `EDGE_EXECUTOR_SUCCESS_PURGE_RETENTION_SECS`,
    /// `EDGE_EXECUTOR_HEARTBEAT_INTERVAL_SECS`,
    /// `EDGE_EXECUTOR_MISSED_HEARTBEATS`, `EDGE_EXECUTOR_SYNC_INTERVAL_SECS`,
    /// `EDGE_EXECUTOR_DEFAULT_QUEUE` and `EDGE_EXECUTOR_RUNNER_PROGRAM`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a numeric variable does not
    /// parse or the result fails validation.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())
    }

    /// Builds a configuration from defaults plus environment overrides.
    ///
    /// # Errors
    ///
    /// See [`with_env_overrides`](Self::with_env_overrides).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
            raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{ENV_PREFIX}{name}: cannot parse {raw:?}"))
            })
        }

        if let Some(raw) = lookup("HEARTBEAT_TIMEOUT_SECS") {
            self.heartbeat_timeout_secs = parse("HEARTBEAT_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("PURGE_RETENTION_SECS") {
            self.purge_retention_secs = parse("PURGE_RETENTION_SECS", &raw)?;
        }
        if let Some(raw) = lookup("SUCCESS_PURGE_RETENTION_SECS") {
            self.success_purge_retention_secs = Some(parse("SUCCESS_PURGE_RETENTION_SECS", &raw)?);
        }
        if let Some(raw) = lookup("HEARTBEAT_INTERVAL_SECS") {
            self.heartbeat_interval_secs = parse("HEARTBEAT_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("MISSED_HEARTBEATS") {
            self.missed_heartbeats = parse("MISSED_HEARTBEATS", &raw)?;
        }
        if let Some(raw) = lookup("SYNC_INTERVAL_SECS") {
            self.sync_interval_secs = parse("SYNC_INTERVAL_SECS", &raw)?;
        }
        if let Some(queue) = lookup("DEFAULT_QUEUE") {
            self.default_queue = queue;
        }
        if let Some(program) = lookup("RUNNER_PROGRAM") {
            self.runner_program = program;
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks the windows are positive and not conflated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("heartbeat_timeout_secs", self.heartbeat_timeout_secs),
            ("purge_retention_secs", self.purge_retention_secs),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("sync_interval_secs", self.sync_interval_secs),
            ("missed_heartbeats", u64::from(self.missed_heartbeats)),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if self.heartbeat_timeout_secs >= self.purge_retention_secs {
            return Err(ConfigError::Invalid(format!(
                "heartbeat_timeout_secs ({}) must be shorter than purge_retention_secs ({})",
                self.heartbeat_timeout_secs, self.purge_retention_secs
            )));
        }
        if let Some(success) = self.success_purge_retention_secs {
            if self.heartbeat_timeout_secs >= success {
                return Err(ConfigError::Invalid(format!(
                    "heartbeat_timeout_secs ({}) must be shorter than success_purge_retention_secs ({success})",
                    self.heartbeat_timeout_secs
                )));
            }
        }
        if self.default_queue.is_empty() {
            return Err(ConfigError::Invalid("default_queue must not be empty".to_string()));
        }
        if self.runner_program.is_empty() {
            return Err(ConfigError::Invalid("runner_program must not be empty".to_string()));
        }
        Ok(())
    }

    /// Orphan detection window.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Retention of failed and removed jobs.
    pub fn purge_retention(&self) -> Duration {
        Duration::from_secs(self.purge_retention_secs)
    }

    /// Retention of successful jobs.
    pub fn success_purge_retention(&self) -> Duration {
        Duration::from_secs(
            self.success_purge_retention_secs
                .unwrap_or(self.purge_retention_secs),
        )
    }

    /// Expected worker heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Polling period of the sync loop.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}
