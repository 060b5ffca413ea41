//! Error types for the edge executor.
//!
//! [`ValidationError`] is surfaced synchronously to producers.
//! [`StoreError`] is raised by record stores and, inside a sync cycle, only
//! logged. [`NotifyError`] comes from callbacks and metric sinks and is
//! never propagated. [`ExecutorError`] wraps all of them for public APIs.

use thiserror::Error;

use crate::types::state::JobState;

/// A submission was rejected before anything was persisted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The command is not a task-run invocation.
    #[error("malformed command: {reason}")]
    MalformedCommand {
        /// What is wrong with the command.
        reason: String,
    },

    /// Pool slots must be at least 1.
    #[error("invalid pool slots {slots}: a job must occupy at least one slot")]
    InvalidPoolSlots {
        /// The rejected slot count.
        slots: u32,
    },

    /// The workload describes a different task than the one submitted.
    #[error("workload identity {workload} does not match submitted task {submitted}")]
    IdentityMismatch {
        /// Identity the caller submitted under.
        submitted: String,
        /// Identity carried by the workload.
        workload: String,
    },

    /// An explicit queue or slot count disagrees with the workload.
    #[error("{field} {submitted} does not match workload {field} {workload}")]
    WorkloadMismatch {
        /// Which submission argument disagrees.
        field: &'static str,
        /// Value the caller passed.
        submitted: String,
        /// Value carried by the workload.
        workload: String,
    },
}

/// Failure of a job or worker store operation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The write would violate the job state machine.
    #[error("invalid transition from {from} to {to} for job {key}")]
    InvalidTransition {
        /// Job the write targeted.
        key: String,
        /// Current state.
        from: JobState,
        /// Rejected target state.
        to: JobState,
    },

    /// I/O or backend-specific failure (connection loss, timeout, ...).
    #[error("backend error: {message}")]
    Backend {
        /// Human-readable description.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StoreError {
    /// Shorthand for a [`StoreError::Backend`] without a source.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }
}

/// A callback or metric sink failed to deliver a notification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

impl NotifyError {
    /// Creates a notification error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Configuration could not be loaded or is inconsistent.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration text is not valid TOML for [`ExecutorConfig`](crate::config::ExecutorConfig).
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be rendered as TOML.
    #[error("TOML serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Values parsed but violate a constraint.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Umbrella error for the public executor API.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// Submission rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ExecutorError {
    /// Returns `true` if the error is a rejected submission.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Result alias for executor operations.
pub type Result<T, E = ExecutorError> = std::result::Result<T, E>;
