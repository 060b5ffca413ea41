//! Job and worker state enums.
//!
//! [`JobState`] carries the job state machine used to validate every write
//! to a job record. [`WorkerState`] is the self-reported state of an edge
//! worker, plus the `Unknown` state assigned by liveness classification.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::identity::TaskIdentity;

/// Lifecycle state of a job record.
///
/// # State Machine
///
/// ```text
/// Queued  -> Running, Success, Failed, Removed
/// Running -> Success, Failed, Removed
/// Success -> (terminal)
/// Failed  -> (terminal)
/// Removed -> (terminal)
/// ```
///
/// Self-transitions are rejected.
///
/// # Examples
///
/// ```
/// use edge_executor::JobState;
///
/// assert!(JobState::Queued.can_transition_to(&JobState::Running));
/// assert!(JobState::Running.can_transition_to(&JobState::Removed));
/// assert!(!JobState::Success.can_transition_to(&JobState::Running));
/// assert!(!JobState::Running.can_transition_to(&JobState::Running));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Admitted, waiting for a worker to claim it.
    Queued,
    /// Claimed and executing on a worker.
    Running,
    /// Finished successfully (terminal).
    Success,
    /// Finished with an error (terminal).
    Failed,
    /// Reclaimed or revoked by the executor (terminal).
    Removed,
}

impl JobState {
    /// Every job state, in lifecycle order.
    pub const ALL: [JobState; 5] = [
        Self::Queued,
        Self::Running,
        Self::Success,
        Self::Failed,
        Self::Removed,
    ];

    /// The terminal states, eligible for purge.
    pub const TERMINAL: [JobState; 3] = [Self::Success, Self::Failed, Self::Removed];

    /// Returns `true` for `Success`, `Failed` and `Removed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Removed)
    }

    /// Returns `true` if moving from this state to `next` is allowed.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        if self == next {
            return false;
        }
        match self {
            Self::Queued => true,
            Self::Running => next.is_terminal(),
            Self::Success | Self::Failed | Self::Removed => false,
        }
    }

    /// Validates a transition for the job identified by `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] if the state machine
    /// rejects the move.
    pub fn validate_transition(&self, key: &TaskIdentity, next: &Self) -> Result<(), StoreError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(StoreError::InvalidTransition {
                key: key.to_string(),
                from: *self,
                to: *next,
            })
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// State of an edge worker.
///
/// Most states are reported by the worker itself. `Unknown` is assigned by
/// the liveness classifier when heartbeats stop arriving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Worker process is booting.
    Starting,
    /// Worker is executing at least one job.
    Running,
    /// Worker is connected and has no job.
    Idle,
    /// Worker is draining before shutdown.
    Terminating,
    /// Worker shut down cleanly.
    Offline,
    /// Heartbeats stopped arriving.
    Unknown,
    /// Operator asked the worker to enter maintenance.
    MaintenanceRequest,
    /// Worker is finishing jobs before maintenance.
    MaintenancePending,
    /// Worker is in maintenance and takes no jobs.
    MaintenanceMode,
    /// Worker is leaving maintenance.
    MaintenanceExit,
    /// Worker shut down while in maintenance.
    OfflineMaintenance,
}

impl WorkerState {
    /// States a live worker reports about itself. Staleness detection only
    /// applies to these.
    pub const ACTIVE: [WorkerState; 8] = [
        Self::Starting,
        Self::Running,
        Self::Idle,
        Self::Terminating,
        Self::MaintenanceRequest,
        Self::MaintenancePending,
        Self::MaintenanceMode,
        Self::MaintenanceExit,
    ];
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Idle => "idle",
            Self::Terminating => "terminating",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
            Self::MaintenanceRequest => "maintenance request",
            Self::MaintenancePending => "maintenance pending",
            Self::MaintenanceMode => "maintenance mode",
            Self::MaintenanceExit => "maintenance exit",
            Self::OfflineMaintenance => "offline maintenance",
        };
        f.write_str(name)
    }
}
