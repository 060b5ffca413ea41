//! Job record -- one persisted row per execution attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::identity::TaskIdentity;
use crate::types::state::JobState;

/// Persisted state of one job submitted to the edge worker fleet.
///
/// `id` is the storage-level identity of the row. Lookups always go
/// through [`key`](Self::key); two rows may share a task identity when the
/// same attempt is submitted twice.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use edge_executor::{JobRecord, JobState, TaskIdentity};
///
/// let key = TaskIdentity::new("etl", "run-1", "load", -1, 1);
/// let record = JobRecord::queued(key.clone(), "default", "{}".to_string(), 2, Utc::now());
/// assert_eq!(record.state, JobState::Queued);
/// assert_eq!(record.concurrency_slots, 2);
/// assert_eq!(record.key(), key);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Storage-level row id.
    pub id: Uuid,
    /// Workflow the task belongs to.
    pub workflow_id: String,
    /// Run of the workflow.
    pub run_id: String,
    /// Task within the workflow.
    pub task_id: String,
    /// Index within a mapped task.
    pub map_index: i32,
    /// Attempt counter.
    pub attempt_number: u32,
    /// Current lifecycle state.
    pub state: JobState,
    /// Queue label selecting a worker pool.
    pub queue: String,
    /// Serialized [`Command`](crate::types::command::Command).
    pub command: String,
    /// Concurrency slots charged against the owning pool. Always >= 1.
    pub concurrency_slots: u32,
    /// Last heartbeat or status write.
    pub last_update: DateTime<Utc>,
}

impl JobRecord {
    /// Creates a fresh record in the `Queued` state.
    pub fn queued(
        key: TaskIdentity,
        queue: impl Into<String>,
        command: String,
        concurrency_slots: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: key.workflow_id,
            run_id: key.run_id,
            task_id: key.task_id,
            map_index: key.map_index,
            attempt_number: key.attempt_number,
            state: JobState::Queued,
            queue: queue.into(),
            command,
            concurrency_slots,
            last_update: now,
        }
    }

    /// Returns the task identity of this job.
    pub fn key(&self) -> TaskIdentity {
        TaskIdentity::new(
            self.workflow_id.clone(),
            self.run_id.clone(),
            self.task_id.clone(),
            self.map_index,
            self.attempt_number,
        )
    }

    /// Returns `true` if the record belongs to `key`, without allocating.
    pub fn matches_key(&self, key: &TaskIdentity) -> bool {
        self.workflow_id == key.workflow_id
            && self.run_id == key.run_id
            && self.task_id == key.task_id
            && self.map_index == key.map_index
            && self.attempt_number == key.attempt_number
    }

    /// Returns `true` if `last_update` is strictly before `cutoff`.
    pub fn updated_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_update < cutoff
    }
}

/// Field changes applied by [`JobStore::update`](crate::store::JobStore::update).
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobUpdate {
    /// New state; validated against the state machine.
    pub state: Option<JobState>,
    /// New heartbeat time; never moves `last_update` backwards.
    pub last_update: Option<DateTime<Utc>>,
}

impl JobUpdate {
    /// Update that sets a new state and heartbeat time.
    pub fn transition(state: JobState, now: DateTime<Utc>) -> Self {
        Self {
            state: Some(state),
            last_update: Some(now),
        }
    }

    /// Update that only refreshes the heartbeat time.
    pub fn heartbeat(now: DateTime<Utc>) -> Self {
        Self {
            state: None,
            last_update: Some(now),
        }
    }
}
