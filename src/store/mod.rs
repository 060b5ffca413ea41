//! Record store traits and filter predicates.
//!
//! # Architecture
//!
//! The reconciliation core never talks to a database directly. It goes
//! through two narrow repository traits:
//!
//! 1. **[`JobStore`]** -- `insert`, `find`, `update`, `delete` over
//!    [`JobRecord`]s, keyed by [`TaskIdentity`].
//! 2. **[`WorkerStore`]** -- `upsert` and `find` over [`WorkerRecord`]s,
//!    keyed by worker name.
//!
//! Both are `Send + Sync` and used as `Arc<dyn JobStore>` /
//! `Arc<dyn WorkerStore>` so a relational backend and the in-memory
//! backends in [`memory`] are interchangeable.
//!
//! # Conditional writes
//!
//! `update`, `delete` and `upsert` accept an optional `only_if` filter.
//! A row is written only if it still matches the filter at write time,
//! which gives compare-and-set semantics without locking the queue: if a
//! worker reports `Success` between the orphan scan's read and its write,
//! the `only_if` state check fails and the worker's write stands.
//!
//! # Isolation
//!
//! Implementations must provide per-row atomic writes and read-committed
//! (or stronger) reads, so a partially written record is never observed.

pub mod memory;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{JobRecord, JobUpdate, WorkerRecord, WorkerUpdate};
pub use crate::error::StoreError;
use crate::types::identity::TaskIdentity;
use crate::types::state::{JobState, WorkerState};

/// Predicate over job records. Unset fields match everything.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use edge_executor::store::JobFilter;
/// use edge_executor::{JobRecord, JobState, TaskIdentity};
///
/// let record = JobRecord::queued(
///     TaskIdentity::new("wf", "run", "task", -1, 1),
///     "default",
///     String::new(),
///     1,
///     Utc::now(),
/// );
/// assert!(JobFilter::all().matches(&record));
/// assert!(JobFilter::all().with_state(JobState::Queued).matches(&record));
/// assert!(!JobFilter::all().with_state(JobState::Running).matches(&record));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    /// Restrict to these task identities.
    pub keys: Option<HashSet<TaskIdentity>>,
    /// Restrict to these states.
    pub states: Option<Vec<JobState>>,
    /// Restrict to records whose `last_update` is strictly earlier.
    pub updated_before: Option<DateTime<Utc>>,
}

impl JobFilter {
    /// Filter matching every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter matching records of the given identities.
    pub fn for_keys<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = TaskIdentity>,
    {
        Self {
            keys: Some(keys.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Restricts the filter to a single state.
    pub fn with_state(mut self, state: JobState) -> Self {
        self.states = Some(vec![state]);
        self
    }

    /// Restricts the filter to any of `states`.
    pub fn with_states(mut self, states: impl IntoIterator<Item = JobState>) -> Self {
        self.states = Some(states.into_iter().collect());
        self
    }

    /// Restricts the filter to records last updated before `cutoff`.
    pub fn updated_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.updated_before = Some(cutoff);
        self
    }

    /// Evaluates the predicate against one record.
    pub fn matches(&self, record: &JobRecord) -> bool {
        if let Some(keys) = &self.keys {
            if !keys.iter().any(|key| record.matches_key(key)) {
                return false;
            }
        }
        if let Some(states) = &self.states {
            if !states.contains(&record.state) {
                return false;
            }
        }
        if let Some(cutoff) = self.updated_before {
            if !record.updated_before(cutoff) {
                return false;
            }
        }
        true
    }
}

/// Predicate over worker records. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerFilter {
    /// Restrict to these states.
    pub states: Option<Vec<WorkerState>>,
    /// Restrict to workers whose last heartbeat is strictly earlier.
    pub updated_before: Option<DateTime<Utc>>,
}

impl WorkerFilter {
    /// Filter matching every worker.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts the filter to any of `states`.
    pub fn with_states(mut self, states: impl IntoIterator<Item = WorkerState>) -> Self {
        self.states = Some(states.into_iter().collect());
        self
    }

    /// Restricts the filter to workers last seen before `cutoff`.
    pub fn updated_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.updated_before = Some(cutoff);
        self
    }

    /// Evaluates the predicate against one record.
    pub fn matches(&self, record: &WorkerRecord) -> bool {
        if let Some(states) = &self.states {
            if !states.contains(&record.state) {
                return false;
            }
        }
        if let Some(cutoff) = self.updated_before {
            if record.last_update >= cutoff {
                return false;
            }
        }
        true
    }
}

/// Durable table of job records.
///
/// # Errors
///
/// Every method returns [`StoreError::Backend`] on I/O failures. Writes
/// that would move a record backwards in the job state machine return
/// [`StoreError::InvalidTransition`].
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a new row. Duplicate identities produce separate rows.
    async fn insert(&self, record: JobRecord) -> Result<(), StoreError>;

    /// Returns all rows matching `filter`, oldest `last_update` first.
    async fn find(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError>;

    /// Applies `update` to every row of `key` that also matches `only_if`.
    ///
    /// Returns the number of rows written; `0` means no row matched at
    /// write time. `last_update` never moves backwards.
    async fn update(
        &self,
        key: &TaskIdentity,
        update: JobUpdate,
        only_if: Option<&JobFilter>,
    ) -> Result<usize, StoreError>;

    /// Deletes every row of `key` that also matches `only_if`.
    ///
    /// Returns the number of rows deleted.
    async fn delete(&self, key: &TaskIdentity, only_if: Option<&JobFilter>)
        -> Result<usize, StoreError>;
}

/// Durable table of worker records.
#[async_trait]
pub trait WorkerStore: Send + Sync {
    /// Creates or updates the worker named `worker_name`.
    ///
    /// With `only_if = None` a missing worker is created. With a filter,
    /// the write happens only if the worker exists and still matches; the
    /// method then returns `Ok(None)` when nothing was written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on I/O failures.
    async fn upsert(
        &self,
        worker_name: &str,
        update: WorkerUpdate,
        only_if: Option<&WorkerFilter>,
    ) -> Result<Option<WorkerRecord>, StoreError>;

    /// Returns all workers matching `filter`, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on I/O failures.
    async fn find(&self, filter: &WorkerFilter) -> Result<Vec<WorkerRecord>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(task_id: &str, state: JobState, age_secs: i64, now: DateTime<Utc>) -> JobRecord {
        let mut record = JobRecord::queued(
            TaskIdentity::new("wf", "run", task_id, -1, 1),
            "default",
            String::new(),
            1,
            now - Duration::seconds(age_secs),
        );
        record.state = state;
        record
    }

    #[test]
    fn job_filter_by_keys() {
        let now = Utc::now();
        let a = record("a", JobState::Running, 0, now);
        let b = record("b", JobState::Running, 0, now);
        let filter = JobFilter::for_keys([a.key()]);
        assert!(filter.matches(&a));
        assert!(!filter.matches(&b));
        assert!(!JobFilter::for_keys(Vec::new()).matches(&a));
    }

    #[test]
    fn job_filter_combines_conditions() {
        let now = Utc::now();
        let stale = record("stale", JobState::Running, 600, now);
        let fresh = record("fresh", JobState::Running, 10, now);
        let stale_done = record("done", JobState::Success, 600, now);

        let filter = JobFilter::all()
            .with_state(JobState::Running)
            .updated_before(now - Duration::seconds(300));
        assert!(filter.matches(&stale));
        assert!(!filter.matches(&fresh));
        assert!(!filter.matches(&stale_done));
    }

    #[test]
    fn worker_filter_cutoff_is_strict() {
        let now = Utc::now();
        let worker = WorkerRecord::register("w", WorkerState::Idle, Vec::new(), now);
        assert!(!WorkerFilter::all().updated_before(now).matches(&worker));
        assert!(WorkerFilter::all()
            .updated_before(now + Duration::milliseconds(1))
            .matches(&worker));
        assert!(!WorkerFilter::all()
            .with_states([WorkerState::Offline])
            .matches(&worker));
    }
}
