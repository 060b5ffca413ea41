//! In-memory job and worker stores.
//!
//! [`InMemoryJobStore`] and [`InMemoryWorkerStore`] implement the store
//! traits on top of [`DashMap`], which gives shard-level locking and
//! per-row atomic writes. They back the test suite and single-process
//! deployments; a relational backend implements the same traits.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//!
//! use edge_executor::store::memory::{InMemoryJobStore, InMemoryWorkerStore};
//! use edge_executor::store::{JobStore, WorkerStore};
//!
//! let jobs: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
//! let workers: Arc<dyn WorkerStore> = Arc::new(InMemoryWorkerStore::new());
//! ```

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::{JobRecord, JobUpdate, WorkerRecord, WorkerUpdate};
use crate::error::StoreError;
use crate::store::{JobFilter, JobStore, WorkerFilter, WorkerStore};
use crate::types::identity::TaskIdentity;
use crate::types::state::WorkerState;

/// Thread-safe in-memory [`JobStore`], one entry per row id.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    rows: DashMap<Uuid, JobRecord>,
}

impl InMemoryJobStore {
    /// Creates an empty store.
    ///
    /// # Examples
    ///
    /// ```
    /// use edge_executor::store::memory::InMemoryJobStore;
    ///
    /// let store = InMemoryJobStore::new();
    /// assert!(store.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of rows stored.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns every row, oldest `last_update` first.
    pub fn snapshot(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.rows.iter().map(|e| e.value().clone()).collect();
        sort_jobs(&mut records);
        records
    }

    /// Returns the rows stored for `key`.
    pub fn get(&self, key: &TaskIdentity) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self
            .rows
            .iter()
            .filter(|e| e.value().matches_key(key))
            .map(|e| e.value().clone())
            .collect();
        sort_jobs(&mut records);
        records
    }
}

fn sort_jobs(records: &mut [JobRecord]) {
    records.sort_by(|a, b| {
        a.last_update
            .cmp(&b.last_update)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn row_matches(record: &JobRecord, key: &TaskIdentity, only_if: Option<&JobFilter>) -> bool {
    record.matches_key(key) && only_if.is_none_or(|filter| filter.matches(record))
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, record: JobRecord) -> Result<(), StoreError> {
        self.rows.insert(record.id, record);
        Ok(())
    }

    async fn find(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError> {
        let mut records: Vec<JobRecord> = self
            .rows
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        sort_jobs(&mut records);
        Ok(records)
    }

    async fn update(
        &self,
        key: &TaskIdentity,
        update: JobUpdate,
        only_if: Option<&JobFilter>,
    ) -> Result<usize, StoreError> {
        // Validate every matching row before writing any, so a rejected
        // transition leaves all rows of `key` untouched.
        let mut targets = Vec::new();
        for entry in self.rows.iter() {
            let record = entry.value();
            if !row_matches(record, key, only_if) {
                continue;
            }
            if let Some(next) = update.state {
                if next != record.state {
                    record.state.validate_transition(key, &next)?;
                }
            }
            targets.push(*entry.key());
        }

        let mut written = 0;
        for id in targets {
            let Some(mut entry) = self.rows.get_mut(&id) else {
                continue;
            };
            let record = entry.value_mut();
            // Re-check under the shard lock; the row may have changed since the scan.
            if !row_matches(record, key, only_if) {
                continue;
            }
            if let Some(next) = update.state {
                // Rewriting the current state is a heartbeat, not a transition.
                if next != record.state {
                    record.state.validate_transition(key, &next)?;
                    record.state = next;
                }
            }
            if let Some(at) = update.last_update {
                record.last_update = record.last_update.max(at);
            }
            written += 1;
        }
        Ok(written)
    }

    async fn delete(
        &self,
        key: &TaskIdentity,
        only_if: Option<&JobFilter>,
    ) -> Result<usize, StoreError> {
        let candidates: Vec<Uuid> = self
            .rows
            .iter()
            .filter(|e| row_matches(e.value(), key, only_if))
            .map(|e| *e.key())
            .collect();
        let mut deleted = 0;
        for id in candidates {
            // Re-check under the shard lock; the row may have changed since the scan.
            if self
                .rows
                .remove_if(&id, |_, record| row_matches(record, key, only_if))
                .is_some()
            {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// Thread-safe in-memory [`WorkerStore`] keyed by worker name.
#[derive(Debug, Default)]
pub struct InMemoryWorkerStore {
    workers: DashMap<String, WorkerRecord>,
}

impl InMemoryWorkerStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of registered workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Returns `true` if no worker is registered.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Returns the worker named `worker_name`, if registered.
    pub fn get(&self, worker_name: &str) -> Option<WorkerRecord> {
        self.workers.get(worker_name).map(|e| e.value().clone())
    }

    /// Inserts or replaces a full worker record.
    pub fn put(&self, record: WorkerRecord) {
        self.workers.insert(record.worker_name.clone(), record);
    }
}

#[async_trait]
impl WorkerStore for InMemoryWorkerStore {
    async fn upsert(
        &self,
        worker_name: &str,
        update: WorkerUpdate,
        only_if: Option<&WorkerFilter>,
    ) -> Result<Option<WorkerRecord>, StoreError> {
        match self.workers.entry(worker_name.to_string()) {
            Entry::Occupied(mut entry) => {
                if let Some(filter) = only_if {
                    if !filter.matches(entry.get()) {
                        return Ok(None);
                    }
                }
                entry.get_mut().apply(&update);
                Ok(Some(entry.get().clone()))
            },
            Entry::Vacant(entry) => {
                if only_if.is_some() {
                    return Ok(None);
                }
                let now = update.last_update.unwrap_or_else(Utc::now);
                let record = WorkerRecord::register(
                    worker_name,
                    update.state.unwrap_or(WorkerState::Starting),
                    update.queues.unwrap_or_default(),
                    now,
                );
                Ok(Some(entry.insert(record).value().clone()))
            },
        }
    }

    async fn find(&self, filter: &WorkerFilter) -> Result<Vec<WorkerRecord>, StoreError> {
        let mut workers: Vec<WorkerRecord> = self
            .workers
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        workers.sort_by(|a, b| a.worker_name.cmp(&b.worker_name));
        Ok(workers)
    }
}
