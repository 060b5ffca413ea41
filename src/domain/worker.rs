//! Worker record -- one persisted row per registered edge worker.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::state::WorkerState;

/// Persisted liveness and state of one edge worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Unique worker name.
    pub worker_name: String,
    /// Self-reported state, or `Unknown` after a missed heartbeat window.
    pub state: WorkerState,
    /// Queue labels the worker serves.
    pub queues: BTreeSet<String>,
    /// Last heartbeat time.
    pub last_update: DateTime<Utc>,
    /// When the worker first registered.
    pub first_online: DateTime<Utc>,
}

impl WorkerRecord {
    /// Creates a record for a worker registering at `now`.
    pub fn register(
        worker_name: impl Into<String>,
        state: WorkerState,
        queues: impl IntoIterator<Item = String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            worker_name: worker_name.into(),
            state,
            queues: queues.into_iter().collect(),
            last_update: now,
            first_online: now,
        }
    }

    /// Applies `update` in place. `last_update` never moves backwards.
    pub fn apply(&mut self, update: &WorkerUpdate) {
        if let Some(state) = update.state {
            self.state = state;
        }
        if let Some(queues) = &update.queues {
            self.queues = queues.clone();
        }
        if let Some(at) = update.last_update {
            self.last_update = self.last_update.max(at);
        }
    }
}

/// Field changes applied by [`WorkerStore::upsert`](crate::store::WorkerStore::upsert).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerUpdate {
    /// New state.
    pub state: Option<WorkerState>,
    /// Replacement queue set.
    pub queues: Option<BTreeSet<String>>,
    /// Heartbeat time.
    pub last_update: Option<DateTime<Utc>>,
}

impl WorkerUpdate {
    /// Update sent by a worker on every heartbeat.
    pub fn heartbeat(state: WorkerState, now: DateTime<Utc>) -> Self {
        Self {
            state: Some(state),
            queues: None,
            last_update: Some(now),
        }
    }

    /// Update that only changes the state.
    pub fn state(state: WorkerState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }
}
