//! Worker liveness classification.
//!
//! Workers refresh `last_update` on every heartbeat. When a worker in an
//! active state stops heartbeating for longer than the policy allows, the
//! classifier downgrades it to [`WorkerState::Unknown`]. Worker-initiated
//! offline states are never overridden, and only the worker's own
//! heartbeat moves it out of `Unknown`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::cutoff;
use crate::constants::WORKER_UNKNOWN_METRIC;
use crate::domain::WorkerUpdate;
use crate::error::StoreError;
use crate::metrics::{tags, MetricSink};
use crate::store::{WorkerFilter, WorkerStore};
use crate::types::state::WorkerState;

/// Strategy deciding how long a worker may stay silent.
pub trait LivenessPolicy: Send + Sync + fmt::Debug {
    /// Returns the cutoff: active workers last seen strictly before it are
    /// considered lost.
    fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc>;
}

/// Policy allowing `missed_heartbeats` heartbeat intervals of silence.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use chrono::{TimeZone, Utc};
/// use edge_executor::liveness::{HeartbeatWindow, LivenessPolicy};
///
/// let policy = HeartbeatWindow::new(Duration::from_secs(10), 1);
/// let now = Utc.with_ymd_and_hms(2023, 1, 1, 1, 0, 0).unwrap();
/// assert_eq!(
///     policy.stale_before(now),
///     Utc.with_ymd_and_hms(2023, 1, 1, 0, 59, 50).unwrap()
/// );
/// ```
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatWindow {
    heartbeat_interval: Duration,
    missed_heartbeats: u32,
}

impl HeartbeatWindow {
    /// Creates the policy. A `missed_heartbeats` of zero is treated as one.
    pub fn new(heartbeat_interval: Duration, missed_heartbeats: u32) -> Self {
        Self {
            heartbeat_interval,
            missed_heartbeats: missed_heartbeats.max(1),
        }
    }

    /// Total silence allowed before a worker is lost.
    pub fn window(&self) -> Duration {
        self.heartbeat_interval
            .saturating_mul(self.missed_heartbeats)
    }
}

impl LivenessPolicy for HeartbeatWindow {
    fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        cutoff(now, self.window())
    }
}

/// Outcome of one classification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivenessReport {
    /// Workers downgraded to `Unknown`, by name.
    pub marked_unknown: Vec<String>,
    /// Store operations that failed.
    pub store_errors: usize,
}

/// Downgrades silent workers to [`WorkerState::Unknown`].
#[derive(Clone)]
pub struct WorkerLivenessClassifier {
    workers: Arc<dyn WorkerStore>,
    metrics: Arc<dyn MetricSink>,
    policy: Arc<dyn LivenessPolicy>,
}

impl WorkerLivenessClassifier {
    /// Creates a classifier over `workers` using `policy`.
    pub fn new(
        workers: Arc<dyn WorkerStore>,
        metrics: Arc<dyn MetricSink>,
        policy: Arc<dyn LivenessPolicy>,
    ) -> Self {
        Self {
            workers,
            metrics,
            policy,
        }
    }

    /// Runs one pass at time `now`.
    ///
    /// Store failures are logged and counted; a failure on one worker does
    /// not stop the pass for the others.
    pub async fn classify(&self, now: DateTime<Utc>) -> LivenessReport {
        let mut report = LivenessReport::default();
        let stale = WorkerFilter::all()
            .with_states(WorkerState::ACTIVE)
            .updated_before(self.policy.stale_before(now));

        let candidates = match self.workers.find(&stale).await {
            Ok(candidates) => candidates,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load workers for liveness check");
                report.store_errors += 1;
                return report;
            },
        };

        for worker in candidates {
            match self.mark_unknown(&worker.worker_name, &stale).await {
                Ok(true) => {
                    tracing::info!(
                        worker_name = %worker.worker_name,
                        previous_state = %worker.state,
                        last_update = %worker.last_update,
                        "worker missed its heartbeat window; marking unknown"
                    );
                    if let Err(err) = self.metrics.emit(
                        WORKER_UNKNOWN_METRIC,
                        &tags([("worker_name", worker.worker_name.as_str())]),
                    ) {
                        tracing::warn!(error = %err, worker_name = %worker.worker_name, "metric emit failed");
                    }
                    report.marked_unknown.push(worker.worker_name);
                },
                Ok(false) => {
                    tracing::debug!(
                        worker_name = %worker.worker_name,
                        "worker heartbeat arrived before downgrade"
                    );
                },
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        worker_name = %worker.worker_name,
                        "failed to mark worker unknown"
                    );
                    report.store_errors += 1;
                },
            }
        }
        report
    }

    async fn mark_unknown(&self, worker_name: &str, stale: &WorkerFilter) -> Result<bool, StoreError> {
        let written = self
            .workers
            .upsert(
                worker_name,
                WorkerUpdate::state(WorkerState::Unknown),
                Some(stale),
            )
            .await?;
        Ok(written.is_some())
    }
}
