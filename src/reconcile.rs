//! The reconciliation engine.
//!
//! Workers report job progress by writing to the shared job table. The
//! [`ReconciliationEngine`] brings the scheduler's view back in line with
//! that table. Each [`sync`](ReconciliationEngine::sync) cycle runs, in
//! order:
//!
//! 1. Load the job records of every identity in the running set.
//! 2. Fire callbacks for newly running, succeeded and failed jobs.
//! 3. Reclaim orphans: `Running` jobs whose heartbeat is older than the
//!    heartbeat timeout are forced to `Removed`.
//! 4. Purge terminal jobs older than their retention window.
//! 5. Classify worker liveness.
//!
//! A failing step is logged and counted in the [`SyncReport`]; it never
//! aborts the rest of the cycle. The one exception is purge: if step 1
//! could not load the running set, purge waits for the next cycle so a
//! terminal row is never deleted before its callback fired.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::callbacks::{NoopCallbacks, TaskCallbacks};
use crate::clock::{cutoff, Clock, SystemClock};
use crate::config::ExecutorConfig;
use crate::constants::{OUTCOME_FAILED, TASK_FINISH_METRIC};
use crate::domain::{JobRecord, JobUpdate};
use crate::error::{NotifyError, StoreError};
use crate::liveness::{HeartbeatWindow, LivenessPolicy, WorkerLivenessClassifier};
use crate::metrics::{tags, MetricSink, TracingMetricSink};
use crate::store::{JobFilter, JobStore, WorkerStore};
use crate::types::identity::TaskIdentity;
use crate::types::state::JobState;

/// Counters describing one [`sync`](ReconciliationEngine::sync) cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// `on_running` notifications fired.
    pub running_notified: usize,
    /// Jobs observed in `Success` and untracked.
    pub succeeded: usize,
    /// Jobs observed in `Failed` and untracked.
    pub failed: usize,
    /// Stale running rows forced to `Removed`.
    pub orphans_reclaimed: usize,
    /// Terminal rows deleted.
    pub purged: usize,
    /// Workers downgraded to `Unknown`.
    pub workers_marked_unknown: usize,
    /// Store operations that failed during the cycle.
    pub store_errors: usize,
}

impl SyncReport {
    /// Returns `true` if the cycle changed anything.
    pub fn has_activity(&self) -> bool {
        self.running_notified
            + self.succeeded
            + self.failed
            + self.orphans_reclaimed
            + self.purged
            + self.workers_marked_unknown
            > 0
    }
}

/// Time windows used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Running jobs silent for longer than this are reclaimed.
    pub heartbeat_timeout: Duration,
    /// Retention of `Failed` and `Removed` jobs.
    pub purge_retention: Duration,
    /// Retention of `Success` jobs.
    pub success_purge_retention: Duration,
}

impl From<&ExecutorConfig> for EngineSettings {
    fn from(config: &ExecutorConfig) -> Self {
        Self {
            heartbeat_timeout: config.heartbeat_timeout(),
            purge_retention: config.purge_retention(),
            success_purge_retention: config.success_purge_retention(),
        }
    }
}

/// Builder for [`ReconciliationEngine`].
///
/// Only the two stores are required. Everything else defaults to the
/// production choice: [`SystemClock`], [`TracingMetricSink`],
/// [`NoopCallbacks`] and a [`HeartbeatWindow`] policy derived from the
/// configuration.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use edge_executor::config::ExecutorConfig;
/// use edge_executor::reconcile::ReconciliationEngine;
/// use edge_executor::store::memory::{InMemoryJobStore, InMemoryWorkerStore};
///
/// let engine = ReconciliationEngine::builder(
///     Arc::new(InMemoryJobStore::new()),
///     Arc::new(InMemoryWorkerStore::new()),
/// )
/// .config(&ExecutorConfig::default())
/// .build();
/// assert!(engine.running().is_empty());
/// ```
pub struct EngineBuilder {
    jobs: Arc<dyn JobStore>,
    workers: Arc<dyn WorkerStore>,
    config: ExecutorConfig,
    clock: Option<Arc<dyn Clock>>,
    metrics: Option<Arc<dyn MetricSink>>,
    callbacks: Option<Arc<dyn TaskCallbacks>>,
    policy: Option<Arc<dyn LivenessPolicy>>,
}

impl EngineBuilder {
    /// Sets the windows from `config`.
    pub fn config(mut self, config: &ExecutorConfig) -> Self {
        self.config = config.clone();
        self
    }

    /// Sets the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the metric sink.
    pub fn metrics(mut self, metrics: Arc<dyn MetricSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets the scheduler callbacks.
    pub fn callbacks(mut self, callbacks: Arc<dyn TaskCallbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    /// Replaces the worker liveness policy.
    pub fn liveness_policy(mut self, policy: Arc<dyn LivenessPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Builds the engine with an empty running set.
    pub fn build(self) -> ReconciliationEngine {
        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(TracingMetricSink));
        let policy = self.policy.unwrap_or_else(|| {
            Arc::new(HeartbeatWindow::new(
                self.config.heartbeat_interval(),
                self.config.missed_heartbeats,
            ))
        });
        ReconciliationEngine {
            jobs: self.jobs,
            liveness: WorkerLivenessClassifier::new(self.workers, metrics.clone(), policy),
            metrics,
            callbacks: self.callbacks.unwrap_or_else(|| Arc::new(NoopCallbacks)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            settings: EngineSettings::from(&self.config),
            running: HashSet::new(),
            running_notified: HashSet::new(),
            last_reported: HashMap::new(),
        }
    }
}

/// Owns the running set and drives the sync cycle.
///
/// `sync` takes `&mut self`: a single engine never runs two cycles at once.
pub struct ReconciliationEngine {
    jobs: Arc<dyn JobStore>,
    liveness: WorkerLivenessClassifier,
    metrics: Arc<dyn MetricSink>,
    callbacks: Arc<dyn TaskCallbacks>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    running: HashSet<TaskIdentity>,
    running_notified: HashSet<TaskIdentity>,
    last_reported: HashMap<TaskIdentity, JobState>,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("settings", &self.settings)
            .field("running", &self.running.len())
            .finish_non_exhaustive()
    }
}

impl ReconciliationEngine {
    /// Starts building an engine over the given stores.
    pub fn builder(jobs: Arc<dyn JobStore>, workers: Arc<dyn WorkerStore>) -> EngineBuilder {
        EngineBuilder {
            jobs,
            workers,
            config: ExecutorConfig::default(),
            clock: None,
            metrics: None,
            callbacks: None,
            policy: None,
        }
    }

    /// Windows in effect.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Adds `key` to the running set. Tracking twice is a no-op.
    pub fn track(&mut self, key: TaskIdentity) {
        self.running.insert(key);
    }

    /// Returns `true` if `key` is in the running set.
    pub fn is_tracked(&self, key: &TaskIdentity) -> bool {
        self.running.contains(key)
    }

    /// Identities currently tracked.
    pub fn running(&self) -> &HashSet<TaskIdentity> {
        &self.running
    }

    /// Adopts identities left behind by a previous scheduler process.
    ///
    /// Identities with at least one job record are tracked. The rest are
    /// returned in input order so the caller can reschedule them.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the job table cannot be read; nothing is
    /// tracked in that case.
    pub async fn adopt<I>(&mut self, keys: I) -> Result<Vec<TaskIdentity>, StoreError>
    where
        I: IntoIterator<Item = TaskIdentity>,
    {
        let keys: Vec<TaskIdentity> = keys.into_iter().collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let found: HashSet<TaskIdentity> = self
            .jobs
            .find(&JobFilter::for_keys(keys.iter().cloned()))
            .await?
            .iter()
            .map(JobRecord::key)
            .collect();

        let mut not_adoptable = Vec::new();
        for key in keys {
            if found.contains(&key) {
                tracing::debug!(key = %key, "adopted job");
                self.running.insert(key);
            } else {
                not_adoptable.push(key);
            }
        }
        Ok(not_adoptable)
    }

    /// Deletes the queued rows of `key` and stops tracking it.
    ///
    /// Jobs a worker already picked up are left alone. Returns `true` if a
    /// queued row was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    pub async fn revoke(&mut self, key: &TaskIdentity) -> Result<bool, StoreError> {
        let queued = JobFilter::all().with_state(JobState::Queued);
        let deleted = self.jobs.delete(key, Some(&queued)).await?;
        if deleted == 0 {
            tracing::debug!(key = %key, "nothing queued to revoke");
            return Ok(false);
        }
        self.untrack(key);
        tracing::info!(key = %key, rows = deleted, "revoked queued job");
        Ok(true)
    }

    /// Runs one reconciliation cycle.
    ///
    /// Never fails: store, callback and metric failures are logged and the
    /// cycle moves on. Failed store calls are counted in
    /// [`SyncReport::store_errors`] and retried on the next cycle.
    pub async fn sync(&mut self) -> SyncReport {
        let now = self.clock.now();
        let mut report = SyncReport::default();

        let loaded = self.sync_running(&mut report).await;
        self.reclaim_orphans(now, &mut report).await;
        if loaded {
            self.purge(now, &mut report).await;
        } else {
            tracing::debug!("running set not loaded; purge deferred to the next cycle");
        }

        let liveness = self.liveness.classify(now).await;
        report.workers_marked_unknown = liveness.marked_unknown.len();
        report.store_errors += liveness.store_errors;

        if report.has_activity() || report.store_errors > 0 {
            tracing::info!(
                running_notified = report.running_notified,
                succeeded = report.succeeded,
                failed = report.failed,
                orphans_reclaimed = report.orphans_reclaimed,
                purged = report.purged,
                workers_marked_unknown = report.workers_marked_unknown,
                store_errors = report.store_errors,
                tracked = self.running.len(),
                "sync cycle complete"
            );
        } else {
            tracing::trace!(tracked = self.running.len(), "sync cycle idle");
        }
        report
    }

    /// Returns `false` if the running set could not be loaded.
    async fn sync_running(&mut self, report: &mut SyncReport) -> bool {
        if self.running.is_empty() {
            return true;
        }
        let filter = JobFilter::for_keys(self.running.iter().cloned());
        let records = match self.jobs.find(&filter).await {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load running jobs");
                report.store_errors += 1;
                return false;
            },
        };

        for record in records {
            let key = record.key();
            // A duplicate row of an identity already finished this cycle.
            if !self.running.contains(&key) {
                continue;
            }
            match record.state {
                JobState::Running => {
                    self.observe(&key, JobState::Running);
                    if !self.running_notified.insert(key.clone()) {
                        continue;
                    }
                    report.running_notified += 1;
                    tracing::debug!(key = %key, "job running");
                    notify(&key, "on_running", self.callbacks.on_running(&key));
                },
                JobState::Success => {
                    self.untrack(&key);
                    report.succeeded += 1;
                    tracing::debug!(key = %key, "job succeeded");
                    notify(&key, "on_success", self.callbacks.on_success(&key));
                },
                JobState::Failed => {
                    self.untrack(&key);
                    report.failed += 1;
                    tracing::debug!(key = %key, "job failed");
                    notify(&key, "on_failed", self.callbacks.on_failed(&key));
                },
                other => self.observe(&key, other),
            }
        }
        true
    }

    async fn reclaim_orphans(&self, now: DateTime<Utc>, report: &mut SyncReport) {
        let stale = JobFilter::all()
            .with_state(JobState::Running)
            .updated_before(cutoff(now, self.settings.heartbeat_timeout));
        let orphans = match self.jobs.find(&stale).await {
            Ok(orphans) => orphans,
            Err(err) => {
                tracing::warn!(error = %err, "failed to scan for orphaned jobs");
                report.store_errors += 1;
                return;
            },
        };

        let mut seen = HashSet::new();
        for orphan in orphans {
            let key = orphan.key();
            if !seen.insert(key.clone()) {
                continue;
            }
            let written = match self
                .jobs
                .update(&key, JobUpdate::transition(JobState::Removed, now), Some(&stale))
                .await
            {
                Ok(written) => written,
                Err(err) => {
                    tracing::warn!(error = %err, key = %key, "failed to reclaim orphaned job");
                    report.store_errors += 1;
                    continue;
                },
            };
            if written == 0 {
                tracing::debug!(key = %key, "orphan candidate changed before reclaim");
                continue;
            }

            tracing::info!(
                workflow_id = %orphan.workflow_id,
                task_id = %orphan.task_id,
                queue = %orphan.queue,
                last_update = %orphan.last_update,
                rows = written,
                "reclaimed orphaned job"
            );
            let finish_tags = tags([
                ("workflow_id", orphan.workflow_id.as_str()),
                ("queue", orphan.queue.as_str()),
                ("task_id", orphan.task_id.as_str()),
                ("outcome", OUTCOME_FAILED),
            ]);
            for _ in 0..written {
                if let Err(err) = self.metrics.emit(TASK_FINISH_METRIC, &finish_tags) {
                    tracing::warn!(error = %err, key = %key, "metric emit failed");
                }
            }
            report.orphans_reclaimed += written;
        }
    }

    async fn purge(&mut self, now: DateTime<Utc>, report: &mut SyncReport) {
        let windows = [
            JobFilter::all()
                .with_state(JobState::Success)
                .updated_before(cutoff(now, self.settings.success_purge_retention)),
            JobFilter::all()
                .with_states([JobState::Failed, JobState::Removed])
                .updated_before(cutoff(now, self.settings.purge_retention)),
        ];

        for expired in &windows {
            let candidates = match self.jobs.find(expired).await {
                Ok(candidates) => candidates,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to scan for expired jobs");
                    report.store_errors += 1;
                    continue;
                },
            };

            let mut seen = HashSet::new();
            for record in candidates {
                let key = record.key();
                if !seen.insert(key.clone()) {
                    continue;
                }
                match self.jobs.delete(&key, Some(expired)).await {
                    Ok(0) => {},
                    Ok(deleted) => {
                        tracing::info!(
                            workflow_id = %record.workflow_id,
                            task_id = %record.task_id,
                            state = %record.state,
                            rows = deleted,
                            "purged job"
                        );
                        report.purged += deleted;
                        self.forget_purged(&key);
                    },
                    Err(err) => {
                        tracing::warn!(error = %err, key = %key, "failed to purge job");
                        report.store_errors += 1;
                    },
                }
            }
        }
    }

    /// Records `state` unless a more advanced state was already seen.
    /// Duplicate rows of one identity may disagree; the furthest one wins.
    fn observe(&mut self, key: &TaskIdentity, state: JobState) {
        let advances = self
            .last_reported
            .get(key)
            .is_none_or(|seen| seen.can_transition_to(&state));
        if advances {
            self.last_reported.insert(key.clone(), state);
        }
    }

    fn untrack(&mut self, key: &TaskIdentity) {
        self.running.remove(key);
        self.running_notified.remove(key);
        self.last_reported.remove(key);
    }

    /// A tracked identity last seen in a terminal state has no row left to
    /// observe once purged.
    fn forget_purged(&mut self, key: &TaskIdentity) {
        if self
            .last_reported
            .get(key)
            .is_some_and(JobState::is_terminal)
        {
            self.untrack(key);
        }
    }
}

fn notify(key: &TaskIdentity, callback: &'static str, result: Result<(), NotifyError>) {
    if let Err(err) = result {
        tracing::warn!(error = %err, key = %key, callback, "scheduler callback failed");
    }
}
