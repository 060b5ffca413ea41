//! Tests for the reconciliation cycle.
//!
//! These tests verify that:
//! 1. Running-set transitions fire each callback exactly once
//! 2. Stale running jobs are reclaimed with exactly one finish metric
//! 3. Terminal jobs are purged after their retention window, never before
//! 4. Store, callback and metric failures never abort a cycle
//! 5. Adoption and revocation keep the running set consistent

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use edge_executor::callbacks::{CallbackKind, RecordingCallbacks, TaskCallbacks};
use edge_executor::clock::{Clock, ManualClock};
use edge_executor::config::ExecutorConfig;
use edge_executor::constants::TASK_FINISH_METRIC;
use edge_executor::metrics::{MetricSink, MetricTags, RecordingMetricSink};
use edge_executor::store::memory::{InMemoryJobStore, InMemoryWorkerStore};
use edge_executor::store::{JobFilter, JobStore, StoreError};
use edge_executor::{
    Command, EdgeExecutor, JobRecord, JobState, JobUpdate, NotifyError, TaskIdentity,
};
use pretty_assertions::assert_eq;

/// Past the purge window of the default configuration.
fn delta_to_purge() -> Duration {
    Duration::seconds(3_600 + 60)
}

/// Past the heartbeat timeout of the default configuration.
fn delta_to_orphaned() -> Duration {
    Duration::seconds(300 + 1)
}

fn test_key(task_id: &str) -> TaskIdentity {
    TaskIdentity::new("test_dag", "test_run", task_id, -1, 1)
}

struct Harness {
    jobs: Arc<InMemoryJobStore>,
    clock: ManualClock,
    callbacks: Arc<RecordingCallbacks>,
    metrics: Arc<RecordingMetricSink>,
    executor: EdgeExecutor,
}

fn harness_with(config: ExecutorConfig) -> Harness {
    let jobs = Arc::new(InMemoryJobStore::new());
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2023, 1, 1, 1, 0, 0).unwrap());
    let callbacks = Arc::new(RecordingCallbacks::new());
    let metrics = Arc::new(RecordingMetricSink::new());
    let executor = EdgeExecutor::builder(jobs.clone(), Arc::new(InMemoryWorkerStore::new()))
        .config(config)
        .clock(Arc::new(clock.clone()))
        .callbacks(callbacks.clone())
        .metrics(metrics.clone())
        .build()
        .unwrap();
    Harness {
        jobs,
        clock,
        callbacks,
        metrics,
        executor,
    }
}

fn harness() -> Harness {
    harness_with(ExecutorConfig::default())
}

/// Inserts a row as a worker would leave it.
async fn add_job(h: &Harness, task_id: &str, state: JobState, age: Duration) -> TaskIdentity {
    let key = test_key(task_id);
    let mut record = JobRecord::queued(
        key.clone(),
        "default",
        "mock".to_string(),
        1,
        h.clock.now() - age,
    );
    record.state = state;
    h.jobs.insert(record).await.unwrap();
    key
}

async fn worker_reports(h: &Harness, key: &TaskIdentity, state: JobState) {
    let written = h
        .jobs
        .update(key, JobUpdate::transition(state, h.clock.now()), None)
        .await
        .unwrap();
    assert!(written > 0);
}

#[tokio::test]
async fn test_sync() {
    let mut h = harness();
    for (task_id, state, age) in [
        ("started_running", JobState::Running, Duration::zero()),
        ("started_success", JobState::Success, delta_to_purge()),
        ("started_failed", JobState::Failed, delta_to_purge()),
    ] {
        let key = add_job(&h, task_id, state, age).await;
        h.executor.adopt([key]).await.unwrap();
    }
    assert_eq!(h.executor.engine().running().len(), 3);

    let report = h.executor.sync().await;

    let jobs = h.jobs.snapshot();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].task_id, "started_running");
    assert_eq!(jobs[0].state, JobState::Running);
    assert_eq!(h.executor.engine().running().len(), 1);
    assert_eq!(h.callbacks.count(CallbackKind::Running), 1);
    assert_eq!(h.callbacks.count(CallbackKind::Success), 1);
    assert_eq!(h.callbacks.count(CallbackKind::Failed), 1);
    assert_eq!(report.purged, 2);

    // Another round with one new run.
    h.callbacks.reset();
    let key = add_job(&h, "started_running2", JobState::Running, Duration::zero()).await;
    h.executor.adopt([key]).await.unwrap();
    assert_eq!(h.executor.engine().running().len(), 2);

    h.executor.sync().await;

    assert_eq!(h.jobs.len(), 2);
    assert_eq!(h.executor.engine().running().len(), 2);
    assert_eq!(h.callbacks.count(CallbackKind::Running), 1);
    assert_eq!(h.callbacks.count(CallbackKind::Success), 0);
    assert_eq!(h.callbacks.count(CallbackKind::Failed), 0);
}

#[tokio::test]
async fn test_sync_orphaned_tasks() {
    let mut h = harness();
    add_job(&h, "started_running_orphaned", JobState::Running, delta_to_orphaned()).await;
    add_job(&h, "started_removed", JobState::Removed, delta_to_purge()).await;

    let report = h.executor.sync().await;

    let events = h.metrics.events_named(TASK_FINISH_METRIC);
    assert_eq!(events.len(), 1);
    let tags = &events[0].tags;
    assert_eq!(tags["workflow_id"], "test_dag");
    assert_eq!(tags["queue"], "default");
    assert_eq!(tags["task_id"], "started_running_orphaned");
    assert_eq!(tags["outcome"], "failed");

    let jobs = h.jobs.snapshot();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].task_id, "started_running_orphaned");
    assert_eq!(jobs[0].state, JobState::Removed);
    assert_eq!(jobs[0].last_update, h.clock.now());
    assert_eq!(report.orphans_reclaimed, 1);
    assert_eq!(report.purged, 1);
}

#[tokio::test]
async fn test_scenario_a_slots_and_single_notifications() {
    let mut h = harness();
    let key = test_key("scenario_a");
    let record = h
        .executor
        .queue_task(
            key.clone(),
            Command::task_run(["airflow", "tasks", "run", "test_dag", "scenario_a"]),
            "default",
            Some(5),
        )
        .await
        .unwrap();
    assert_eq!(record.concurrency_slots, 5);
    assert_eq!(record.state, JobState::Queued);

    h.executor.sync().await;
    assert!(h.callbacks.calls().is_empty());

    h.clock.advance(Duration::seconds(10));
    worker_reports(&h, &key, JobState::Running).await;
    h.executor.sync().await;
    assert_eq!(h.callbacks.count_for(CallbackKind::Running, &key), 1);

    h.clock.advance(Duration::seconds(10));
    worker_reports(&h, &key, JobState::Success).await;
    h.executor.sync().await;
    h.executor.sync().await;

    assert_eq!(h.callbacks.count_for(CallbackKind::Running, &key), 1);
    assert_eq!(h.callbacks.count_for(CallbackKind::Success, &key), 1);
    assert!(!h.executor.is_tracked(&key));
}

#[tokio::test]
async fn test_scenario_b_reclaimed_row_purged_on_later_cycle() {
    let mut h = harness();
    let fresh = add_job(&h, "fresh_running", JobState::Running, Duration::zero()).await;
    let stale = add_job(&h, "stale_running", JobState::Running, delta_to_orphaned()).await;
    add_job(&h, "old_removed", JobState::Removed, delta_to_purge()).await;
    h.executor.adopt([fresh.clone(), stale.clone()]).await.unwrap();

    h.executor.sync().await;

    let jobs = h.jobs.snapshot();
    assert_eq!(jobs.len(), 2);
    assert_eq!(h.jobs.get(&fresh)[0].state, JobState::Running);
    assert_eq!(h.jobs.get(&stale)[0].state, JobState::Removed);
    assert_eq!(h.metrics.events_named(TASK_FINISH_METRIC).len(), 1);

    // The fresh job keeps heartbeating while the reclaimed row ages out.
    h.clock.advance(delta_to_purge());
    h.jobs
        .update(&fresh, JobUpdate::heartbeat(h.clock.now()), None)
        .await
        .unwrap();
    let report = h.executor.sync().await;

    let jobs = h.jobs.snapshot();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].task_id, "fresh_running");
    assert_eq!(report.purged, 1);
    assert_eq!(report.orphans_reclaimed, 0);
    assert!(!h.executor.is_tracked(&stale));
    assert!(h.executor.is_tracked(&fresh));
}

#[tokio::test]
async fn test_repeated_sync_fires_nothing_twice() {
    let mut h = harness();
    for (task_id, state) in [
        ("running", JobState::Running),
        ("success", JobState::Success),
        ("failed", JobState::Failed),
        ("queued", JobState::Queued),
    ] {
        let key = add_job(&h, task_id, state, Duration::zero()).await;
        h.executor.adopt([key]).await.unwrap();
    }

    h.executor.sync().await;
    let first = h.callbacks.calls();
    assert_eq!(first.len(), 3);

    let report = h.executor.sync().await;
    assert_eq!(h.callbacks.calls(), first);
    assert_eq!(report.running_notified + report.succeeded + report.failed, 0);
}

#[tokio::test]
async fn test_fresh_running_untouched_by_orphan_scan() {
    let mut h = harness();
    let key = add_job(&h, "fresh", JobState::Running, Duration::seconds(299)).await;
    let before = h.jobs.get(&key)[0].clone();

    h.executor.sync().await;

    assert_eq!(h.jobs.get(&key)[0], before);
    assert!(h.metrics.events_named(TASK_FINISH_METRIC).is_empty());
}

#[tokio::test]
async fn test_purge_respects_retention() {
    let mut h = harness();
    let old = add_job(&h, "old_failed", JobState::Failed, delta_to_purge()).await;
    let young = add_job(&h, "young_failed", JobState::Failed, Duration::seconds(60)).await;
    let old_queued = add_job(&h, "old_queued", JobState::Queued, delta_to_purge()).await;

    h.executor.sync().await;

    assert!(h.jobs.get(&old).is_empty());
    assert_eq!(h.jobs.get(&young).len(), 1);
    assert_eq!(h.jobs.get(&old_queued).len(), 1);
}

#[tokio::test]
async fn test_success_uses_its_own_retention() {
    let config = ExecutorConfig {
        success_purge_retention_secs: Some(600),
        ..ExecutorConfig::default()
    };
    let mut h = harness_with(config);
    let success = add_job(&h, "success", JobState::Success, Duration::seconds(900)).await;
    let failed = add_job(&h, "failed", JobState::Failed, Duration::seconds(900)).await;

    h.executor.sync().await;

    assert!(h.jobs.get(&success).is_empty());
    assert_eq!(h.jobs.get(&failed).len(), 1);
}

#[tokio::test]
async fn test_duplicate_rows_fire_once() {
    let mut h = harness();
    let key = add_job(&h, "dup", JobState::Success, Duration::zero()).await;
    add_job(&h, "dup", JobState::Success, Duration::zero()).await;
    h.executor.adopt([key.clone()]).await.unwrap();

    let report = h.executor.sync().await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(h.callbacks.count_for(CallbackKind::Success, &key), 1);
}

#[tokio::test]
async fn test_duplicate_rows_in_different_states_fire_once() {
    let mut h = harness();
    let key = add_job(&h, "split", JobState::Running, Duration::seconds(10)).await;
    add_job(&h, "split", JobState::Queued, Duration::zero()).await;
    h.executor.adopt([key.clone()]).await.unwrap();

    for _ in 0..4 {
        h.executor.sync().await;
    }

    assert_eq!(h.callbacks.count_for(CallbackKind::Running, &key), 1);
    assert!(h.executor.is_tracked(&key));
}

#[tokio::test]
async fn test_reclaimed_duplicate_does_not_refire_running() {
    let mut h = harness();
    let key = add_job(&h, "reclaimed", JobState::Running, delta_to_orphaned()).await;
    add_job(&h, "reclaimed", JobState::Running, Duration::zero()).await;
    h.executor.adopt([key.clone()]).await.unwrap();

    let report = h.executor.sync().await;
    assert_eq!(report.orphans_reclaimed, 1);
    h.executor.sync().await;
    h.executor.sync().await;

    assert_eq!(h.callbacks.count_for(CallbackKind::Running, &key), 1);
}

#[derive(Debug, Default)]
struct FailingSuccessCallbacks {
    inner: RecordingCallbacks,
}

impl TaskCallbacks for FailingSuccessCallbacks {
    fn on_running(&self, key: &TaskIdentity) -> Result<(), NotifyError> {
        self.inner.on_running(key)
    }

    fn on_success(&self, key: &TaskIdentity) -> Result<(), NotifyError> {
        self.inner.on_success(key)?;
        Err(NotifyError::new("scheduler unavailable"))
    }

    fn on_failed(&self, key: &TaskIdentity) -> Result<(), NotifyError> {
        self.inner.on_failed(key)
    }
}

#[derive(Debug)]
struct BrokenSink;

impl MetricSink for BrokenSink {
    fn emit(&self, _event: &str, _tags: &MetricTags) -> Result<(), NotifyError> {
        Err(NotifyError::new("statsd down"))
    }
}

#[tokio::test]
async fn test_notification_failures_do_not_undo_transitions() {
    let jobs = Arc::new(InMemoryJobStore::new());
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2023, 1, 1, 1, 0, 0).unwrap());
    let callbacks = Arc::new(FailingSuccessCallbacks::default());
    let mut executor = EdgeExecutor::builder(jobs.clone(), Arc::new(InMemoryWorkerStore::new()))
        .clock(Arc::new(clock.clone()))
        .callbacks(callbacks.clone())
        .metrics(Arc::new(BrokenSink))
        .build()
        .unwrap();

    let done = test_key("done");
    let mut record = JobRecord::queued(done.clone(), "default", String::new(), 1, clock.now());
    record.state = JobState::Success;
    jobs.insert(record).await.unwrap();
    let orphan = test_key("orphan");
    let mut record = JobRecord::queued(
        orphan.clone(),
        "default",
        String::new(),
        1,
        clock.now() - delta_to_orphaned(),
    );
    record.state = JobState::Running;
    jobs.insert(record).await.unwrap();
    executor.adopt([done.clone()]).await.unwrap();

    let report = executor.sync().await;
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.orphans_reclaimed, 1);
    assert!(!executor.is_tracked(&done));
    assert_eq!(jobs.get(&orphan)[0].state, JobState::Removed);

    executor.sync().await;
    assert_eq!(callbacks.inner.count(CallbackKind::Success), 1);
}

/// Job store wrapper that fails selected operations on demand.
#[derive(Default)]
struct FaultyJobStore {
    inner: InMemoryJobStore,
    fail_keyed_find: AtomicBool,
    fail_update: AtomicBool,
}

#[async_trait]
impl JobStore for FaultyJobStore {
    async fn insert(&self, record: JobRecord) -> Result<(), StoreError> {
        self.inner.insert(record).await
    }

    async fn find(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError> {
        if filter.keys.is_some() && self.fail_keyed_find.load(Ordering::SeqCst) {
            return Err(StoreError::backend("connection reset"));
        }
        self.inner.find(filter).await
    }

    async fn update(
        &self,
        key: &TaskIdentity,
        update: JobUpdate,
        only_if: Option<&JobFilter>,
    ) -> Result<usize, StoreError> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(StoreError::backend("lock timeout"));
        }
        self.inner.update(key, update, only_if).await
    }

    async fn delete(
        &self,
        key: &TaskIdentity,
        only_if: Option<&JobFilter>,
    ) -> Result<usize, StoreError> {
        self.inner.delete(key, only_if).await
    }
}

#[tokio::test]
async fn test_store_failures_are_isolated() {
    let jobs = Arc::new(FaultyJobStore::default());
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2023, 1, 1, 1, 0, 0).unwrap());
    let callbacks = Arc::new(RecordingCallbacks::new());
    let mut executor = EdgeExecutor::builder(jobs.clone(), Arc::new(InMemoryWorkerStore::new()))
        .clock(Arc::new(clock.clone()))
        .callbacks(callbacks.clone())
        .metrics(Arc::new(RecordingMetricSink::new()))
        .build()
        .unwrap();

    let insert = |task_id: &str, state: JobState, age: Duration| {
        let mut record = JobRecord::queued(
            test_key(task_id),
            "default",
            String::new(),
            1,
            clock.now() - age,
        );
        record.state = state;
        record
    };
    jobs.insert(insert("tracked", JobState::Success, Duration::zero()))
        .await
        .unwrap();
    jobs.insert(insert("orphan", JobState::Running, delta_to_orphaned()))
        .await
        .unwrap();
    jobs.insert(insert("expired", JobState::Failed, delta_to_purge()))
        .await
        .unwrap();
    executor.adopt([test_key("tracked")]).await.unwrap();

    jobs.fail_keyed_find.store(true, Ordering::SeqCst);
    jobs.fail_update.store(true, Ordering::SeqCst);
    let report = executor.sync().await;

    assert_eq!(report.store_errors, 2);
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.orphans_reclaimed, 0);
    assert_eq!(report.purged, 0);
    assert_eq!(jobs.inner.get(&test_key("expired")).len(), 1);
    assert!(executor.is_tracked(&test_key("tracked")));
    assert!(callbacks.calls().is_empty());

    // Once the store recovers, the next cycle catches up.
    jobs.fail_keyed_find.store(false, Ordering::SeqCst);
    jobs.fail_update.store(false, Ordering::SeqCst);
    let report = executor.sync().await;

    assert_eq!(report.store_errors, 0);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.orphans_reclaimed, 1);
    assert_eq!(report.purged, 1);
    assert_eq!(callbacks.count(CallbackKind::Success), 1);
}

#[tokio::test]
async fn test_expired_tracked_success_survives_failed_load() {
    let jobs = Arc::new(FaultyJobStore::default());
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2023, 1, 1, 1, 0, 0).unwrap());
    let callbacks = Arc::new(RecordingCallbacks::new());
    let mut executor = EdgeExecutor::builder(jobs.clone(), Arc::new(InMemoryWorkerStore::new()))
        .clock(Arc::new(clock.clone()))
        .callbacks(callbacks.clone())
        .metrics(Arc::new(RecordingMetricSink::new()))
        .build()
        .unwrap();

    let key = test_key("late_success");
    let mut record = JobRecord::queued(
        key.clone(),
        "default",
        String::new(),
        1,
        clock.now() - delta_to_purge(),
    );
    record.state = JobState::Success;
    jobs.insert(record).await.unwrap();
    executor.adopt([key.clone()]).await.unwrap();

    jobs.fail_keyed_find.store(true, Ordering::SeqCst);
    let report = executor.sync().await;
    assert_eq!(report.store_errors, 1);
    assert_eq!(report.purged, 0);
    assert_eq!(jobs.inner.get(&key).len(), 1);
    assert!(executor.is_tracked(&key));

    jobs.fail_keyed_find.store(false, Ordering::SeqCst);
    let mut purged = 0;
    for _ in 0..3 {
        purged += executor.sync().await.purged;
    }

    assert_eq!(purged, 1);
    assert_eq!(callbacks.count_for(CallbackKind::Success, &key), 1);
    assert!(!executor.is_tracked(&key));
    assert!(jobs.inner.get(&key).is_empty());
}

#[tokio::test]
async fn test_adopt_returns_unknown_identities() {
    let mut h = harness();
    let known = add_job(&h, "known", JobState::Running, Duration::zero()).await;
    let unknown = test_key("unknown");

    let not_adoptable = h
        .executor
        .adopt([known.clone(), unknown.clone()])
        .await
        .unwrap();

    assert_eq!(not_adoptable, vec![unknown.clone()]);
    assert!(h.executor.is_tracked(&known));
    assert!(!h.executor.is_tracked(&unknown));
}

#[tokio::test]
async fn test_revoke_only_touches_queued_jobs() {
    let mut h = harness();
    let command = Command::task_run(["airflow", "tasks", "run", "test_dag", "x"]);
    let queued = test_key("queued");
    h.executor
        .queue_task(queued.clone(), command.clone(), "default", None)
        .await
        .unwrap();
    let running = test_key("running");
    h.executor
        .queue_task(running.clone(), command, "default", None)
        .await
        .unwrap();
    worker_reports(&h, &running, JobState::Running).await;

    assert!(h.executor.revoke(&queued).await.unwrap());
    assert!(h.jobs.get(&queued).is_empty());
    assert!(!h.executor.is_tracked(&queued));

    assert!(!h.executor.revoke(&running).await.unwrap());
    assert_eq!(h.jobs.get(&running)[0].state, JobState::Running);
    assert!(h.executor.is_tracked(&running));
}

#[tokio::test]
async fn test_end_runs_final_sync() {
    let mut h = harness();
    let key = add_job(&h, "finishing", JobState::Failed, Duration::zero()).await;
    h.executor.adopt([key.clone()]).await.unwrap();

    let report = h.executor.end().await;

    assert_eq!(report.failed, 1);
    assert_eq!(h.callbacks.count_for(CallbackKind::Failed, &key), 1);
}
