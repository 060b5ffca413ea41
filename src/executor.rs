//! Executor facade tying admission and reconciliation together.
//!
//! [`EdgeExecutor`] is what a scheduler embeds. Submitting through it
//! writes a `Queued` job and tracks its identity in the engine's running
//! set; [`run`](EdgeExecutor::run) then drives the sync cycle on a fixed
//! interval until the shutdown token is cancelled.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//!
//! use edge_executor::store::memory::{InMemoryJobStore, InMemoryWorkerStore};
//! use edge_executor::{Command, EdgeExecutor, TaskIdentity};
//!
//! # tokio_test_block_on(async {
//! let mut executor = EdgeExecutor::builder(
//!     Arc::new(InMemoryJobStore::new()),
//!     Arc::new(InMemoryWorkerStore::new()),
//! )
//! .build()
//! .unwrap();
//!
//! let key = TaskIdentity::new("etl", "run-1", "extract", -1, 1);
//! executor
//!     .queue_task(
//!         key.clone(),
//!         Command::task_run(["airflow", "tasks", "run", "etl", "extract"]),
//!         "default",
//!         None,
//!     )
//!     .await
//!     .unwrap();
//! assert!(executor.is_tracked(&key));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::admission::{AdmissionController, QueuedTask};
use crate::callbacks::TaskCallbacks;
use crate::clock::{Clock, SystemClock};
use crate::config::ExecutorConfig;
use crate::domain::JobRecord;
use crate::error::{ConfigError, Result, StoreError};
use crate::liveness::LivenessPolicy;
use crate::metrics::MetricSink;
use crate::reconcile::{ReconciliationEngine, SyncReport};
use crate::store::{JobStore, WorkerStore};
use crate::types::command::{Command, ExecuteTaskWorkload};
use crate::types::identity::TaskIdentity;

/// Builder for [`EdgeExecutor`].
pub struct EdgeExecutorBuilder {
    jobs: Arc<dyn JobStore>,
    workers: Arc<dyn WorkerStore>,
    config: ExecutorConfig,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<dyn MetricSink>>,
    callbacks: Option<Arc<dyn TaskCallbacks>>,
    policy: Option<Arc<dyn LivenessPolicy>>,
}

impl EdgeExecutorBuilder {
    /// Uses `config` instead of the defaults.
    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the time source shared by admission and reconciliation.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
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

    /// Validates the configuration and builds the executor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the configuration is inconsistent.
    pub fn build(self) -> Result<EdgeExecutor, ConfigError> {
        self.config.validate()?;

        let admission = AdmissionController::new(self.jobs.clone(), self.clock.clone(), &self.config);
        let mut engine = ReconciliationEngine::builder(self.jobs, self.workers)
            .config(&self.config)
            .clock(self.clock);
        if let Some(metrics) = self.metrics {
            engine = engine.metrics(metrics);
        }
        if let Some(callbacks) = self.callbacks {
            engine = engine.callbacks(callbacks);
        }
        if let Some(policy) = self.policy {
            engine = engine.liveness_policy(policy);
        }

        Ok(EdgeExecutor {
            admission,
            engine: engine.build(),
            sync_interval: self.config.sync_interval(),
        })
    }
}

/// Scheduler-facing executor.
#[derive(Debug)]
pub struct EdgeExecutor {
    admission: AdmissionController,
    engine: ReconciliationEngine,
    sync_interval: Duration,
}

impl EdgeExecutor {
    /// Starts building an executor over the given stores.
    pub fn builder(jobs: Arc<dyn JobStore>, workers: Arc<dyn WorkerStore>) -> EdgeExecutorBuilder {
        EdgeExecutorBuilder {
            jobs,
            workers,
            config: ExecutorConfig::default(),
            clock: Arc::new(SystemClock),
            metrics: None,
            callbacks: None,
            policy: None,
        }
    }

    /// The admission controller; safe to share across tasks.
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// The reconciliation engine.
    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    /// Polling period of [`run`](Self::run).
    pub fn sync_interval(&self) -> Duration {
        self.sync_interval
    }

    /// Admits a job and tracks its identity.
    ///
    /// # Errors
    ///
    /// See [`AdmissionController::submit`]. A rejected job is not tracked.
    pub async fn queue_task(
        &mut self,
        key: TaskIdentity,
        command: Command,
        queue: &str,
        pool_slots: Option<u32>,
    ) -> Result<JobRecord> {
        let record = self
            .admission
            .submit(key.clone(), command, queue, pool_slots)
            .await?;
        self.engine.track(key);
        Ok(record)
    }

    /// Admits a structured workload and tracks its identity.
    ///
    /// # Errors
    ///
    /// See [`AdmissionController::submit_workload`].
    pub async fn queue_workload(&mut self, workload: ExecuteTaskWorkload) -> Result<JobRecord> {
        let record = self.admission.submit_workload(workload).await?;
        self.engine.track(record.key());
        Ok(record)
    }

    /// Admits tasks in order, tracking each one admitted.
    ///
    /// Stops at the first rejection; tasks admitted before it stay queued
    /// and tracked.
    ///
    /// # Errors
    ///
    /// Returns the error of the first task that could not be admitted.
    pub async fn queue_tasks<I>(&mut self, tasks: I) -> Result<Vec<JobRecord>>
    where
        I: IntoIterator<Item = QueuedTask>,
    {
        let mut admitted = Vec::new();
        for task in tasks {
            admitted.push(
                self.queue_task(task.key, task.command, &task.queue, task.pool_slots)
                    .await?,
            );
        }
        Ok(admitted)
    }

    /// Runs one reconciliation cycle.
    pub async fn sync(&mut self) -> SyncReport {
        self.engine.sync().await
    }

    /// Adopts identities from a previous scheduler process.
    ///
    /// Returns the identities that have no job record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the job table cannot be read.
    pub async fn adopt<I>(&mut self, keys: I) -> Result<Vec<TaskIdentity>, StoreError>
    where
        I: IntoIterator<Item = TaskIdentity>,
    {
        self.engine.adopt(keys).await
    }

    /// Revokes a job that no worker has picked up yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    pub async fn revoke(&mut self, key: &TaskIdentity) -> Result<bool, StoreError> {
        self.engine.revoke(key).await
    }

    /// Returns `true` if `key` is in the running set.
    pub fn is_tracked(&self, key: &TaskIdentity) -> bool {
        self.engine.is_tracked(key)
    }

    /// Runs a last cycle before the executor is dropped.
    pub async fn end(&mut self) -> SyncReport {
        tracing::info!(tracked = self.engine.running().len(), "executor shutting down");
        self.engine.sync().await
    }

    /// Drives sync cycles every [`sync_interval`](Self::sync_interval)
    /// until `shutdown` is cancelled.
    ///
    /// The first cycle runs immediately. Ticks missed while a cycle overruns
    /// the interval are skipped, not replayed. Returns the number of cycles
    /// run.
    pub async fn run(&mut self, shutdown: CancellationToken) -> u64 {
        tracing::info!(
            interval_ms = saturating_millis(self.sync_interval),
            "executor sync loop started"
        );
        let mut ticker = tokio::time::interval(self.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut cycles = 0;
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    tracing::info!(cycles, "executor sync loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.engine.sync().await;
                    cycles += 1;
                }
            }
        }
        cycles
    }

    /// Moves the executor onto a tokio task running [`run`](Self::run).
    ///
    /// The handle resolves to the executor once `shutdown` is cancelled,
    /// so the caller can still call [`end`](Self::end).
    pub fn spawn(mut self, shutdown: CancellationToken) -> JoinHandle<Self> {
        tokio::spawn(async move {
            self.run(shutdown).await;
            self
        })
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
