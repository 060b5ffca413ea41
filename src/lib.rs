//! # edge-executor
//!
//! Coordination core for running workflow tasks on a fleet of remote edge
//! workers. The scheduler and the workers never talk directly: they share
//! a job table and a worker table, and this crate keeps the two views
//! consistent.
//!
//! - [`admission`] validates commands and inserts `Queued` jobs with their
//!   concurrency slots.
//! - [`reconcile`] runs the periodic sync cycle: it notifies the scheduler
//!   of running and finished jobs, reclaims jobs orphaned by silent
//!   workers and purges old terminal records.
//! - [`liveness`] downgrades workers that stopped heartbeating.
//! - [`executor`] ties both halves together behind [`EdgeExecutor`].
//!
//! Persistence is abstracted by the [`store::JobStore`] and
//! [`store::WorkerStore`] traits; [`store::memory`] provides in-memory
//! implementations.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use edge_executor::callbacks::RecordingCallbacks;
//! use edge_executor::store::memory::{InMemoryJobStore, InMemoryWorkerStore};
//! use edge_executor::store::JobStore;
//! use edge_executor::{Command, EdgeExecutor, JobState, JobUpdate, TaskIdentity};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let jobs = Arc::new(InMemoryJobStore::new());
//! let callbacks = Arc::new(RecordingCallbacks::new());
//! let mut executor = EdgeExecutor::builder(jobs.clone(), Arc::new(InMemoryWorkerStore::new()))
//!     .callbacks(callbacks.clone())
//!     .build()
//!     .unwrap();
//!
//! let key = TaskIdentity::new("etl", "run-1", "extract", -1, 1);
//! let command = Command::task_run(["airflow", "tasks", "run", "etl", "run-1", "extract"]);
//! executor.queue_task(key.clone(), command, "default", None).await.unwrap();
//!
//! // A worker picks the job up and finishes it.
//! let now = chrono::Utc::now();
//! jobs.update(&key, JobUpdate::transition(JobState::Success, now), None).await.unwrap();
//!
//! let report = executor.sync().await;
//! assert_eq!(report.succeeded, 1);
//! assert!(!executor.is_tracked(&key));
//! # });
//! ```

pub mod admission;
pub mod callbacks;
pub mod clock;
pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod executor;
pub mod liveness;
#[cfg(feature = "logging")]
pub mod logging;
pub mod metrics;
pub mod reconcile;
pub mod store;
pub mod types;

pub use admission::{AdmissionController, QueuedTask};
pub use domain::{JobRecord, JobUpdate, WorkerRecord, WorkerUpdate};
pub use error::{ConfigError, ExecutorError, NotifyError, Result, StoreError, ValidationError};
pub use executor::{EdgeExecutor, EdgeExecutorBuilder};
pub use reconcile::{ReconciliationEngine, SyncReport};
pub use types::{
    BundleInfo, Command, ExecuteTaskWorkload, JobState, TaskIdentity, TaskInstanceDescriptor,
    WorkerState,
};
