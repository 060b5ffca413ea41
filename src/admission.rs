//! Admission of new work into the job queue.
//!
//! The [`AdmissionController`] validates a command, resolves its
//! concurrency slots and queue, and inserts one `Queued` [`JobRecord`].
//! It never touches the reconciliation engine's running set; the
//! [`EdgeExecutor`](crate::executor::EdgeExecutor) facade tracks admitted
//! identities afterwards.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::ExecutorConfig;
use crate::domain::JobRecord;
use crate::error::{Result, ValidationError};
use crate::store::JobStore;
use crate::types::command::{Command, ExecuteTaskWorkload};
use crate::types::identity::TaskIdentity;

/// One entry of a [`submit_batch`](AdmissionController::submit_batch) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    /// Identity the job is submitted under.
    pub key: TaskIdentity,
    /// Payload the worker executes.
    pub command: Command,
    /// Queue label; empty selects the default queue.
    pub queue: String,
    /// Requested concurrency slots; `None` means one.
    pub pool_slots: Option<u32>,
}

impl QueuedTask {
    /// Creates a batch entry occupying one slot.
    pub fn new(key: TaskIdentity, command: Command, queue: impl Into<String>) -> Self {
        Self {
            key,
            command,
            queue: queue.into(),
            pool_slots: None,
        }
    }

    /// Sets the requested concurrency slots.
    pub fn with_pool_slots(mut self, slots: u32) -> Self {
        self.pool_slots = Some(slots);
        self
    }
}

/// Validates submissions and writes them to the job store.
///
/// `submit` takes `&self` and may be called from many tasks at once.
#[derive(Clone)]
pub struct AdmissionController {
    jobs: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    runner_program: String,
    default_queue: String,
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("runner_program", &self.runner_program)
            .field("default_queue", &self.default_queue)
            .finish_non_exhaustive()
    }
}

impl AdmissionController {
    /// Creates a controller writing to `jobs`.
    pub fn new(jobs: Arc<dyn JobStore>, clock: Arc<dyn Clock>, config: &ExecutorConfig) -> Self {
        Self {
            jobs,
            clock,
            runner_program: config.runner_program.clone(),
            default_queue: config.default_queue.clone(),
        }
    }

    /// Admits one job.
    ///
    /// On success exactly one row is inserted, in state `Queued`, with
    /// `concurrency_slots` set to `pool_slots` (one when `None`).
    ///
    /// A structured workload carries its own queue and slots. An empty
    /// `queue` or a `None` `pool_slots` takes the workload's value; an
    /// explicit value must agree with it.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::MalformedCommand`] if the command is not a
    ///   task-run invocation. Nothing is inserted.
    /// - [`ValidationError::InvalidPoolSlots`] if `pool_slots` is zero.
    /// - [`ValidationError::IdentityMismatch`] if a structured workload
    ///   describes another task than `key`.
    /// - [`ValidationError::WorkloadMismatch`] if `queue` or `pool_slots`
    ///   contradicts the structured workload.
    /// - [`StoreError`](crate::error::StoreError) if the insert fails.
    pub async fn submit(
        &self,
        key: TaskIdentity,
        command: Command,
        queue: &str,
        pool_slots: Option<u32>,
    ) -> Result<JobRecord> {
        command.validate(&self.runner_program)?;
        if pool_slots == Some(0) {
            return Err(ValidationError::InvalidPoolSlots { slots: 0 }.into());
        }

        let (queue, slots) = match &command {
            Command::ExecuteTask(workload) => {
                let workload_key = workload.identity();
                if workload_key != key {
                    return Err(ValidationError::IdentityMismatch {
                        submitted: key.to_string(),
                        workload: workload_key.to_string(),
                    }
                    .into());
                }
                if !queue.is_empty() && queue != workload.ti.queue {
                    return Err(ValidationError::WorkloadMismatch {
                        field: "queue",
                        submitted: queue.to_string(),
                        workload: workload.ti.queue.clone(),
                    }
                    .into());
                }
                if let Some(slots) = pool_slots.filter(|&slots| slots != workload.ti.pool_slots) {
                    return Err(ValidationError::WorkloadMismatch {
                        field: "pool_slots",
                        submitted: slots.to_string(),
                        workload: workload.ti.pool_slots.to_string(),
                    }
                    .into());
                }
                (workload.ti.queue.as_str(), workload.ti.pool_slots)
            },
            Command::TaskRun { .. } => (queue, pool_slots.unwrap_or(1)),
        };
        let queue = if queue.is_empty() {
            self.default_queue.as_str()
        } else {
            queue
        };

        let record = JobRecord::queued(key, queue, command.to_payload()?, slots, self.clock.now());
        self.jobs.insert(record.clone()).await?;
        tracing::debug!(
            workflow_id = %record.workflow_id,
            task_id = %record.task_id,
            map_index = record.map_index,
            attempt_number = record.attempt_number,
            queue = %record.queue,
            concurrency_slots = record.concurrency_slots,
            "job queued"
        );
        Ok(record)
    }

    /// Admits a structured workload, taking identity, queue and slots from it.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub async fn submit_workload(&self, workload: ExecuteTaskWorkload) -> Result<JobRecord> {
        let key = workload.identity();
        let queue = workload.ti.queue.clone();
        let slots = workload.ti.pool_slots;
        self.submit(key, Command::ExecuteTask(workload), &queue, Some(slots))
            .await
    }

    /// Admits tasks in order, stopping at the first rejection.
    ///
    /// Rows inserted before the failing entry stay inserted.
    ///
    /// # Errors
    ///
    /// Returns the error of the first entry that could not be admitted.
    pub async fn submit_batch<I>(&self, tasks: I) -> Result<Vec<JobRecord>>
    where
        I: IntoIterator<Item = QueuedTask>,
    {
        let mut admitted = Vec::new();
        for task in tasks {
            let record = self
                .submit(task.key, task.command, &task.queue, task.pool_slots)
                .await?;
            admitted.push(record);
        }
        Ok(admitted)
    }
}
