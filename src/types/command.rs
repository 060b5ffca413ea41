//! Executable payloads handed to edge workers.
//!
//! A job's command must describe a task-run invocation. Two shapes are
//! accepted: the legacy argv form (`<runner> tasks run ...`) and the
//! structured [`ExecuteTaskWorkload`]. Anything else is rejected before it
//! is persisted, so a worker never receives an arbitrary shell command.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::identity::TaskIdentity;

/// Subcommand tokens that must follow the runner program in argv commands.
pub const TASK_RUN_SUBCOMMAND: [&str; 2] = ["tasks", "run"];

/// Payload executed by a worker for one job.
///
/// # Examples
///
/// ```
/// use edge_executor::Command;
///
/// let ok = Command::task_run(["airflow", "tasks", "run", "etl", "extract"]);
/// assert!(ok.validate("airflow").is_ok());
///
/// let shell = Command::task_run(["rm", "-rf", "/"]);
/// assert!(shell.validate("airflow").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Command line of the form `<runner> tasks run <args...>`.
    TaskRun {
        /// Full argument vector, including the program name.
        argv: Vec<String>,
    },
    /// Structured workload describing the task instance to execute.
    ExecuteTask(ExecuteTaskWorkload),
}

impl Command {
    /// Builds an argv command from any iterable of strings.
    pub fn task_run<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::TaskRun {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    /// Checks that the payload is a task-run invocation.
    ///
    /// `runner_program` is the program name argv commands must start with.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MalformedCommand`] describing the first
    /// problem found.
    pub fn validate(&self, runner_program: &str) -> Result<(), ValidationError> {
        match self {
            Self::TaskRun { argv } => {
                let prefix_ok = argv.len() >= 3
                    && argv[0] == runner_program
                    && argv[1..3] == TASK_RUN_SUBCOMMAND;
                if prefix_ok {
                    Ok(())
                } else {
                    Err(ValidationError::MalformedCommand {
                        reason: format!(
                            "the command must start with [{runner_program:?}, \"tasks\", \"run\"], got {argv:?}"
                        ),
                    })
                }
            },
            Self::ExecuteTask(workload) => workload.validate(),
        }
    }

    /// Serializes the command to the opaque string stored on a job record.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MalformedCommand`] if serialization fails.
    pub fn to_payload(&self) -> Result<String, ValidationError> {
        serde_json::to_string(self).map_err(|e| ValidationError::MalformedCommand {
            reason: format!("failed to serialize command: {e}"),
        })
    }

    /// Parses a payload produced by [`to_payload`](Self::to_payload).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MalformedCommand`] if the payload is not
    /// a serialized command.
    pub fn from_payload(payload: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(payload).map_err(|e| ValidationError::MalformedCommand {
            reason: format!("failed to parse command payload: {e}"),
        })
    }
}

/// Structured workload for executing one task instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteTaskWorkload {
    /// Token the worker presents when reporting on this task.
    pub token: String,
    /// The task instance to execute.
    pub ti: TaskInstanceDescriptor,
    /// Path of the workflow definition, relative to its bundle.
    pub workflow_rel_path: String,
    /// Where the worker writes task logs.
    pub log_path: Option<String>,
    /// Bundle the workflow definition is loaded from.
    pub bundle_info: BundleInfo,
}

impl ExecuteTaskWorkload {
    /// Returns the identity of the task instance this workload runs.
    pub fn identity(&self) -> TaskIdentity {
        self.ti.identity()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.token.is_empty() {
            return Err(ValidationError::MalformedCommand {
                reason: "workload token is empty".to_string(),
            });
        }
        if self.workflow_rel_path.is_empty() {
            return Err(ValidationError::MalformedCommand {
                reason: "workload has no workflow path".to_string(),
            });
        }
        if self.ti.pool_slots == 0 {
            return Err(ValidationError::InvalidPoolSlots { slots: 0 });
        }
        Ok(())
    }
}

/// Task instance fields carried by an [`ExecuteTaskWorkload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInstanceDescriptor {
    /// Scheduler-side instance id.
    pub id: uuid::Uuid,
    /// Workflow the task belongs to.
    pub workflow_id: String,
    /// Run of the workflow.
    pub run_id: String,
    /// Task within the workflow.
    pub task_id: String,
    /// Index within a mapped task.
    pub map_index: i32,
    /// Attempt counter.
    pub try_number: u32,
    /// Concurrency slots charged against the task's pool.
    pub pool_slots: u32,
    /// Queue label selecting a worker pool.
    pub queue: String,
    /// Scheduling priority, opaque to the executor.
    #[serde(default)]
    pub priority_weight: i32,
}

impl TaskInstanceDescriptor {
    /// Returns the task identity described by this instance.
    pub fn identity(&self) -> TaskIdentity {
        TaskIdentity::new(
            self.workflow_id.clone(),
            self.run_id.clone(),
            self.task_id.clone(),
            self.map_index,
            self.try_number,
        )
    }
}

/// Location of a workflow bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleInfo {
    /// Bundle name.
    pub name: String,
    /// Bundle version, if pinned.
    pub version: Option<String>,
}
