//! Composite task identity.
//!
//! A [`TaskIdentity`] names exactly one execution attempt of one task within
//! one workflow run. It is the key of the engine's running set and the
//! logical key of every job record.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Composite key identifying one execution attempt.
///
/// Two identities are equal iff all five components match.
///
/// # Examples
///
/// ```
/// use edge_executor::TaskIdentity;
///
/// let a = TaskIdentity::new("etl", "run-1", "extract", -1, 1);
/// let b = TaskIdentity::new("etl", "run-1", "extract", -1, 1);
/// let retry = TaskIdentity::new("etl", "run-1", "extract", -1, 2);
/// assert_eq!(a, b);
/// assert_ne!(a, retry);
/// assert_eq!(a.to_string(), "etl/run-1/extract[-1]#1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskIdentity {
    /// Workflow (DAG) the task belongs to.
    pub workflow_id: String,
    /// Run of the workflow.
    pub run_id: String,
    /// Task within the workflow.
    pub task_id: String,
    /// Index within a mapped task, or `-1` for an unmapped one.
    pub map_index: i32,
    /// Attempt counter, starting at 1.
    pub attempt_number: u32,
}

impl TaskIdentity {
    /// Creates an identity from its five components.
    pub fn new(
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
        task_id: impl Into<String>,
        map_index: i32,
        attempt_number: u32,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            task_id: task_id.into(),
            map_index,
            attempt_number,
        }
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}[{}]#{}",
            self.workflow_id, self.run_id, self.task_id, self.map_index, self.attempt_number
        )
    }
}
