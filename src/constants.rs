//! Metric names and configuration defaults.

/// Emitted when a running job is reclaimed after its worker went silent.
///
/// Tags: `workflow_id`, `queue`, `task_id`, `outcome` (always `failed`).
pub const TASK_FINISH_METRIC: &str = "edge_worker.ti.finish";

/// Emitted when a worker is downgraded to `Unknown`. Tag: `worker_name`.
pub const WORKER_UNKNOWN_METRIC: &str = "edge_worker.unknown";

/// Outcome tag value for reclaimed jobs.
pub const OUTCOME_FAILED: &str = "failed";

/// Default orphan detection window, in seconds.
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 300;

/// Default retention of terminal job records, in seconds.
pub const DEFAULT_PURGE_RETENTION_SECS: u64 = 3_600;

/// Default worker heartbeat interval, in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Default polling period of the sync loop, in seconds.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 5;

/// Queue used when a submission carries an empty queue label.
pub const DEFAULT_QUEUE: &str = "default";

/// Program argv commands must start with.
pub const DEFAULT_RUNNER_PROGRAM: &str = "airflow";

/// Prefix of environment variables read by
/// [`ExecutorConfig::from_env`](crate::config::ExecutorConfig::from_env).
pub const ENV_PREFIX: &str = "EDGE_EXECUTOR_";
