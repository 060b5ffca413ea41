//! Metric event sink.
//!
//! The executor reports notable transitions (orphan reclamation, workers
//! going silent) as named events with string tags. Delivery is
//! best-effort: a failing sink is logged and never blocks a transition.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::Mutex;

use crate::error::NotifyError;

/// Tags attached to a metric event, ordered by key.
pub type MetricTags = BTreeMap<String, String>;

/// Destination for metric events.
pub trait MetricSink: Send + Sync + fmt::Debug {
    /// Records one occurrence of `event` with `tags`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the event could not be delivered.
    fn emit(&self, event: &str, tags: &MetricTags) -> Result<(), NotifyError>;
}

/// Builds a [`MetricTags`] map from key/value pairs.
///
/// # Examples
///
/// ```
/// use edge_executor::metrics::tags;
///
/// let t = tags([("queue", "default"), ("outcome", "failed")]);
/// assert_eq!(t["queue"], "default");
/// ```
pub fn tags<I, K, V>(pairs: I) -> MetricTags
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Sink that forwards events to `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricSink;

impl MetricSink for TracingMetricSink {
    fn emit(&self, event: &str, tags: &MetricTags) -> Result<(), NotifyError> {
        tracing::info!(metric = event, tags = ?tags, "metric event");
        Ok(())
    }
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricSink;

impl MetricSink for NoopMetricSink {
    fn emit(&self, _event: &str, _tags: &MetricTags) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// One event captured by [`RecordingMetricSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Event name.
    pub name: String,
    /// Event tags.
    pub tags: MetricTags,
}

/// Sink that keeps every event in memory, for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingMetricSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingMetricSink {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all events recorded so far.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Returns the events named `name`.
    pub fn events_named(&self, name: &str) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }

    /// Forgets all recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl MetricSink for RecordingMetricSink {
    fn emit(&self, event: &str, tags: &MetricTags) -> Result<(), NotifyError> {
        self.events.lock().push(RecordedEvent {
            name: event.to_string(),
            tags: tags.clone(),
        });
        Ok(())
    }
}
