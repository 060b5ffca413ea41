//! Scheduler-facing state change notifications.
//!
//! [`TaskCallbacks`] is passed to the reconciliation engine at
//! construction. The engine calls it synchronously from `sync()`, at most
//! once per identity and transition.

use std::fmt;

use parking_lot::Mutex;

use crate::error::NotifyError;
use crate::types::identity::TaskIdentity;

/// Receiver of job state changes observed by the engine.
pub trait TaskCallbacks: Send + Sync + fmt::Debug {
    /// The job was observed running for the first time.
    ///
    /// # Errors
    ///
    /// A returned error is logged; the engine does not retry.
    fn on_running(&self, key: &TaskIdentity) -> Result<(), NotifyError>;

    /// The job finished successfully and is no longer tracked.
    ///
    /// # Errors
    ///
    /// A returned error is logged; the engine does not retry.
    fn on_success(&self, key: &TaskIdentity) -> Result<(), NotifyError>;

    /// The job failed and is no longer tracked.
    ///
    /// # Errors
    ///
    /// A returned error is logged; the engine does not retry.
    fn on_failed(&self, key: &TaskIdentity) -> Result<(), NotifyError>;
}

/// Callbacks that ignore every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallbacks;

impl TaskCallbacks for NoopCallbacks {
    fn on_running(&self, _key: &TaskIdentity) -> Result<(), NotifyError> {
        Ok(())
    }

    fn on_success(&self, _key: &TaskIdentity) -> Result<(), NotifyError> {
        Ok(())
    }

    fn on_failed(&self, _key: &TaskIdentity) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Kind of notification captured by [`RecordingCallbacks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    /// `on_running`
    Running,
    /// `on_success`
    Success,
    /// `on_failed`
    Failed,
}

/// Callbacks that record every call, for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingCallbacks {
    calls: Mutex<Vec<(CallbackKind, TaskIdentity)>>,
}

impl RecordingCallbacks {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every call in order.
    pub fn calls(&self) -> Vec<(CallbackKind, TaskIdentity)> {
        self.calls.lock().clone()
    }

    /// Returns how many calls of `kind` were made.
    pub fn count(&self, kind: CallbackKind) -> usize {
        self.calls.lock().iter().filter(|(k, _)| *k == kind).count()
    }

    /// Returns how many calls of `kind` were made for `key`.
    pub fn count_for(&self, kind: CallbackKind, key: &TaskIdentity) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(k, id)| *k == kind && id == key)
            .count()
    }

    /// Forgets all recorded calls.
    pub fn reset(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, kind: CallbackKind, key: &TaskIdentity) -> Result<(), NotifyError> {
        self.calls.lock().push((kind, key.clone()));
        Ok(())
    }
}

impl TaskCallbacks for RecordingCallbacks {
    fn on_running(&self, key: &TaskIdentity) -> Result<(), NotifyError> {
        self.record(CallbackKind::Running, key)
    }

    fn on_success(&self, key: &TaskIdentity) -> Result<(), NotifyError> {
        self.record(CallbackKind::Success, key)
    }

    fn on_failed(&self, key: &TaskIdentity) -> Result<(), NotifyError> {
        self.record(CallbackKind::Failed, key)
    }
}
