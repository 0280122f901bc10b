//! Task tracker: the process-wide registry of in-flight tasks and their
//! cancellation handles.
//!
//! At most one active registration exists per task id. Cancellation is
//! cooperative: the orchestrator checks its token at every suspension
//! point and batch boundary.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::TransferError;

/// Registry of running tasks keyed by task id.
#[derive(Debug, Default)]
pub struct TaskTracker {
    inner: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task as running and return its cancellation token.
    ///
    /// Fails with [`TransferError::AlreadyRunning`] when an active
    /// registration for the same id exists.
    pub fn register(&self, task_id: Uuid) -> Result<CancellationToken, TransferError> {
        let mut inner = self.inner.lock().expect("tracker poisoned");
        if inner.contains_key(&task_id) {
            return Err(TransferError::AlreadyRunning(task_id));
        }
        let token = CancellationToken::new();
        inner.insert(task_id, token.clone());
        Ok(token)
    }

    /// Signal cancellation of a running task. Returns whether the task was
    /// registered.
    pub fn cancel(&self, task_id: Uuid) -> bool {
        let inner = self.inner.lock().expect("tracker poisoned");
        match inner.get(&task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove a task's registration once it has reached a terminal status.
    pub fn complete(&self, task_id: Uuid) {
        self.inner
            .lock()
            .expect("tracker poisoned")
            .remove(&task_id);
    }

    pub fn is_running(&self, task_id: Uuid) -> bool {
        self.inner
            .lock()
            .expect("tracker poisoned")
            .contains_key(&task_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_complete() {
        let tracker = TaskTracker::new();
        let id = Uuid::new_v4();

        assert!(!tracker.is_running(id));
        let _token = tracker.register(id).expect("first registration");
        assert!(tracker.is_running(id));

        tracker.complete(id);
        assert!(!tracker.is_running(id));
    }

    #[test]
    fn double_registration_fails() {
        let tracker = TaskTracker::new();
        let id = Uuid::new_v4();

        let _token = tracker.register(id).expect("first registration");
        let second = tracker.register(id);
        assert!(matches!(second, Err(TransferError::AlreadyRunning(_))));

        // Re-registering after completion works again.
        tracker.complete(id);
        assert!(tracker.register(id).is_ok());
    }

    #[test]
    fn cancel_signals_token() {
        let tracker = TaskTracker::new();
        let id = Uuid::new_v4();

        let token = tracker.register(id).expect("registration");
        assert!(!token.is_cancelled());

        assert!(tracker.cancel(id));
        assert!(token.is_cancelled());

        // Cancelling an unknown task reports false.
        assert!(!tracker.cancel(Uuid::new_v4()));
    }
}
