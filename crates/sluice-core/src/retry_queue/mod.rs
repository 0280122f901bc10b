//! Retry queue: holds tasks that failed for connection reasons and re-runs
//! them once the databases look healthy again.
//!
//! The scheduler wakes on a fixed interval, skips the cycle when a previous
//! one is still processing or the readiness check fails, and otherwise
//! dequeues a small batch. A task that keeps failing past its retry budget
//! is marked permanently failed and dropped from the queue.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::orchestrator::Orchestrator;

/// Readiness gate consulted before each processing cycle.
///
/// Implemented by the health monitor; tests substitute their own.
#[async_trait]
pub trait Readiness: Send + Sync {
    /// Whether the Task Store and the configured servers are reachable.
    async fn ready(&self) -> bool;
}

/// Queue tuning knobs.
#[derive(Debug, Clone)]
pub struct RetryQueueConfig {
    /// Scheduler wake interval.
    pub retry_interval: Duration,
    /// Failures tolerated before a task is marked permanently failed.
    pub max_retries: u32,
    /// Tasks re-run per cycle.
    pub dequeue_limit: usize,
    /// Queue capacity; enqueues beyond it are dropped with a warning.
    pub capacity: usize,
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5 * 60),
            max_retries: 3,
            dequeue_limit: 3,
            capacity: 100,
        }
    }
}

/// One queued task.
#[derive(Debug, Clone, Serialize)]
pub struct RetryEntry {
    pub task_id: Uuid,
    pub retry_count: u32,
    pub first_failure_at: DateTime<Utc>,
    pub last_failure_at: DateTime<Utc>,
    pub last_reason: String,
}

/// Bounded in-memory queue of connection-failed tasks.
#[derive(Debug)]
pub struct RetryQueue {
    config: RetryQueueConfig,
    entries: Mutex<Vec<RetryEntry>>,
    processing: AtomicBool,
}

impl RetryQueue {
    pub fn new(config: RetryQueueConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(Vec::new()),
            processing: AtomicBool::new(false),
        }
    }

    /// Enqueue a task after a connection-classified failure.
    ///
    /// An already-queued task keeps its retry count; only the failure
    /// timestamps and reason are refreshed.
    pub fn enqueue(&self, task_id: Uuid, reason: &str) {
        let mut entries = self.entries.lock().expect("retry queue poisoned");
        if let Some(entry) = entries.iter_mut().find(|e| e.task_id == task_id) {
            entry.last_failure_at = Utc::now();
            entry.last_reason = reason.to_owned();
            return;
        }
        if entries.len() >= self.config.capacity {
            warn!(%task_id, "retry queue full, dropping task");
            return;
        }
        info!(%task_id, reason, "queueing task for connection retry");
        let now = Utc::now();
        entries.push(RetryEntry {
            task_id,
            retry_count: 0,
            first_failure_at: now,
            last_failure_at: now,
            last_reason: reason.to_owned(),
        });
    }

    /// Remove a task from the queue. Returns whether it was present.
    pub fn remove(&self, task_id: Uuid) -> bool {
        let mut entries = self.entries.lock().expect("retry queue poisoned");
        let before = entries.len();
        entries.retain(|e| e.task_id != task_id);
        entries.len() != before
    }

    /// Bump a task's retry count after another failed attempt. Returns the
    /// new count, or `None` when the task is not queued.
    fn record_failure(&self, task_id: Uuid, reason: &str) -> Option<u32> {
        let mut entries = self.entries.lock().expect("retry queue poisoned");
        let entry = entries.iter_mut().find(|e| e.task_id == task_id)?;
        entry.retry_count += 1;
        entry.last_failure_at = Utc::now();
        entry.last_reason = reason.to_owned();
        Some(entry.retry_count)
    }

    /// Current queue contents, oldest first.
    pub fn snapshot(&self) -> Vec<RetryEntry> {
        self.entries.lock().expect("retry queue poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("retry queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the scheduler until cancelled.
    pub async fn run(
        self: Arc<Self>,
        orchestrator: Arc<Orchestrator>,
        readiness: Arc<dyn Readiness>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("retry queue scheduler stopping");
                    return;
                }
                _ = tokio::time::sleep(self.config.retry_interval) => {}
            }
            self.process_once(&orchestrator, readiness.as_ref()).await;
        }
    }

    /// One processing cycle: skipped when already in flight or unhealthy.
    pub async fn process_once(&self, orchestrator: &Orchestrator, readiness: &dyn Readiness) {
        if self.processing.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.is_empty() {
            self.processing.store(false, Ordering::SeqCst);
            return;
        }

        if !readiness.ready().await {
            info!("databases not healthy, deferring retry queue processing");
            self.processing.store(false, Ordering::SeqCst);
            return;
        }

        let batch: Vec<Uuid> = {
            let entries = self.entries.lock().expect("retry queue poisoned");
            entries
                .iter()
                .take(self.config.dequeue_limit)
                .map(|e| e.task_id)
                .collect()
        };

        for task_id in batch {
            match orchestrator.run_task(task_id).await {
                Ok(outcome) => {
                    info!(%task_id, inserted = outcome.inserted, "queued task recovered");
                    self.remove(task_id);
                }
                Err(err) => {
                    let Some(count) = self.record_failure(task_id, &err.to_string()) else {
                        continue;
                    };
                    if count >= self.config.max_retries {
                        warn!(
                            %task_id,
                            retries = count,
                            error = %err,
                            "retry budget exhausted, marking task permanently failed"
                        );
                        self.remove(task_id);
                    } else {
                        warn!(%task_id, retries = count, error = %err, "queued task failed again");
                    }
                }
            }
        }

        self.processing.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> RetryQueue {
        RetryQueue::new(RetryQueueConfig {
            capacity: 2,
            ..Default::default()
        })
    }

    #[test]
    fn enqueue_starts_at_zero_retries() {
        let queue = queue();
        let id = Uuid::new_v4();
        queue.enqueue(id, "connect timeout");

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].task_id, id);
        assert_eq!(snapshot[0].retry_count, 0);
        assert_eq!(snapshot[0].last_reason, "connect timeout");
    }

    #[test]
    fn re_enqueue_refreshes_without_duplicating() {
        let queue = queue();
        let id = Uuid::new_v4();
        queue.enqueue(id, "first");
        queue.enqueue(id, "second");

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].last_reason, "second");
        assert_eq!(snapshot[0].retry_count, 0);
    }

    #[test]
    fn capacity_is_enforced() {
        let queue = queue();
        queue.enqueue(Uuid::new_v4(), "a");
        queue.enqueue(Uuid::new_v4(), "b");
        queue.enqueue(Uuid::new_v4(), "overflow");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn record_failure_counts_up() {
        let queue = queue();
        let id = Uuid::new_v4();
        queue.enqueue(id, "down");

        assert_eq!(queue.record_failure(id, "still down"), Some(1));
        assert_eq!(queue.record_failure(id, "still down"), Some(2));
        assert_eq!(queue.record_failure(Uuid::new_v4(), "unknown"), None);
    }

    #[test]
    fn remove_reports_presence() {
        let queue = queue();
        let id = Uuid::new_v4();
        queue.enqueue(id, "down");
        assert!(queue.remove(id));
        assert!(!queue.remove(id));
        assert!(queue.is_empty());
    }
}
