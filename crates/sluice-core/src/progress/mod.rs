//! Progress fan-out: per-task broadcast of `{task_id, progress, timestamp}`
//! events to any number of subscribers.
//!
//! Each task gets a bounded broadcast channel (capacity 64). A lagging
//! subscriber loses the oldest events, never the newest, so the terminal
//! emission (100 or -1) is always the last event retained for delivery.
//! The sender is dropped after the terminal emission, which closes every
//! subscriber stream once it has drained.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Per-subscriber buffer depth.
const CHANNEL_CAPACITY: usize = 64;

/// Progress of a task failed or cancelled.
pub const PROGRESS_ERROR: i32 = -1;
/// Progress of a task completed successfully.
pub const PROGRESS_DONE: i32 = 100;

/// One progress emission.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub task_id: Uuid,
    pub progress: i32,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Whether this event ends the stream for its task.
    pub fn is_terminal(&self) -> bool {
        self.progress == PROGRESS_DONE || self.progress == PROGRESS_ERROR
    }
}

/// Registry of per-task progress channels.
#[derive(Debug, Default)]
pub struct ProgressChannel {
    senders: Mutex<HashMap<Uuid, broadcast::Sender<ProgressEvent>>>,
}

impl ProgressChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a task's progress events.
    ///
    /// Events emitted before the subscription are not replayed. The
    /// receiver closes after the task's terminal event has been drained.
    pub fn subscribe(&self, task_id: Uuid) -> broadcast::Receiver<ProgressEvent> {
        let mut senders = self.senders.lock().expect("progress registry poisoned");
        senders
            .entry(task_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Emit a progress value for a task.
    ///
    /// A terminal value (100 or -1) also removes the task's channel, so no
    /// further events can follow it.
    pub fn emit(&self, task_id: Uuid, progress: i32) {
        let event = ProgressEvent {
            task_id,
            progress,
            timestamp: Utc::now(),
        };
        let terminal = event.is_terminal();

        let mut senders = self.senders.lock().expect("progress registry poisoned");
        if terminal {
            if let Some(sender) = senders.remove(&task_id) {
                let _ = sender.send(event);
            }
        } else {
            let sender = senders
                .entry(task_id)
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
            // Send fails only when nobody is subscribed, which is fine.
            let _ = sender.send(event);
        }
    }

    /// Number of tasks with an open (non-terminated) channel.
    pub fn open_channels(&self) -> usize {
        self.senders.lock().expect("progress registry poisoned").len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let channel = ProgressChannel::new();
        let task_id = Uuid::new_v4();
        let mut rx = channel.subscribe(task_id);

        channel.emit(task_id, 0);
        channel.emit(task_id, 40);
        channel.emit(task_id, 99);
        channel.emit(task_id, 100);

        let mut seen = Vec::new();
        while let Ok(event) = rx.recv().await {
            seen.push(event.progress);
        }
        assert_eq!(seen, vec![0, 40, 99, 100]);
    }

    #[tokio::test]
    async fn terminal_event_closes_channel() {
        let channel = ProgressChannel::new();
        let task_id = Uuid::new_v4();
        let mut rx = channel.subscribe(task_id);

        channel.emit(task_id, PROGRESS_ERROR);
        assert_eq!(channel.open_channels(), 0);

        let event = rx.recv().await.expect("terminal event should arrive");
        assert_eq!(event.progress, PROGRESS_ERROR);
        assert!(event.is_terminal());

        // No further emissions can follow the terminal one.
        assert!(rx.recv().await.is_err());
    }

    #[tokio::test]
    async fn slow_subscriber_loses_oldest_keeps_terminal() {
        let channel = ProgressChannel::new();
        let task_id = Uuid::new_v4();
        let mut rx = channel.subscribe(task_id);

        // Overflow the buffer without draining.
        for i in 0..(CHANNEL_CAPACITY as i32 + 20) {
            channel.emit(task_id, i % 99);
        }
        channel.emit(task_id, 100);

        let mut last = None;
        loop {
            match rx.recv().await {
                Ok(event) => last = Some(event.progress),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        assert_eq!(last, Some(100), "terminal event survives drop-oldest");
    }

    #[tokio::test]
    async fn subscribers_are_independent_per_task() {
        let channel = ProgressChannel::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rx_a = channel.subscribe(a);
        let mut rx_b = channel.subscribe(b);

        channel.emit(a, 50);
        channel.emit(a, 100);
        channel.emit(b, 100);

        let first_a = rx_a.recv().await.unwrap();
        assert_eq!(first_a.progress, 50);
        assert_eq!(first_a.task_id, a);

        let first_b = rx_b.recv().await.unwrap();
        assert_eq!(first_b.progress, 100);
        assert_eq!(first_b.task_id, b);
    }
}
