//! Retry service: exponential backoff with cancellation awareness.
//!
//! The classifier decides which failures are worth another attempt;
//! everything else surfaces immediately. Delays grow by a factor of 1.5
//! from `initial_delay` up to `max_delay`, with optional jitter so
//! simultaneous retries against a recovering server spread out.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TransferError;

/// Backoff growth factor between attempts.
const BACKOFF_MULTIPLIER: f64 = 1.5;

/// Retry policy for one operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 means run exactly once.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Randomize each delay within [50%, 100%] of its nominal value.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Nominal delay before retry number `attempt` (1-based), before jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = BACKOFF_MULTIPLIER.powi(attempt.saturating_sub(1) as i32);
        let nominal = self.initial_delay.mul_f64(factor);
        nominal.min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails unretriably, exhausts the policy, or
/// is cancelled.
///
/// `classifier` receives each error and returns whether it is retriable.
/// The attempt number (0-based) is passed to `op` so callers can log it.
/// Cancellation is observed before every attempt and aborts mid-wait.
pub async fn execute<T, F, Fut, C>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    classifier: C,
    mut op: F,
) -> Result<T, TransferError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, TransferError>>,
    C: Fn(&TransferError) -> bool,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(TransferError::Cancelled) => return Err(TransferError::Cancelled),
            Err(err) => {
                if !classifier(&err) || attempt >= policy.max_retries {
                    return Err(err);
                }
                attempt += 1;

                let mut delay = policy.delay_for(attempt);
                if policy.jitter {
                    let scale = 0.5 + rand::random::<f64>() * 0.5;
                    delay = delay.mul_f64(scale);
                }
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after backoff"
                );

                tokio::select! {
                    _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        }
    }

    #[test]
    fn backoff_schedule_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            jitter: false,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(150));
        assert_eq!(policy.delay_for(3), Duration::from_millis(225));
        // Capped at max_delay from here on.
        assert_eq!(policy.delay_for(4), Duration::from_millis(300));
        assert_eq!(policy.delay_for(9), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result = execute(
            &fast_policy(5),
            &CancellationToken::new(),
            TransferError::is_connection,
            |_| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TransferError::ConnectionLost("flap".into()))
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unretriable_error_surfaces_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = execute(
            &fast_policy(5),
            &CancellationToken::new(),
            TransferError::is_connection,
            |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(TransferError::Validation {
                        field: "id".into(),
                        reason: "required".into(),
                    })
                }
            },
        )
        .await;
        assert!(matches!(result, Err(TransferError::Validation { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn budget_exhaustion_returns_last_error() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = execute(
            &fast_policy(2),
            &CancellationToken::new(),
            TransferError::is_connection,
            |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(TransferError::Timeout("still down".into())) }
            },
        )
        .await;
        assert!(matches!(result, Err(TransferError::Timeout(_))));
        // Initial attempt plus two retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_aborts_before_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = execute(
            &fast_policy(5),
            &cancel,
            TransferError::is_connection,
            |_| async { Ok(()) },
        )
        .await;
        assert!(matches!(result, Err(TransferError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellation_aborts_mid_wait() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_retries: 1,
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            jitter: false,
        };

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<(), _> = execute(
            &policy,
            &cancel,
            TransferError::is_connection,
            |_| async { Err(TransferError::ConnectionLost("down".into())) },
        )
        .await;
        assert!(matches!(result, Err(TransferError::Cancelled)));
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "cancellation must interrupt the backoff sleep"
        );
    }
}
