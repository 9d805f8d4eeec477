//! Per-operation timeout and retry with exponential backoff.
//!
//! Only transient storage failures (see `StorageError::is_transient`) are
//! retried. Each attempt gets its own deadline; there is no deadline for the
//! sequence as a whole.

use std::future::Future;
use std::time::Duration;

use quayside_state::StorageError;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::metrics::METRICS;

/// Retry configuration for one class of network operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 = run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (milliseconds).
    pub backoff_base_ms: u64,
    /// Upper bound for a single backoff delay (milliseconds).
    pub max_backoff_ms: u64,
    /// Deadline for a single attempt (milliseconds).
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
            max_backoff_ms: 30_000,
            timeout_ms: 120_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(
            self.backoff_base_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Final error after the policy gave up.
#[derive(Debug)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub error: StorageError,
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> std::result::Result<T, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, StorageError>>,
{
    let max_attempts = policy.max_attempts();
    let timeout = Duration::from_millis(policy.timeout_ms);

    let mut attempt = 1;
    loop {
        let error = match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_elapsed) => StorageError::Timeout {
                elapsed_ms: policy.timeout_ms,
            },
        };

        if !error.is_transient() || attempt >= max_attempts {
            return Err(RetryExhausted {
                attempts: attempt,
                error,
            });
        }

        let delay = policy.backoff(attempt);
        warn!(
            operation,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "transient failure, retrying"
        );
        METRICS.inc_retries();
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            backoff_base_ms: 10,
            max_backoff_ms: 1_000,
            timeout_ms: 1_000,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_retries: 10,
            backoff_base_ms: 100,
            max_backoff_ms: 500,
            timeout_ms: 1,
        };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
        assert_eq!(p.backoff(4), Duration::from_millis(500));
    }

    #[test]
    fn default_policy() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.max_attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let out = retry_transient(&fast(), "put", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StorageError::Unavailable("blip".into()))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = &AtomicU32::new(0);
        let err = retry_transient(&fast(), "put", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(StorageError::Unavailable("down".into()))
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let err = retry_transient(&fast(), "put", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(StorageError::Rejected {
                key: "k".into(),
                reason: "forbidden".into(),
            })
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(matches!(err.error, StorageError::Rejected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out_and_retry() {
        let calls = &AtomicU32::new(0);
        let out = retry_transient(&fast(), "get", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok("done")
        })
        .await
        .unwrap();
        assert_eq!(out, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
