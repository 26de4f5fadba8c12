//! Bounded retry with exponential backoff for transient storage failures.
//!
//! Applied only around the storage put: processing failures and signing
//! failures are terminal and must not pass through here.

use backoff::{backoff::Backoff, ExponentialBackoff};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy: attempt ceiling plus the first backoff delay.
///
/// The wait before attempt `i + 1` is `initial_delay * 2^(i-1)`. Retries are
/// bounded by attempt count only; callers impose an effective deadline by
/// tightening `max_attempts` or `initial_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.initial_delay,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };
        // Start the schedule from initial_interval, not the crate default
        backoff.reset();
        backoff
    }
}

/// Run `operation` until it succeeds or the attempt ceiling is reached.
///
/// Issues at most `policy.max_attempts` invocations. The final attempt's
/// error is returned unmodified.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = policy.backoff();
    let mut attempt = 1u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = %operation_name,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(e) if attempt >= policy.max_attempts => {
                warn!(
                    operation = %operation_name,
                    attempts = attempt,
                    error = %e,
                    "Operation failed, attempts exhausted"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = backoff.next_backoff().unwrap_or(policy.initial_delay);
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                metrics::counter!("photos.storage.retries").increment(1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::cell::Cell;

    fn policy(max_attempts: u32, initial_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(initial_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt_makes_one_call() {
        let calls = Cell::new(0u32);

        let result: Result<u32, anyhow::Error> =
            retry_with_backoff(&policy(3, 100), "put_object", || {
                calls.set(calls.get() + 1);
                async { Ok(7) }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let calls = Cell::new(0u32);

        let result = retry_with_backoff(&policy(3, 100), "put_object", || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 3 {
                    Err(anyhow!("throttled"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_stops_at_attempt_ceiling() {
        let calls = Cell::new(0u32);

        let result: Result<(), anyhow::Error> =
            retry_with_backoff(&policy(3, 100), "put_object", || {
                calls.set(calls.get() + 1);
                async { Err(anyhow!("connection reset")) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "connection reset");
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delay_doubles_between_attempts() {
        let start = tokio::time::Instant::now();

        let _: Result<(), anyhow::Error> =
            retry_with_backoff(&policy(4, 100), "put_object", || async {
                Err(anyhow!("unavailable"))
            })
            .await;

        // Waits of 100ms, 200ms and 400ms between the four attempts
        assert_eq!(start.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_policy_never_sleeps() {
        let start = tokio::time::Instant::now();

        let result: Result<(), anyhow::Error> =
            retry_with_backoff(&policy(1, 100), "put_object", || async {
                Err(anyhow!("down"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
