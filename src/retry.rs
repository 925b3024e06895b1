//! Retry Executor (spec.md §4.1).
//!
//! Bounded, jittered exponential backoff around a fallible async call.
//! Grounded on `scrapers/dome.rs::execute_with_retry` (attempt loop, timeout
//! wrapping, per-attempt `warn!`) and `scrapers/binance_session.rs::
//! BackoffCalculator` (exponential backoff with a jitter factor).

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::ScraperError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt-th retry (attempt is 1-based: the delay
    /// before retrying after the 1st failed attempt is `delay_for(1)`).
    fn delay_for(&self, attempt: u32) -> Duration {
        let unjittered = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32 - 1);
        let capped = unjittered.min(self.max_delay.as_secs_f64());
        let jitter_range = self.jitter.clamp(0.0, 1.0);
        let factor = rand::thread_rng().gen_range((1.0 - jitter_range)..=(1.0 + jitter_range));
        Duration::from_secs_f64((capped * factor).max(0.0))
    }
}

/// Run `f` under the given policy, retrying on retryable errors with
/// jittered backoff. Non-retryable errors short-circuit immediately.
/// On exhaustion, returns the last error.
pub async fn execute_with_retry<F, Fut, T>(policy: &RetryPolicy, component: &str, mut f: F) -> Result<T, ScraperError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ScraperError>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.retryable() || attempt >= policy.max_attempts {
                    if attempt > 1 {
                        warn!(
                            component,
                            attempt, kind = err.kind().as_str(), "retry exhausted"
                        );
                    }
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    component,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    kind = err.kind().as_str(),
                    "retrying after error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
            jitter: 0.1,
        }
    }

    #[tokio::test]
    async fn non_retryable_error_invokes_callable_exactly_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ScraperError> = execute_with_retry(&fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ScraperError::parse_schema("test", "bad document")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retryable_error_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = execute_with_retry(&fast_policy(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ScraperError::transport("test", "timeout"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retryable_error_exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ScraperError> = execute_with_retry(&fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ScraperError::transport("test", "still down")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delay_for_respects_max_delay_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            jitter: 0.0,
        };
        // attempt 5 would be 1*2^4=16s unjittered; capped to 2s.
        let delay = policy.delay_for(5);
        assert!(delay <= Duration::from_secs(2));
    }
}
