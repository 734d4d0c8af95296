//! Retry and timeout helpers for remote calls
//!
//! Only idempotent calls should go through [`retry_async`]; the caller's
//! `should_retry` predicate decides which failures are transient.

use crate::error::{CoreError, CoreResult, ErrorContext};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Exponential backoff policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, the first one included
    pub max_attempts: usize,
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Spread delays by up to ±10%
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 250,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay_ms as f64);
        let spread = if self.jitter {
            1.0 + (fastrand::f64() - 0.5) * 0.2
        } else {
            1.0
        };
        Duration::from_millis((capped * spread).max(0.0) as u64)
    }
}

/// Run `operation` until it succeeds, `should_retry` rejects the error, or
/// the attempts run out. The last error is returned.
pub async fn retry_async<F, T, E, P>(
    operation: F,
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
) -> Result<T, E>
where
    F: Fn() -> BoxFuture<'static, Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if attempt >= max_attempts || !should_retry(&error) {
            return Err(error);
        }

        let delay = config.backoff(attempt as u32);
        warn!(
            operation = operation_name,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient failure, retrying"
        );
        sleep(delay).await;
        attempt += 1;
    }
}

/// Fail with [`CoreError::Timeout`] if `future` takes longer than `timeout_ms`
pub async fn with_timeout<F, T>(future: F, timeout_ms: u64, operation_name: &str) -> CoreResult<T>
where
    F: Future<Output = T>,
{
    timeout(Duration::from_millis(timeout_ms), future)
        .await
        .map_err(|_| CoreError::Timeout {
            operation: operation_name.to_string(),
            duration_ms: timeout_ms,
            context: ErrorContext::new("async_utils")
                .with_operation(operation_name)
                .with_suggestion("Increase backend.request_timeout_ms")
                .with_suggestion("Check that the backend is reachable"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_retry(max_attempts: usize) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<(), String> = retry_async(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("rejected".to_string()) }.boxed()
            },
            &fast_retry(5),
            "non_retryable",
            |_| false,
        )
        .await;

        assert_eq!(result.unwrap_err(), "rejected");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 350,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(350));
        assert_eq!(config.backoff(8), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let config = RetryConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 1000,
            ..RetryConfig::default()
        };
        for _ in 0..50 {
            let millis = config.backoff(1).as_millis();
            assert!((900..=1100).contains(&millis), "{millis}");
        }
    }

    #[tokio::test]
    async fn test_retry_none_makes_single_attempt() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<(), String> = retry_async(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("down".to_string()) }.boxed()
            },
            &RetryConfig::none(),
            "single",
            |_| true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
