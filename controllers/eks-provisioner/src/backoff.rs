//! # Exponential Backoff
//!
//! Retries external calls that fail transiently (throttling, service faults,
//! timeouts) with exponential backoff and jitter. Anything else is returned
//! immediately: retrying a permission error or a conflict only delays the
//! report.
//!
//! Delays grow as `initial_delay * multiplier^n`, capped at `max_delay`, and
//! each sleep is scaled by a random factor in `0.5..1.5` so parallel cluster
//! runs do not retry in lockstep. Sleeps end early when the run is cancelled.

use crate::error::ProvisionerError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Retry policy for one external call
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for a single delay (before jitter)
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay after `attempt` failed attempts, before jitter
    ///
    /// `attempt` starts at 1.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let factor = self.backoff_multiplier.powi(i32::try_from(exponent).unwrap_or(32));
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }

    /// `delay_for(attempt)` scaled by `jitter`; saturates at `max_delay` when out of range
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32, jitter: f64) -> Duration {
        Duration::try_from_secs_f64(self.delay_for(attempt).as_secs_f64() * jitter).unwrap_or(self.max_delay)
    }
}

/// Sleep for `duration` unless `cancel` fires first
pub async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> Result<(), ProvisionerError> {
    tokio::select! {
        () = cancel.cancelled() => Err(ProvisionerError::Cancelled),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, or
/// `max_attempts` is reached.
///
/// # Arguments
/// * `config` - Retry policy
/// * `cancel` - Checked before every attempt and during backoff sleeps
/// * `operation_name` - Name for log lines
/// * `operation` - The async operation to retry
///
/// # Returns
/// The operation's result, the first non-transient error, or the last
/// transient error once attempts are exhausted.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    operation_name: &str,
    mut operation: F,
) -> Result<T, ProvisionerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProvisionerError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(ProvisionerError::Cancelled);
        }
        attempt += 1;

        let error = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => e,
        };

        if attempt >= max_attempts {
            error!(
                operation = %operation_name,
                attempt = attempt,
                error = %error,
                "Operation failed after max retries"
            );
            return Err(error);
        }

        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let delay = config.jittered_delay(attempt, jitter);
        warn!(
            operation = %operation_name,
            attempt = attempt,
            error = %error,
            delay_ms = delay.as_millis(),
            "Operation failed, retrying"
        );
        sleep_or_cancel(cancel, delay).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_growth_is_capped() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.delay_for(1), Duration::from_secs(1));
        assert_eq!(config.delay_for(2), Duration::from_secs(2));
        assert_eq!(config.delay_for(3), Duration::from_secs(4));
        assert_eq!(config.delay_for(4), Duration::from_secs(5));
        assert_eq!(config.delay_for(40), Duration::from_secs(5));
    }

    #[test]
    fn test_huge_delays_saturate() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::MAX,
            max_delay: Duration::MAX,
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.jittered_delay(3, 1.5), Duration::MAX);
        let config = RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            ..config
        };
        assert_eq!(config.jittered_delay(1, 1.5), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let result = retry_with_backoff(&fast(5), &CancellationToken::new(), "op", || {
            let count = Arc::clone(&count);
            async move {
                if count.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProvisionerError::Transient("throttled".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.ok(), Some(42));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_after_max_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = retry_with_backoff(&fast(3), &CancellationToken::new(), "op", || {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err(ProvisionerError::Transient("throttled".to_string()))
            }
        })
        .await;
        assert!(matches!(result, Err(ProvisionerError::Transient(_))));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_not_retried() {
        let count = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = retry_with_backoff(&fast(5), &CancellationToken::new(), "op", || {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err(ProvisionerError::Permission("AccessDenied".to_string()))
            }
        })
        .await;
        assert!(matches!(result, Err(ProvisionerError::Permission(_))));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = retry_with_backoff(&fast(5), &cancel, "op", || async { Ok(()) }).await;
        assert!(matches!(result, Err(ProvisionerError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff_sleep() {
        let cancel = CancellationToken::new();
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        };
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let result: Result<(), _> = tokio::time::timeout(
            Duration::from_secs(5),
            retry_with_backoff(&config, &cancel, "op", || async {
                Err(ProvisionerError::Transient("unavailable".to_string()))
            }),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(ProvisionerError::Cancelled)));
    }
}
