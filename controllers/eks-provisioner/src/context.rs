//! Per-run context shared by every stage

use crate::backoff::{retry_with_backoff, sleep_or_cancel};
use crate::config::ProvisionerConfig;
use crate::error::ProvisionerError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Read-only configuration plus the cancellation token of a run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: Arc<ProvisionerConfig>,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(config: Arc<ProvisionerConfig>, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    /// Fail with `Cancelled` once the run was interrupted
    pub fn checkpoint(&self) -> Result<(), ProvisionerError> {
        if self.cancel.is_cancelled() {
            Err(ProvisionerError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Retry an external call with the configured backoff
    pub async fn retry<T, F, Fut>(&self, operation_name: &str, operation: F) -> Result<T, ProvisionerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProvisionerError>>,
    {
        retry_with_backoff(&self.config.retry, &self.cancel, operation_name, operation).await
    }

    /// Poll `probe` every `interval` until it returns `Some`, for at most `timeout`.
    ///
    /// Transient probe errors are logged and polled again; other errors end
    /// the wait. Expiry yields `ProvisionerError::Timeout`.
    pub async fn poll_until<T, F, Fut>(
        &self,
        what: &str,
        timeout: Duration,
        interval: Duration,
        mut probe: F,
    ) -> Result<T, ProvisionerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, ProvisionerError>>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.checkpoint()?;
            match probe().await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => debug!("Waiting for {}", what),
                Err(e) if e.is_transient() => debug!("Waiting for {}: {}", what, e),
                Err(e) => return Err(e),
            }
            if Instant::now() + interval > deadline {
                return Err(ProvisionerError::Timeout(format!(
                    "{} not reached within {}s",
                    what,
                    timeout.as_secs()
                )));
            }
            sleep_or_cancel(&self.cancel, interval).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn context() -> RunContext {
        RunContext::new(Arc::new(ProvisionerConfig::default()), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_poll_until_returns_value() {
        let polls = AtomicU32::new(0);
        let value = context()
            .poll_until("ready", Duration::from_secs(1), Duration::from_millis(1), || async {
                let n = polls.fetch_add(1, Ordering::SeqCst);
                Ok((n >= 2).then_some(n))
            })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let result: Result<(), _> = context()
            .poll_until("never", Duration::from_millis(20), Duration::from_millis(5), || async { Ok(None) })
            .await;
        assert!(matches!(result, Err(ProvisionerError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_poll_until_stops_on_fatal_error() {
        let result: Result<(), _> = context()
            .poll_until("x", Duration::from_secs(1), Duration::from_millis(1), || async {
                Err(ProvisionerError::Conflict("cluster is FAILED".to_string()))
            })
            .await;
        assert!(matches!(result, Err(ProvisionerError::Conflict(_))));
    }
}
