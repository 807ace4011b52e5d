//! Controller health check
//!
//! The controller counts as ready only after its Deployment reports
//! `availableReplicas >= replicas` on N consecutive polls. A single
//! unhealthy poll resets the count.

use super::ControllerInstaller;
use crate::backoff::sleep_or_cancel;
use crate::error::ProvisionerError;
use crate::reconciler::kubernetes::readiness::deployment_availability;
use kube_client::ObjectKey;
use tokio::time::Instant;
use tracing::{debug, info, warn};

impl ControllerInstaller {
    /// Poll the controller Deployment until it is healthy `health_polls` times in a row.
    ///
    /// Returns the number of polls it took.
    pub(crate) async fn wait_until_healthy(&self, key: &ObjectKey) -> Result<u32, ProvisionerError> {
        let config = &self.kube.ctx.config;
        let required = config.health_polls.max(1);
        let deadline = Instant::now() + config.health_timeout;
        let mut consecutive = 0;
        let mut polls = 0;

        info!("Waiting for {} to be healthy on {} consecutive polls", key, required);
        loop {
            self.kube.ctx.checkpoint()?;
            polls += 1;
            match self.kube.get(key).await {
                Ok(Some(live)) => {
                    let (available, wanted) = deployment_availability(&live);
                    if wanted > 0 && available >= wanted {
                        consecutive += 1;
                        debug!("{} healthy ({}/{}), {} of {} polls", key, available, wanted, consecutive, required);
                    } else {
                        if consecutive > 0 {
                            warn!("{} became unhealthy ({}/{} available)", key, available, wanted);
                        }
                        consecutive = 0;
                    }
                }
                Ok(None) => {
                    debug!("{} does not exist yet", key);
                    consecutive = 0;
                }
                Err(e) if e.is_transient() => {
                    debug!("Health poll of {} failed: {}", key, e);
                    consecutive = 0;
                }
                Err(e) => return Err(e),
            }

            if consecutive >= required {
                info!("{} is healthy after {} polls", key, polls);
                return Ok(polls);
            }
            if Instant::now() + config.health_interval > deadline {
                return Err(ProvisionerError::ControllerNotReady(format!(
                    "{} was not healthy on {} consecutive polls within {}s",
                    key,
                    required,
                    config.health_timeout.as_secs()
                )));
            }
            sleep_or_cancel(&self.kube.ctx.cancel, config.health_interval).await?;
        }
    }

    /// One health observation, without waiting
    pub(crate) async fn is_healthy(&self, key: &ObjectKey) -> Result<bool, ProvisionerError> {
        Ok(self.kube.get(key).await?.is_some_and(|live| {
            let (available, wanted) = deployment_availability(&live);
            wanted > 0 && available >= wanted
        }))
    }
}
