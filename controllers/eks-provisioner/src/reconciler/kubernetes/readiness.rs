//! Readiness waits

use super::KubeReconciler;
use crate::error::ProvisionerError;
use kube_client::ObjectKey;
use serde_json::Value;
use tracing::{debug, info};

impl KubeReconciler {
    /// Wait until an applied object is usable; kinds without a readiness notion return at once
    pub(crate) async fn wait_ready(&self, key: &ObjectKey) -> Result<(), ProvisionerError> {
        match key.kind.as_str() {
            "Deployment" => self.wait_for_rollout(key).await,
            "Service" => self.wait_for_cluster_ip(key).await,
            _ => Ok(()),
        }
    }

    /// `availableReplicas >= replicas` for the current generation
    async fn wait_for_rollout(&self, key: &ObjectKey) -> Result<(), ProvisionerError> {
        let config = &self.ctx.config;
        let what = format!("rollout of {}", key);
        self.ctx
            .poll_until(&what, config.rollout_timeout, config.kube_poll_interval, || async {
                let live = self.client.get(key).await?.ok_or_else(|| vanished(key))?;
                let (available, wanted) = deployment_availability(&live);
                if available >= wanted && generation_observed(&live) {
                    Ok(Some(()))
                } else {
                    debug!("{}: {}/{} replicas available", key, available, wanted);
                    Ok(None)
                }
            })
            .await?;
        info!("{} is available", key);
        Ok(())
    }

    async fn wait_for_cluster_ip(&self, key: &ObjectKey) -> Result<(), ProvisionerError> {
        let config = &self.ctx.config;
        let what = format!("cluster IP of {}", key);
        self.ctx
            .poll_until(&what, config.rollout_timeout, config.kube_poll_interval, || async {
                let live = self.client.get(key).await?.ok_or_else(|| vanished(key))?;
                let external_name = live.pointer("/spec/type").and_then(Value::as_str) == Some("ExternalName");
                let assigned = live
                    .pointer("/spec/clusterIP")
                    .and_then(Value::as_str)
                    .is_some_and(|ip| !ip.is_empty());
                Ok((external_name || assigned).then_some(()))
            })
            .await
    }

    /// Wait for the load balancer address of an Ingress (hostname, or IP when there is none)
    pub async fn wait_for_ingress_address(&self, key: &ObjectKey) -> Result<String, ProvisionerError> {
        let config = &self.ctx.config;
        let what = format!("load balancer address of {}", key);
        info!("Waiting for {}", what);
        let address = self
            .ctx
            .poll_until(&what, config.ingress_timeout, config.kube_poll_interval, || async {
                let live = self.client.get(key).await?.ok_or_else(|| vanished(key))?;
                Ok(ingress_address(&live))
            })
            .await?;
        info!("{} is reachable at {}", key, address);
        Ok(address)
    }
}

/// `(available, desired)` replicas of a Deployment
pub fn deployment_availability(live: &Value) -> (i64, i64) {
    let available = live
        .pointer("/status/availableReplicas")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let wanted = live.pointer("/spec/replicas").and_then(Value::as_i64).unwrap_or(1);
    (available, wanted)
}

fn generation_observed(live: &Value) -> bool {
    match (
        live.pointer("/metadata/generation").and_then(Value::as_i64),
        live.pointer("/status/observedGeneration").and_then(Value::as_i64),
    ) {
        (Some(generation), Some(observed)) => observed >= generation,
        _ => true,
    }
}

/// First load balancer hostname or IP reported on an Ingress
pub fn ingress_address(live: &Value) -> Option<String> {
    let entry = live.pointer("/status/loadBalancer/ingress/0")?;
    entry
        .get("hostname")
        .or_else(|| entry.get("ip"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn vanished(key: &ObjectKey) -> ProvisionerError {
    ProvisionerError::Conflict(format!("{} was deleted while waiting for it", key))
}
