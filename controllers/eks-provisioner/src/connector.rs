//! Client construction
//!
//! The driver never builds clients itself. It asks a `ClusterConnector` for
//! an AWS client per region and, once the control plane is up, for a
//! Kubernetes and Helm session bound to that cluster's kubeconfig context.

use crate::error::ProvisionerError;
use async_trait::async_trait;
use aws_client::{AwsCliClient, AwsClientTrait};
use cluster_model::ClusterSpec;
use helm_client::{HelmCli, HelmClientTrait};
use kube_client::{KubeClient, KubeClientTrait};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Clients bound to one cluster
#[derive(Clone)]
pub struct ClusterSession {
    pub kube: Arc<dyn KubeClientTrait>,
    pub helm: Arc<dyn HelmClientTrait>,
}

#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// AWS client for a region
    fn aws(&self, region: &str) -> Arc<dyn AwsClientTrait>;

    /// Kubernetes and Helm clients for an existing, active cluster
    async fn connect(&self, cluster: &ClusterSpec) -> Result<ClusterSession, ProvisionerError>;
}

/// Connects through the `aws`, `helm` CLIs and a kubeconfig file
#[derive(Debug, Clone)]
pub struct EksConnector {
    pub aws_profile: Option<String>,
    pub aws_binary: String,
    pub helm_binary: String,
    pub kubeconfig: PathBuf,
    pub call_timeout: Duration,
}

impl EksConnector {
    fn aws_cli(&self, region: &str) -> AwsCliClient {
        AwsCliClient::new(region, self.aws_profile.clone())
            .with_binary(self.aws_binary.clone())
            .with_call_timeout(self.call_timeout)
    }
}

#[async_trait]
impl ClusterConnector for EksConnector {
    fn aws(&self, region: &str) -> Arc<dyn AwsClientTrait> {
        Arc::new(self.aws_cli(region))
    }

    async fn connect(&self, cluster: &ClusterSpec) -> Result<ClusterSession, ProvisionerError> {
        // The context alias is the cluster name, so several clusters can share one kubeconfig
        let context = cluster.name.as_str();
        info!(
            "Writing kubeconfig context {} to {}",
            context,
            self.kubeconfig.display()
        );
        self.aws_cli(&cluster.region)
            .update_kubeconfig(&cluster.name, &self.kubeconfig, context)
            .await?;

        let kube = KubeClient::for_context(&self.kubeconfig, context).await?;
        let helm = HelmCli::new()
            .with_binary(self.helm_binary.clone())
            .with_context(self.kubeconfig.clone(), context);
        Ok(ClusterSession {
            kube: Arc::new(kube),
            helm: Arc::new(helm),
        })
    }
}
