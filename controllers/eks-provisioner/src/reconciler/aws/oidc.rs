//! IAM OIDC provider for the cluster token issuer

use super::AwsReconciler;
use crate::error::ProvisionerError;
use crate::report::{ResourceStatus, StageRecorder};
use aws_client::{EksCluster, OidcProvider};
use cluster_model::{ClusterSpec, OidcBinding, STS_AUDIENCE, strip_scheme};
use tracing::{debug, info, warn};

impl AwsReconciler {
    /// Associate the cluster issuer with an IAM OIDC provider, creating it when absent
    pub(crate) async fn ensure_oidc_provider(
        &self,
        spec: &ClusterSpec,
        cluster: &EksCluster,
        recorder: &mut StageRecorder,
    ) -> Result<OidcBinding, ProvisionerError> {
        let issuer_url = cluster
            .oidc_issuer()
            .ok_or_else(|| {
                ProvisionerError::Conflict(format!("EKS cluster {} reports no OIDC issuer", spec.name))
            })?
            .to_string();
        let host_path = strip_scheme(&issuer_url).to_string();

        let (provider, status) = match self.find_oidc_provider(&host_path).await? {
            Some(provider) => {
                debug!("OIDC provider for {} already exists", host_path);
                (provider, ResourceStatus::Unchanged)
            }
            None => {
                self.mode.forbid(format!("create OIDC provider for {}", host_path))?;
                (self.create_oidc_provider(&host_path).await?, ResourceStatus::Created)
            }
        };

        recorder.record("OIDCProvider", &host_path, status);
        Ok(OidcBinding {
            cluster_name: spec.name.clone(),
            issuer_url,
            provider_arn: provider.arn,
        })
    }

    async fn find_oidc_provider(&self, host_path: &str) -> Result<Option<OidcProvider>, ProvisionerError> {
        let providers = self
            .ctx
            .retry("iam list-open-id-connect-providers", || async {
                self.client.list_oidc_providers().await.map_err(ProvisionerError::from)
            })
            .await?;
        Ok(providers.into_iter().find(|p| strip_scheme(&p.url) == host_path))
    }

    async fn create_oidc_provider(&self, host_path: &str) -> Result<OidcProvider, ProvisionerError> {
        let url = format!("https://{}", host_path);
        let client_ids = vec![STS_AUDIENCE.to_string()];
        info!("Creating OIDC provider for {}", url);
        let created = self
            .ctx
            .retry("iam create-open-id-connect-provider", || async {
                self.client
                    .create_oidc_provider(&url, &client_ids)
                    .await
                    .map_err(ProvisionerError::from)
            })
            .await;

        match created {
            Ok(provider) => {
                info!("Created OIDC provider {}", provider.arn);
                Ok(provider)
            }
            Err(e) if e.is_already_exists() => {
                warn!("OIDC provider for {} was created concurrently, using the existing one", host_path);
                self.find_oidc_provider(host_path).await?.ok_or(e)
            }
            Err(e) => Err(e),
        }
    }
}
