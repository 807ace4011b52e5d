//! IAM policy for the controller
//!
//! The policy document is only fetched when the policy does not exist yet,
//! so converged runs never touch the network for it.

use super::ControllerInstaller;
use crate::error::ProvisionerError;
use crate::reconcile_helpers::{ReconcileMode, lookup_or_create};
use crate::report::{ResourceStatus, StageRecorder};
use cluster_model::{IamPolicyBinding, PolicyDocumentSource};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

impl ControllerInstaller {
    /// Ensure the named policy exists; returns its ARN
    pub(crate) async fn ensure_policy(
        &self,
        binding: &IamPolicyBinding,
        base_dir: &Path,
        recorder: &mut StageRecorder,
    ) -> Result<String, ProvisionerError> {
        let name = binding.policy_name.as_str();
        let find = || async { self.aws.client.find_policy(name).await.map_err(ProvisionerError::from) };

        if let Some(existing) = self.aws.ctx.retry(&format!("find IAM policy {}", name), &find).await? {
            debug!("IAM policy {} already exists", name);
            recorder.record("IAMPolicy", name, ResourceStatus::Unchanged);
            return Ok(existing.arn);
        }

        let document = self.load_policy_document(&binding.policy_document, base_dir).await?;
        let (policy, status) = lookup_or_create(
            &self.aws.ctx,
            ReconcileMode::Apply,
            "IAMPolicy",
            name,
            &find,
            || async {
                self.aws
                    .client
                    .create_policy(name, &document)
                    .await
                    .map_err(ProvisionerError::from)
            },
        )
        .await?;

        recorder.record("IAMPolicy", name, status);
        Ok(policy.arn)
    }

    /// Read a policy document from a URL, a file or the spec itself
    pub(crate) async fn load_policy_document(
        &self,
        source: &PolicyDocumentSource,
        base_dir: &Path,
    ) -> Result<Value, ProvisionerError> {
        let document = match source {
            PolicyDocumentSource::Inline(document) => document.clone(),
            PolicyDocumentSource::Path(path) => {
                let resolved = if path.is_absolute() {
                    path.clone()
                } else {
                    base_dir.join(path)
                };
                info!("Reading IAM policy document from {}", resolved.display());
                let raw = tokio::fs::read_to_string(&resolved).await.map_err(|e| {
                    ProvisionerError::PolicyDocument(format!("failed to read {}: {}", resolved.display(), e))
                })?;
                serde_json::from_str(&raw).map_err(|e| {
                    ProvisionerError::PolicyDocument(format!("{} is not valid JSON: {}", resolved.display(), e))
                })?
            }
            PolicyDocumentSource::Url(url) => {
                info!("Downloading IAM policy document from {}", url);
                self.aws
                    .ctx
                    .retry("download IAM policy document", || async {
                        let response = self.http.get(url).send().await?.error_for_status()?;
                        Ok::<_, ProvisionerError>(response.json::<Value>().await?)
                    })
                    .await?
            }
        };

        if document.get("Statement").is_none() {
            return Err(ProvisionerError::PolicyDocument(
                "policy document has no Statement".to_string(),
            ));
        }
        Ok(document)
    }
}
