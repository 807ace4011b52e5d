//! Service roles and policy attachments

use super::AwsReconciler;
use crate::error::ProvisionerError;
use crate::reconcile_helpers::lookup_or_create;
use crate::report::{ResourceStatus, StageRecorder};
use aws_client::IamRole;
use cluster_model::{service_trust_policy, trust_covers_service};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

impl AwsReconciler {
    /// Ensure a role assumable by `service` exists with the given AWS managed policies attached.
    ///
    /// Returns the role ARN. An existing role whose trust policy does not
    /// admit `service` is a conflict; the provisioner never rewrites trust.
    pub(crate) async fn ensure_service_role(
        &self,
        role_name: &str,
        service: &str,
        managed_policies: &[&str],
        tags: &BTreeMap<String, String>,
        recorder: &mut StageRecorder,
    ) -> Result<String, ProvisionerError> {
        let trust_policy = service_trust_policy(service);
        let (role, mut status) = self.ensure_role(role_name, &trust_policy, tags).await?;

        if status == ResourceStatus::Unchanged && !trust_covers_service(&role.assume_role_policy_document, service) {
            warn!("IAM role {} does not trust {}", role_name, service);
            return Err(ProvisionerError::Conflict(format!(
                "IAM role {} exists but its trust policy does not allow {}",
                role_name, service
            )));
        }

        let policy_arns: Vec<String> = managed_policies
            .iter()
            .map(|name| self.managed_policy_arn(name))
            .collect();
        let attached = self.attach_missing_policies(role_name, &policy_arns).await?;
        if attached > 0 && status == ResourceStatus::Unchanged {
            status = ResourceStatus::Updated;
        }

        recorder.record("IAMRole", role_name, status);
        Ok(role.arn)
    }

    /// Look up a role by name, creating it with `trust_policy` when absent
    pub(crate) async fn ensure_role(
        &self,
        role_name: &str,
        trust_policy: &Value,
        tags: &BTreeMap<String, String>,
    ) -> Result<(IamRole, ResourceStatus), ProvisionerError> {
        lookup_or_create(
            &self.ctx,
            self.mode,
            "IAMRole",
            role_name,
            || async { self.client.get_role(role_name).await.map_err(ProvisionerError::from) },
            || async {
                self.client
                    .create_role(role_name, trust_policy, tags)
                    .await
                    .map_err(ProvisionerError::from)
            },
        )
        .await
    }

    /// Attach each policy not yet attached to `role_name`.
    ///
    /// Returns how many attachments were made.
    pub(crate) async fn attach_missing_policies(
        &self,
        role_name: &str,
        policy_arns: &[String],
    ) -> Result<usize, ProvisionerError> {
        let attached = self
            .ctx
            .retry(&format!("list attached policies of {}", role_name), || async {
                self.client
                    .list_attached_role_policies(role_name)
                    .await
                    .map_err(ProvisionerError::from)
            })
            .await?;

        let mut count = 0;
        for policy_arn in policy_arns {
            if attached.iter().any(|p| &p.policy_arn == policy_arn) {
                debug!("Policy {} already attached to {}", policy_arn, role_name);
                continue;
            }
            self.mode.forbid(format!("attach {} to IAM role {}", policy_arn, role_name))?;
            self.ctx
                .retry(&format!("attach {} to {}", policy_arn, role_name), || async {
                    self.client
                        .attach_role_policy(role_name, policy_arn)
                        .await
                        .map_err(ProvisionerError::from)
                })
                .await?;
            info!("Attached {} to IAM role {}", policy_arn, role_name);
            count += 1;
        }
        Ok(count)
    }
}
