//! AWS Load Balancer Controller installer
//!
//! Walks the controller through
//! `Absent → PolicyCreated → ServiceAccountBound → ReleaseInstalled → Ready`.
//! Nothing is persisted between runs: every transition looks at what already
//! exists and only acts on the difference. IAM resources are never rolled
//! back; a release upgrade that never becomes healthy can be.
//!
//! - `policy`: IAM policy and its document
//! - `health`: consecutive-poll health check of the controller Deployment

mod health;
mod policy;


use crate::context::RunContext;
use crate::error::ProvisionerError;
use crate::reconcile_helpers::ReconcileMode;
use crate::reconciler::aws::{AwsReconciler, ClusterState};
use crate::reconciler::kubernetes::KubeReconciler;
use crate::report::{ResourceStatus, StageRecorder};
use aws_client::AwsClientTrait;
use cluster_model::{
    ClusterSpec, ControllerRelease, IamPolicyBinding, Manifest, OidcBinding, ROLE_ARN_ANNOTATION,
    trust_covers_service_account, values_subset,
};
use helm_client::{HelmClientTrait, HelmRelease, ReleaseRequest, ReleaseStatus};
use kube_client::{KubeClientTrait, ObjectKey};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Installer progress, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallerState {
    Absent,
    PolicyCreated,
    ServiceAccountBound,
    ReleaseInstalled,
    Ready,
}

impl fmt::Display for InstallerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Absent => "Absent",
            Self::PolicyCreated => "PolicyCreated",
            Self::ServiceAccountBound => "ServiceAccountBound",
            Self::ReleaseInstalled => "ReleaseInstalled",
            Self::Ready => "Ready",
        };
        f.write_str(s)
    }
}

/// Result of the release transition
struct ReleaseOutcome {
    /// Deployed revision before this run, if any
    previous: Option<HelmRelease>,
    upgraded: bool,
}

/// Installs the load balancer controller into one cluster.
pub struct ControllerInstaller {
    pub(crate) aws: AwsReconciler,
    pub(crate) kube: KubeReconciler,
    pub(crate) helm: Arc<dyn HelmClientTrait>,
    pub(crate) http: reqwest::Client,
}

impl ControllerInstaller {
    pub fn new(
        aws: Arc<dyn AwsClientTrait>,
        kube: Arc<dyn KubeClientTrait>,
        helm: Arc<dyn HelmClientTrait>,
        ctx: RunContext,
    ) -> Result<Self, ProvisionerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProvisionerError::PolicyDocument(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            aws: AwsReconciler::new(aws, ctx.clone(), ReconcileMode::Apply),
            kube: KubeReconciler::new(kube, ctx),
            helm,
            http,
        })
    }

    /// Drive the controller to `Ready`.
    ///
    /// `base_dir` resolves a policy document given as a relative path.
    pub async fn install(
        &self,
        spec: &ClusterSpec,
        cluster: &ClusterState,
        release: &ControllerRelease,
        base_dir: &Path,
        recorder: &mut StageRecorder,
    ) -> Result<InstallerState, ProvisionerError> {
        let binding = release.policy_binding(&spec.name);
        let deployment = controller_deployment(release);

        info!("Installing {} into cluster {}", release.release_name, spec.name);

        let policy_arn = self.ensure_policy(&binding, base_dir, recorder).await?;
        self.transition(InstallerState::PolicyCreated);

        self.kube.ctx.checkpoint()?;
        self.ensure_service_account(&binding, &cluster.oidc, &policy_arn, &spec.tags, recorder)
            .await?;
        self.transition(InstallerState::ServiceAccountBound);

        self.kube.ctx.checkpoint()?;
        let values = release.values(spec, &cluster.vpc_id);
        let outcome = self.ensure_release(release, &values, recorder).await?;
        self.transition(InstallerState::ReleaseInstalled);

        self.kube.ctx.checkpoint()?;
        match self.wait_until_healthy(&deployment).await {
            Ok(_) => {
                self.transition(InstallerState::Ready);
                Ok(InstallerState::Ready)
            }
            Err(e @ ProvisionerError::ControllerNotReady(_)) => {
                self.roll_back_release(release, &outcome, recorder).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Furthest state already reached, without changing anything
    pub async fn observe(
        &self,
        spec: &ClusterSpec,
        cluster: &ClusterState,
        release: &ControllerRelease,
    ) -> Result<InstallerState, ProvisionerError> {
        let binding = release.policy_binding(&spec.name);
        let aws = &self.aws;

        let policy = aws
            .ctx
            .retry("find IAM policy", || async {
                aws.client.find_policy(&binding.policy_name).await.map_err(ProvisionerError::from)
            })
            .await?;
        let Some(policy) = policy else {
            return Ok(InstallerState::Absent);
        };

        let role = aws
            .ctx
            .retry("get IAM role", || async {
                aws.client.get_role(&binding.role_name).await.map_err(ProvisionerError::from)
            })
            .await?;
        let trusted = role.as_ref().is_some_and(|r| {
            trust_covers_service_account(&r.assume_role_policy_document, &cluster.oidc, &binding.service_account)
        });
        if !trusted {
            return Ok(InstallerState::PolicyCreated);
        }
        let attached = aws
            .ctx
            .retry("list attached policies", || async {
                aws.client
                    .list_attached_role_policies(&binding.role_name)
                    .await
                    .map_err(ProvisionerError::from)
            })
            .await?;
        let annotated = self
            .kube
            .get(&service_account_key(&binding))
            .await?
            .and_then(|sa| {
                sa.pointer("/metadata/annotations")
                    .and_then(|a| a.get(ROLE_ARN_ANNOTATION))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
        let role_arn = role.map(|r| r.arn);
        if !attached.iter().any(|p| p.policy_arn == policy.arn) || annotated != role_arn {
            return Ok(InstallerState::PolicyCreated);
        }

        let current = self.current_release(release).await?;
        let values = release.values(spec, &cluster.vpc_id);
        if current.as_ref().is_none_or(|r| release_needs_upgrade(release, &values, r)) {
            return Ok(InstallerState::ServiceAccountBound);
        }

        if self.is_healthy(&controller_deployment(release)).await? {
            Ok(InstallerState::Ready)
        } else {
            Ok(InstallerState::ReleaseInstalled)
        }
    }

    fn transition(&self, state: InstallerState) {
        info!(state = %state, "Controller installer reached {}", state);
    }

    /// IRSA role trusted by the service account, the policy attached, and the annotated ServiceAccount
    async fn ensure_service_account(
        &self,
        binding: &IamPolicyBinding,
        oidc: &OidcBinding,
        policy_arn: &str,
        tags: &BTreeMap<String, String>,
        recorder: &mut StageRecorder,
    ) -> Result<(), ProvisionerError> {
        let trust_policy = binding.trust_policy(oidc);
        let (role, mut status) = self.aws.ensure_role(&binding.role_name, &trust_policy, tags).await?;

        if status == ResourceStatus::Unchanged
            && !trust_covers_service_account(&role.assume_role_policy_document, oidc, &binding.service_account)
        {
            warn!(
                "IAM role {} does not trust {}",
                binding.role_name,
                binding.service_account.subject()
            );
            return Err(ProvisionerError::Conflict(format!(
                "IAM role {} exists but its trust policy does not allow {} through {}",
                binding.role_name,
                binding.service_account.subject(),
                oidc.provider_arn
            )));
        }

        let attached = self
            .aws
            .attach_missing_policies(&binding.role_name, &[policy_arn.to_string()])
            .await?;
        if attached > 0 && status == ResourceStatus::Unchanged {
            status = ResourceStatus::Updated;
        }
        recorder.record("IAMRole", &binding.role_name, status);

        let service_account = Manifest::new(json!({
            "apiVersion": "v1",
            "kind": "ServiceAccount",
            "metadata": {
                "name": binding.service_account.name,
                "namespace": binding.service_account.namespace,
                "labels": {
                    "app.kubernetes.io/name": "aws-load-balancer-controller",
                    "app.kubernetes.io/component": "controller",
                },
                "annotations": {
                    ROLE_ARN_ANNOTATION: role.arn,
                },
            },
        }))?;
        self.kube
            .apply_batch(std::slice::from_ref(&service_account), recorder)
            .await?;
        Ok(())
    }

    async fn current_release(&self, release: &ControllerRelease) -> Result<Option<HelmRelease>, ProvisionerError> {
        self.kube
            .ctx
            .retry("helm status", || async {
                self.helm
                    .get_release(&release.release_name, &release.namespace)
                    .await
                    .map_err(ProvisionerError::from)
            })
            .await
    }

    /// `helm upgrade --install` when the release is absent, failed or differs
    async fn ensure_release(
        &self,
        release: &ControllerRelease,
        values: &Value,
        recorder: &mut StageRecorder,
    ) -> Result<ReleaseOutcome, ProvisionerError> {
        let name = format!("{}/{}", release.namespace, release.release_name);
        let mut current = self.current_release(release).await?;

        let mut recovered = false;
        if let Some(stuck) = current.as_ref().filter(|r| r.status.is_pending()) {
            self.recover_pending_release(release, stuck, recorder).await?;
            current = self.current_release(release).await?;
            recovered = true;
        }

        if let Some(current) = &current {
            if !release_needs_upgrade(release, values, current) {
                debug!("Helm release {} is up to date (revision {})", name, current.revision);
                let status = if recovered {
                    ResourceStatus::Updated
                } else {
                    ResourceStatus::Unchanged
                };
                recorder.record("HelmRelease", &name, status);
                return Ok(ReleaseOutcome {
                    previous: Some(current.clone()),
                    upgraded: false,
                });
            }
        }

        let ctx = &self.kube.ctx;
        ctx.retry("helm repo add", || async {
            self.helm
                .add_repo(&release.repository.name, &release.repository.url)
                .await
                .map_err(ProvisionerError::from)
        })
        .await?;

        let request = ReleaseRequest {
            name: release.release_name.clone(),
            namespace: release.namespace.clone(),
            chart: release.chart.clone(),
            version: release.chart_version.clone(),
            values: values.clone(),
            wait_timeout: Some(ctx.config.helm_timeout),
        };
        info!(
            "Running helm upgrade --install {} {} (version {})",
            name,
            release.chart,
            release.chart_version.as_deref().unwrap_or("latest")
        );
        let installed = ctx
            .retry("helm upgrade --install", || async {
                self.helm.upgrade_install(&request).await.map_err(ProvisionerError::from)
            })
            .await?;
        info!("Helm release {} is at revision {}", name, installed.revision);

        let status = if current.is_some() {
            ResourceStatus::Updated
        } else {
            ResourceStatus::Created
        };
        recorder.record_with_message("HelmRelease", &name, status, format!("revision {}", installed.revision));
        Ok(ReleaseOutcome {
            previous: current.filter(|r| r.status == ReleaseStatus::Deployed),
            upgraded: true,
        })
    }

    /// Unblock a release left pending by an interrupted helm call.
    ///
    /// Rolls back to the last revision that was deployed, or uninstalls a
    /// release that never got that far.
    async fn recover_pending_release(
        &self,
        release: &ControllerRelease,
        stuck: &HelmRelease,
        recorder: &mut StageRecorder,
    ) -> Result<(), ProvisionerError> {
        let name = format!("{}/{}", release.namespace, release.release_name);
        let ctx = &self.kube.ctx;
        let revisions = ctx
            .retry("helm history", || async {
                self.helm
                    .revisions(&release.release_name, &release.namespace)
                    .await
                    .map_err(ProvisionerError::from)
            })
            .await?;
        let last_good = revisions
            .iter()
            .rev()
            .filter(|r| r.revision < stuck.revision)
            .find(|r| matches!(r.status, ReleaseStatus::Deployed | ReleaseStatus::Superseded));

        match last_good {
            Some(target) => {
                warn!(
                    "Helm release {} is stuck at revision {} ({:?}), rolling back to revision {}",
                    name, stuck.revision, stuck.status, target.revision
                );
                ctx.retry("helm rollback", || async {
                    self.helm
                        .rollback(&release.release_name, &release.namespace, target.revision)
                        .await
                        .map_err(ProvisionerError::from)
                })
                .await?;
                recorder.warn(format!(
                    "{} was {:?} at revision {}, rolled back to revision {}",
                    name, stuck.status, stuck.revision, target.revision
                ));
            }
            None => {
                warn!(
                    "Helm release {} is stuck at revision {} ({:?}) with no deployed revision, uninstalling it",
                    name, stuck.revision, stuck.status
                );
                ctx.retry("helm uninstall", || async {
                    self.helm
                        .uninstall(&release.release_name, &release.namespace)
                        .await
                        .map_err(ProvisionerError::from)
                })
                .await?;
                recorder.warn(format!("{} was {:?} with no deployed revision, uninstalled", name, stuck.status));
            }
        }
        Ok(())
    }

    /// Return to the previously deployed revision after an unhealthy upgrade. Failures only warn.
    async fn roll_back_release(&self, release: &ControllerRelease, outcome: &ReleaseOutcome, recorder: &mut StageRecorder) {
        let config = &self.kube.ctx.config;
        let Some(previous) = outcome.previous.as_ref().filter(|_| outcome.upgraded && config.rollback_release) else {
            return;
        };
        let name = format!("{}/{}", release.namespace, release.release_name);
        warn!("Rolling back Helm release {} to revision {}", name, previous.revision);
        let result = self
            .kube
            .ctx
            .retry("helm rollback", || async {
                self.helm
                    .rollback(&release.release_name, &release.namespace, previous.revision)
                    .await
                    .map_err(ProvisionerError::from)
            })
            .await;
        match result {
            Ok(()) => {
                recorder.set_status("HelmRelease", &name, ResourceStatus::RolledBack);
                recorder.warn(format!("rolled back {} to revision {}", name, previous.revision));
            }
            Err(e) => recorder.warn(format!("rollback of {} failed: {}", name, e)),
        }
    }
}

/// Whether an observed release differs from what should be deployed
fn release_needs_upgrade(release: &ControllerRelease, values: &Value, current: &HelmRelease) -> bool {
    if current.status != ReleaseStatus::Deployed {
        debug!("Helm release {} is {:?}", current.name, current.status);
        return true;
    }
    if let Some(version) = &release.chart_version {
        if &current.chart_version != version {
            debug!(
                "Helm release {} runs chart {}, want {}",
                current.name, current.chart_version, version
            );
            return true;
        }
    }
    !values_subset(values, &current.values)
}

fn controller_deployment(release: &ControllerRelease) -> ObjectKey {
    ObjectKey::new("apps/v1", "Deployment", Some(&release.namespace), &release.deployment_name)
}

fn service_account_key(binding: &IamPolicyBinding) -> ObjectKey {
    ObjectKey::new(
        "v1",
        "ServiceAccount",
        Some(&binding.service_account.namespace),
        &binding.service_account.name,
    )
}
