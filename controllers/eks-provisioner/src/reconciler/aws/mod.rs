//! AWS resource reconciler
//!
//! Produces (or verifies) a running EKS control plane, its IAM OIDC provider
//! and node capacity for a `ClusterSpec`. Organized by resource:
//! - `cluster`: network checks and the control plane
//! - `iam`: service roles and policy attachments
//! - `oidc`: IAM OIDC provider for the cluster issuer
//! - `capacity`: Fargate profiles or a managed node group

mod capacity;
mod cluster;
mod iam;
mod oidc;

#[cfg(test)]
mod aws_test;

use crate::context::RunContext;
use crate::error::ProvisionerError;
use crate::reconcile_helpers::ReconcileMode;
use crate::report::StageRecorder;
use aws_client::{AwsClientTrait, CallerIdentity, EksCluster};
use cluster_model::{ClusterSpec, OidcBinding};
use std::sync::Arc;
use tracing::info;

/// Trusted service principal of the EKS control plane role
pub const EKS_SERVICE: &str = "eks.amazonaws.com";

/// Trusted service principal of the Fargate pod execution role
pub const FARGATE_SERVICE: &str = "eks-fargate-pods.amazonaws.com";

/// Trusted service principal of the node group instance role
pub const EC2_SERVICE: &str = "ec2.amazonaws.com";

/// What the later stages need from AWS
#[derive(Debug, Clone)]
pub struct ClusterState {
    pub account_id: String,
    pub cluster: EksCluster,
    pub vpc_id: String,
    pub oidc: OidcBinding,
}

/// Reconciles AWS resources for one cluster.
pub struct AwsReconciler {
    pub(crate) client: Arc<dyn AwsClientTrait>,
    pub(crate) ctx: RunContext,
    pub(crate) mode: ReconcileMode,
}

impl AwsReconciler {
    pub fn new(client: Arc<dyn AwsClientTrait>, ctx: RunContext, mode: ReconcileMode) -> Self {
        Self { client, ctx, mode }
    }

    /// Bring AWS in line with `spec` (or check it in verify mode).
    ///
    /// Order: validate, preflight, network, cluster role, control plane,
    /// OIDC provider, capacity. Stops at the first failure.
    pub async fn reconcile(&self, spec: &ClusterSpec, recorder: &mut StageRecorder) -> Result<ClusterState, ProvisionerError> {
        spec.validate()?;
        if spec.region != self.client.region() {
            return Err(ProvisionerError::InvalidConfig(format!(
                "cluster region {} does not match AWS client region {}",
                spec.region,
                self.client.region()
            )));
        }

        info!("Reconciling AWS resources for cluster {} ({:?} mode)", spec.name, self.mode);
        let identity = self.preflight().await?;
        let vpc_id = self.verify_network(spec).await?;

        self.ctx.checkpoint()?;
        let role_arn = self
            .ensure_service_role(
                &cluster_role_name(&spec.name),
                EKS_SERVICE,
                &["AmazonEKSClusterPolicy"],
                &spec.tags,
                recorder,
            )
            .await?;

        self.ctx.checkpoint()?;
        let cluster = self.ensure_cluster(spec, &role_arn, recorder).await?;

        self.ctx.checkpoint()?;
        let oidc = self.ensure_oidc_provider(spec, &cluster, recorder).await?;

        self.ctx.checkpoint()?;
        self.ensure_capacity(spec, recorder).await?;

        info!("AWS resources for cluster {} are converged", spec.name);
        Ok(ClusterState {
            account_id: identity.account,
            cluster,
            vpc_id,
            oidc,
        })
    }

    /// Resolve the caller; fails fast on missing or denied credentials
    pub(crate) async fn preflight(&self) -> Result<CallerIdentity, ProvisionerError> {
        let identity = self
            .ctx
            .retry("sts get-caller-identity", || async {
                self.client.get_caller_identity().await.map_err(ProvisionerError::from)
            })
            .await?;
        info!("Using AWS account {} as {}", identity.account, identity.arn);
        Ok(identity)
    }

    /// ARN of an AWS managed policy in the partition of the client region
    pub(crate) fn managed_policy_arn(&self, policy_name: &str) -> String {
        format!("arn:{}:iam::aws:policy/{}", partition(self.client.region()), policy_name)
    }
}

/// IAM role assumed by the EKS control plane
pub fn cluster_role_name(cluster_name: &str) -> String {
    format!("{}-cluster-role", cluster_name)
}

/// IAM role assumed by Fargate to run pods
pub fn fargate_role_name(cluster_name: &str) -> String {
    format!("{}-fargate-pod-execution-role", cluster_name)
}

/// IAM role of node group instances
pub fn node_role_name(cluster_name: &str) -> String {
    format!("{}-node-role", cluster_name)
}

/// AWS partition a region belongs to
pub fn partition(region: &str) -> &'static str {
    if region.starts_with("us-gov-") {
        "aws-us-gov"
    } else if region.starts_with("cn-") {
        "aws-cn"
    } else {
        "aws"
    }
}
