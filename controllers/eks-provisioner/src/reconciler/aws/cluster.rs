//! Network placement and the EKS control plane

use super::AwsReconciler;
use crate::error::ProvisionerError;
use crate::reconcile_helpers::{Drift, lookup_or_create};
use crate::report::{ResourceStatus, StageRecorder};
use aws_client::{CreateClusterRequest, EksCluster, EksStatus};
use cluster_model::ClusterSpec;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

impl AwsReconciler {
    /// Check that every subnet exists in the target region and that they share one VPC.
    ///
    /// Returns the VPC id.
    pub(crate) async fn verify_network(&self, spec: &ClusterSpec) -> Result<String, ProvisionerError> {
        let wanted = spec.all_subnets();
        let subnets = match self
            .ctx
            .retry("ec2 describe-subnets", || async {
                self.client.describe_subnets(&wanted).await.map_err(ProvisionerError::from)
            })
            .await
        {
            Ok(subnets) => subnets,
            Err(ProvisionerError::Aws(e)) if e.is_not_found() => {
                return Err(ProvisionerError::RegionMismatch(format!(
                    "subnets of cluster {} are not all present in {}: {}",
                    spec.name, spec.region, e
                )));
            }
            Err(e) => return Err(e),
        };

        let found: BTreeSet<&str> = subnets.iter().map(|s| s.subnet_id.as_str()).collect();
        let missing: Vec<&str> = wanted
            .iter()
            .map(String::as_str)
            .filter(|id| !found.contains(id))
            .collect();
        if !missing.is_empty() {
            return Err(ProvisionerError::RegionMismatch(format!(
                "subnets {} do not exist in {}",
                missing.join(", "),
                spec.region
            )));
        }

        let vpcs: BTreeSet<&str> = subnets.iter().map(|s| s.vpc_id.as_str()).collect();
        if vpcs.len() != 1 {
            return Err(ProvisionerError::VpcMismatch(format!(
                "subnets of cluster {} span several VPCs: {}",
                spec.name,
                vpcs.iter().copied().collect::<Vec<_>>().join(", ")
            )));
        }
        let vpc_id = vpcs.iter().next().map(|v| (*v).to_string()).unwrap_or_default();
        if let Some(declared) = &spec.vpc_id {
            if declared != &vpc_id {
                return Err(ProvisionerError::VpcMismatch(format!(
                    "subnets of cluster {} belong to {}, not the declared {}",
                    spec.name, vpc_id, declared
                )));
            }
        }

        debug!("Subnets of cluster {} are in {} ({})", spec.name, vpc_id, spec.region);
        Ok(vpc_id)
    }

    /// Create the control plane when absent, otherwise check it matches `spec`.
    ///
    /// Waits until the cluster is `ACTIVE`.
    pub(crate) async fn ensure_cluster(
        &self,
        spec: &ClusterSpec,
        role_arn: &str,
        recorder: &mut StageRecorder,
    ) -> Result<EksCluster, ProvisionerError> {
        let request = CreateClusterRequest {
            name: spec.name.clone(),
            version: spec.version.clone(),
            role_arn: role_arn.to_string(),
            subnet_ids: spec.all_subnets(),
            tags: spec.tags.clone(),
        };

        let (cluster, status) = lookup_or_create(
            &self.ctx,
            self.mode,
            "EKSCluster",
            &spec.name,
            || async { self.client.describe_cluster(&spec.name).await.map_err(ProvisionerError::from) },
            || async { self.client.create_cluster(&request).await.map_err(ProvisionerError::from) },
        )
        .await?;

        if status == ResourceStatus::Unchanged {
            check_cluster_matches(spec, &cluster)?;
        }

        let cluster = if cluster.status == EksStatus::Active {
            cluster
        } else {
            self.wait_for_cluster(spec).await?
        };
        recorder.record("EKSCluster", &spec.name, status);
        Ok(cluster)
    }

    async fn wait_for_cluster(&self, spec: &ClusterSpec) -> Result<EksCluster, ProvisionerError> {
        info!("Waiting for EKS cluster {} to become ACTIVE", spec.name);
        let config = &self.ctx.config;
        let what = format!("EKS cluster {} ACTIVE", spec.name);
        let cluster = self
            .ctx
            .poll_until(&what, config.cluster_timeout, config.aws_poll_interval, || async {
                match self.client.describe_cluster(&spec.name).await? {
                    Some(cluster) if cluster.status == EksStatus::Active => Ok(Some(cluster)),
                    Some(cluster) if cluster.status.is_terminal_failure() => Err(ProvisionerError::Conflict(format!(
                        "EKS cluster {} is {}",
                        spec.name, cluster.status
                    ))),
                    Some(cluster) => {
                        debug!("EKS cluster {} is {}", spec.name, cluster.status);
                        Ok(None)
                    }
                    None => Err(ProvisionerError::Conflict(format!(
                        "EKS cluster {} disappeared while waiting for it",
                        spec.name
                    ))),
                }
            })
            .await?;
        info!("EKS cluster {} is ACTIVE", spec.name);
        Ok(cluster)
    }
}

/// An existing cluster must run the desired version in the desired subnets
fn check_cluster_matches(spec: &ClusterSpec, cluster: &EksCluster) -> Result<(), ProvisionerError> {
    if cluster.status.is_terminal_failure() {
        return Err(ProvisionerError::Conflict(format!(
            "EKS cluster {} exists in state {}",
            spec.name, cluster.status
        )));
    }

    let mut drift = Drift::default();
    drift.compare("version", spec.version.as_str(), cluster.version.as_str());
    let subnets = spec.all_subnets();
    let desired: BTreeSet<&str> = subnets.iter().map(String::as_str).collect();
    let observed: BTreeSet<&str> = cluster
        .resources_vpc_config
        .subnet_ids
        .iter()
        .map(String::as_str)
        .collect();
    drift.compare("subnets", &desired, &observed);
    if !drift.is_empty() {
        warn!("EKS cluster {} does not match the desired state", spec.name);
    }
    drift.into_conflict("EKSCluster", &spec.name)
}
