//! Node capacity: Fargate profiles or one managed node group

use super::{AwsReconciler, EC2_SERVICE, FARGATE_SERVICE, fargate_role_name, node_role_name};
use crate::error::ProvisionerError;
use crate::reconcile_helpers::{Drift, lookup_or_create};
use crate::report::{ResourceStatus, StageRecorder};
use aws_client::{
    CreateFargateProfileRequest, CreateNodegroupRequest, EksStatus, FargateProfile, FargateProfileSelector,
    Nodegroup, NodegroupScaling,
};
use cluster_model::{ClusterSpec, FargateProfileSpec, FargateSpec, NodeGroupSpec, NodeMode};
use tracing::{debug, info, warn};

const FARGATE_POLICIES: &[&str] = &["AmazonEKSFargatePodExecutionRolePolicy"];

const NODE_POLICIES: &[&str] = &[
    "AmazonEKSWorkerNodePolicy",
    "AmazonEKS_CNI_Policy",
    "AmazonEC2ContainerRegistryReadOnly",
];

impl AwsReconciler {
    /// Ensure the capacity declared by `spec.nodes` exists and is `ACTIVE`
    pub(crate) async fn ensure_capacity(
        &self,
        spec: &ClusterSpec,
        recorder: &mut StageRecorder,
    ) -> Result<(), ProvisionerError> {
        match &spec.nodes {
            NodeMode::Fargate(fargate) => self.ensure_fargate(spec, fargate, recorder).await,
            NodeMode::Ec2(nodegroup) => self.ensure_nodegroup(spec, nodegroup, recorder).await,
        }
    }

    async fn ensure_fargate(
        &self,
        spec: &ClusterSpec,
        fargate: &FargateSpec,
        recorder: &mut StageRecorder,
    ) -> Result<(), ProvisionerError> {
        let role_arn = self
            .ensure_service_role(
                &fargate_role_name(&spec.name),
                FARGATE_SERVICE,
                FARGATE_POLICIES,
                &spec.tags,
                recorder,
            )
            .await?;

        for profile in &fargate.profiles {
            self.ctx.checkpoint()?;
            self.ensure_fargate_profile(spec, profile, &role_arn, recorder).await?;
        }
        Ok(())
    }

    async fn ensure_fargate_profile(
        &self,
        spec: &ClusterSpec,
        profile: &FargateProfileSpec,
        role_arn: &str,
        recorder: &mut StageRecorder,
    ) -> Result<(), ProvisionerError> {
        let request = CreateFargateProfileRequest {
            cluster_name: spec.name.clone(),
            profile_name: profile.name.clone(),
            pod_execution_role_arn: role_arn.to_string(),
            subnets: spec.subnets.private.clone(),
            selectors: desired_selectors(profile),
            tags: spec.tags.clone(),
        };

        let (existing, status) = lookup_or_create(
            &self.ctx,
            self.mode,
            "FargateProfile",
            &profile.name,
            || async {
                self.client
                    .describe_fargate_profile(&spec.name, &profile.name)
                    .await
                    .map_err(ProvisionerError::from)
            },
            || async { self.client.create_fargate_profile(&request).await.map_err(ProvisionerError::from) },
        )
        .await?;

        if status == ResourceStatus::Unchanged {
            check_profile_matches(&request, &existing)?;
        }
        if existing.status != EksStatus::Active {
            self.wait_for_fargate_profile(&spec.name, &profile.name).await?;
        }
        recorder.record("FargateProfile", &profile.name, status);
        Ok(())
    }

    async fn wait_for_fargate_profile(&self, cluster_name: &str, profile_name: &str) -> Result<FargateProfile, ProvisionerError> {
        info!("Waiting for Fargate profile {} to become ACTIVE", profile_name);
        let config = &self.ctx.config;
        let what = format!("Fargate profile {} ACTIVE", profile_name);
        self.ctx
            .poll_until(&what, config.capacity_timeout, config.aws_poll_interval, || async {
                match self.client.describe_fargate_profile(cluster_name, profile_name).await? {
                    Some(profile) if profile.status == EksStatus::Active => Ok(Some(profile)),
                    Some(profile) if profile.status.is_terminal_failure() => Err(ProvisionerError::Conflict(
                        format!("Fargate profile {} is {}", profile_name, profile.status),
                    )),
                    Some(profile) => {
                        debug!("Fargate profile {} is {}", profile_name, profile.status);
                        Ok(None)
                    }
                    None => Err(ProvisionerError::Conflict(format!(
                        "Fargate profile {} disappeared while waiting for it",
                        profile_name
                    ))),
                }
            })
            .await
    }

    async fn ensure_nodegroup(
        &self,
        spec: &ClusterSpec,
        nodegroup: &NodeGroupSpec,
        recorder: &mut StageRecorder,
    ) -> Result<(), ProvisionerError> {
        let role_arn = self
            .ensure_service_role(&node_role_name(&spec.name), EC2_SERVICE, NODE_POLICIES, &spec.tags, recorder)
            .await?;

        let name = nodegroup.resolved_name(&spec.name);
        let scaling = NodegroupScaling {
            min_size: nodegroup.scaling.min_size,
            max_size: nodegroup.scaling.max_size,
            desired_size: nodegroup.scaling.desired_size,
        };
        let request = CreateNodegroupRequest {
            cluster_name: spec.name.clone(),
            nodegroup_name: name.clone(),
            node_role_arn: role_arn,
            subnets: spec.subnets.private.clone(),
            instance_types: nodegroup.instance_types.clone(),
            scaling,
            disk_size: nodegroup.disk_size,
            tags: spec.tags.clone(),
        };

        let (existing, mut status) = lookup_or_create(
            &self.ctx,
            self.mode,
            "Nodegroup",
            &name,
            || async {
                self.client
                    .describe_nodegroup(&spec.name, &name)
                    .await
                    .map_err(ProvisionerError::from)
            },
            || async { self.client.create_nodegroup(&request).await.map_err(ProvisionerError::from) },
        )
        .await?;

        let mut needs_wait = existing.status != EksStatus::Active;
        if status == ResourceStatus::Unchanged {
            check_nodegroup_matches(&request, &existing)?;
            if existing.scaling_config != scaling {
                // Scaling is the one mutable capacity setting
                self.mode.forbid(format!(
                    "scale node group {} from {:?} to {:?}",
                    name, existing.scaling_config, scaling
                ))?;
                if existing.status.is_in_progress() {
                    self.wait_for_nodegroup(&spec.name, &name).await?;
                }
                self.ctx
                    .retry(&format!("eks update-nodegroup-config {}", name), || async {
                        self.client
                            .update_nodegroup_scaling(&spec.name, &name, scaling)
                            .await
                            .map_err(ProvisionerError::from)
                    })
                    .await?;
                info!("Updated scaling of node group {}", name);
                status = ResourceStatus::Updated;
                needs_wait = true;
            }
        }

        if needs_wait {
            self.wait_for_nodegroup(&spec.name, &name).await?;
        }
        recorder.record("Nodegroup", &name, status);
        Ok(())
    }

    async fn wait_for_nodegroup(&self, cluster_name: &str, nodegroup_name: &str) -> Result<Nodegroup, ProvisionerError> {
        info!("Waiting for node group {} to become ACTIVE", nodegroup_name);
        let config = &self.ctx.config;
        let what = format!("node group {} ACTIVE", nodegroup_name);
        self.ctx
            .poll_until(&what, config.capacity_timeout, config.aws_poll_interval, || async {
                match self.client.describe_nodegroup(cluster_name, nodegroup_name).await? {
                    Some(nodegroup) if nodegroup.status == EksStatus::Active => Ok(Some(nodegroup)),
                    Some(nodegroup) if nodegroup.status.is_terminal_failure() => Err(ProvisionerError::Conflict(
                        format!("node group {} is {}", nodegroup_name, nodegroup.status),
                    )),
                    Some(nodegroup) => {
                        debug!("Node group {} is {}", nodegroup_name, nodegroup.status);
                        Ok(None)
                    }
                    None => Err(ProvisionerError::Conflict(format!(
                        "node group {} disappeared while waiting for it",
                        nodegroup_name
                    ))),
                }
            })
            .await
    }
}

fn desired_selectors(profile: &FargateProfileSpec) -> Vec<FargateProfileSelector> {
    let mut selectors: Vec<FargateProfileSelector> = profile
        .selectors
        .iter()
        .map(|s| FargateProfileSelector {
            namespace: s.namespace.clone(),
            labels: s.labels.clone(),
        })
        .collect();
    selectors.sort();
    selectors
}

/// Fargate profiles are immutable; any difference is a conflict
fn check_profile_matches(request: &CreateFargateProfileRequest, existing: &FargateProfile) -> Result<(), ProvisionerError> {
    if existing.status.is_terminal_failure() {
        return Err(ProvisionerError::Conflict(format!(
            "Fargate profile {} exists in state {}",
            request.profile_name, existing.status
        )));
    }

    let mut observed = existing.selectors.clone();
    observed.sort();
    let mut drift = Drift::default();
    drift.compare("selectors", &request.selectors, &observed);
    if !drift.is_empty() {
        warn!("Fargate profile {} does not match the desired state", request.profile_name);
    }
    drift.into_conflict("FargateProfile", &request.profile_name)
}

/// Instance types and the disk size of a node group cannot change in place
fn check_nodegroup_matches(request: &CreateNodegroupRequest, existing: &Nodegroup) -> Result<(), ProvisionerError> {
    if existing.status.is_terminal_failure() {
        return Err(ProvisionerError::Conflict(format!(
            "node group {} exists in state {}",
            request.nodegroup_name, existing.status
        )));
    }

    let mut drift = Drift::default();
    let mut desired_types = request.instance_types.clone();
    desired_types.sort();
    let mut observed_types = existing.instance_types.clone();
    observed_types.sort();
    drift.compare("instanceTypes", &desired_types, &observed_types);
    if let Some(disk_size) = existing.disk_size {
        drift.compare("diskSize", &request.disk_size, &disk_size);
    }
    drift.into_conflict("Nodegroup", &request.nodegroup_name)
}
