//! EKS operations for MockAwsClient
//!
//! Handles clusters, Fargate profiles and node groups

use super::{MockAwsClient, lock};
use crate::error::AwsError;
use crate::models::*;

fn activate(client: &MockAwsClient, key: &str, status: &mut EksStatus) {
    if status.is_in_progress() && client.poll_pending(key) {
        *status = EksStatus::Active;
    }
}

pub async fn describe_cluster(client: &MockAwsClient, name: &str) -> Result<Option<EksCluster>, AwsError> {
    client.enter("DescribeCluster")?;
    let mut clusters = lock(&client.clusters);
    Ok(clusters.get_mut(name).map(|cluster| {
        activate(client, &format!("cluster/{}", name), &mut cluster.status);
        cluster.clone()
    }))
}

pub async fn create_cluster(client: &MockAwsClient, request: &CreateClusterRequest) -> Result<EksCluster, AwsError> {
    client.enter("CreateCluster")?;
    if lock(&client.clusters).contains_key(&request.name) {
        return Err(AwsError::AlreadyExists(format!("Cluster already exists with name: {}", request.name)));
    }

    let vpc_id = {
        let subnets = lock(&client.subnets);
        let mut vpc_id = None;
        for subnet_id in &request.subnet_ids {
            let subnet = subnets.get(subnet_id).ok_or_else(|| {
                AwsError::from_code(
                    "InvalidParameterException",
                    "CreateCluster",
                    &format!("Subnet {} does not exist", subnet_id),
                )
            })?;
            vpc_id.get_or_insert_with(|| subnet.vpc_id.clone());
        }
        vpc_id
    };

    let issuer_id: String = request
        .name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_uppercase();
    let cluster = EksCluster {
        name: request.name.clone(),
        arn: client.arn("eks", &format!("cluster/{}", request.name)),
        status: EksStatus::Creating,
        version: request.version.clone(),
        endpoint: Some(format!("https://{}.gr7.{}.eks.amazonaws.com", issuer_id, client.region)),
        role_arn: request.role_arn.clone(),
        resources_vpc_config: VpcConfig {
            subnet_ids: request.subnet_ids.clone(),
            vpc_id,
        },
        identity: ClusterIdentity {
            oidc: Some(OidcIssuer {
                issuer: Some(format!(
                    "https://oidc.eks.{}.amazonaws.com/id/{}",
                    client.region, issuer_id
                )),
            }),
        },
    };

    lock(&client.clusters).insert(request.name.clone(), cluster.clone());
    client.mark_pending(format!("cluster/{}", request.name));
    client.record_mutation("CreateCluster", &request.name);
    Ok(cluster)
}

pub async fn describe_fargate_profile(
    client: &MockAwsClient,
    cluster_name: &str,
    profile_name: &str,
) -> Result<Option<FargateProfile>, AwsError> {
    client.enter("DescribeFargateProfile")?;
    let mut profiles = lock(&client.fargate_profiles);
    let key = (cluster_name.to_string(), profile_name.to_string());
    Ok(profiles.get_mut(&key).map(|profile| {
        activate(
            client,
            &format!("fargate/{}/{}", cluster_name, profile_name),
            &mut profile.status,
        );
        profile.clone()
    }))
}

pub async fn create_fargate_profile(
    client: &MockAwsClient,
    request: &CreateFargateProfileRequest,
) -> Result<FargateProfile, AwsError> {
    client.enter("CreateFargateProfile")?;
    if !lock(&client.clusters).contains_key(&request.cluster_name) {
        return Err(AwsError::NotFound(format!("No cluster found for name: {}", request.cluster_name)));
    }
    let key = (request.cluster_name.clone(), request.profile_name.clone());
    if lock(&client.fargate_profiles).contains_key(&key) {
        return Err(AwsError::AlreadyExists(format!(
            "Fargate Profile already exists with name: {}",
            request.profile_name
        )));
    }

    let profile = FargateProfile {
        fargate_profile_name: request.profile_name.clone(),
        status: EksStatus::Creating,
        pod_execution_role_arn: request.pod_execution_role_arn.clone(),
        subnets: request.subnets.clone(),
        selectors: request.selectors.clone(),
    };
    lock(&client.fargate_profiles).insert(key, profile.clone());
    client.mark_pending(format!("fargate/{}/{}", request.cluster_name, request.profile_name));
    client.record_mutation("CreateFargateProfile", &request.profile_name);
    Ok(profile)
}

pub async fn describe_nodegroup(
    client: &MockAwsClient,
    cluster_name: &str,
    nodegroup_name: &str,
) -> Result<Option<Nodegroup>, AwsError> {
    client.enter("DescribeNodegroup")?;
    let mut nodegroups = lock(&client.nodegroups);
    let key = (cluster_name.to_string(), nodegroup_name.to_string());
    Ok(nodegroups.get_mut(&key).map(|nodegroup| {
        activate(
            client,
            &format!("nodegroup/{}/{}", cluster_name, nodegroup_name),
            &mut nodegroup.status,
        );
        nodegroup.clone()
    }))
}

pub async fn create_nodegroup(client: &MockAwsClient, request: &CreateNodegroupRequest) -> Result<Nodegroup, AwsError> {
    client.enter("CreateNodegroup")?;
    if !lock(&client.clusters).contains_key(&request.cluster_name) {
        return Err(AwsError::NotFound(format!("No cluster found for name: {}", request.cluster_name)));
    }
    let key = (request.cluster_name.clone(), request.nodegroup_name.clone());
    if lock(&client.nodegroups).contains_key(&key) {
        return Err(AwsError::AlreadyExists(format!(
            "NodeGroup already exists with name {}",
            request.nodegroup_name
        )));
    }

    let nodegroup = Nodegroup {
        nodegroup_name: request.nodegroup_name.clone(),
        status: EksStatus::Creating,
        instance_types: request.instance_types.clone(),
        scaling_config: request.scaling,
        node_role: request.node_role_arn.clone(),
        subnets: request.subnets.clone(),
        disk_size: Some(request.disk_size),
    };
    lock(&client.nodegroups).insert(key, nodegroup.clone());
    client.mark_pending(format!("nodegroup/{}/{}", request.cluster_name, request.nodegroup_name));
    client.record_mutation("CreateNodegroup", &request.nodegroup_name);
    Ok(nodegroup)
}

pub async fn update_nodegroup_scaling(
    client: &MockAwsClient,
    cluster_name: &str,
    nodegroup_name: &str,
    scaling: NodegroupScaling,
) -> Result<(), AwsError> {
    client.enter("UpdateNodegroupConfig")?;
    let key = (cluster_name.to_string(), nodegroup_name.to_string());
    {
        let mut nodegroups = lock(&client.nodegroups);
        let nodegroup = nodegroups
            .get_mut(&key)
            .ok_or_else(|| AwsError::NotFound(format!("No node group found for name: {}", nodegroup_name)))?;
        nodegroup.scaling_config = scaling;
        nodegroup.status = EksStatus::Updating;
    }
    client.mark_pending(format!("nodegroup/{}/{}", cluster_name, nodegroup_name));
    client.record_mutation("UpdateNodegroupConfig", nodegroup_name);
    Ok(())
}
