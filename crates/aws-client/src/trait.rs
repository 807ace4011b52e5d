//! AwsClient trait for mocking
//!
//! The provisioner only talks to AWS through this trait, so reconcilers can
//! be tested against the in-memory mock.

use crate::error::AwsError;
use crate::models::*;
use serde_json::Value;
use std::collections::BTreeMap;

/// Trait for AWS control-plane operations
///
/// Describe/get calls return `Ok(None)` for missing resources. Create,
/// attach and update calls are the only mutating operations.
#[async_trait::async_trait]
pub trait AwsClientTrait: Send + Sync {
    /// Region every call targets
    fn region(&self) -> &str;

    // STS / EC2
    async fn get_caller_identity(&self) -> Result<CallerIdentity, AwsError>;
    async fn describe_subnets(&self, subnet_ids: &[String]) -> Result<Vec<Subnet>, AwsError>;

    // EKS control plane
    async fn describe_cluster(&self, name: &str) -> Result<Option<EksCluster>, AwsError>;
    async fn create_cluster(&self, request: &CreateClusterRequest) -> Result<EksCluster, AwsError>;

    // IAM roles and policies
    async fn get_role(&self, role_name: &str) -> Result<Option<IamRole>, AwsError>;
    async fn create_role(&self, role_name: &str, trust_policy: &Value, tags: &BTreeMap<String, String>) -> Result<IamRole, AwsError>;
    async fn list_attached_role_policies(&self, role_name: &str) -> Result<Vec<AttachedPolicy>, AwsError>;
    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), AwsError>;
    /// Customer-managed policy by name
    async fn find_policy(&self, policy_name: &str) -> Result<Option<IamPolicy>, AwsError>;
    async fn create_policy(&self, policy_name: &str, document: &Value) -> Result<IamPolicy, AwsError>;

    // IAM OIDC providers
    async fn list_oidc_providers(&self) -> Result<Vec<OidcProvider>, AwsError>;
    /// `url` includes the `https://` scheme
    async fn create_oidc_provider(&self, url: &str, client_ids: &[String]) -> Result<OidcProvider, AwsError>;

    // EKS capacity
    async fn describe_fargate_profile(&self, cluster_name: &str, profile_name: &str) -> Result<Option<FargateProfile>, AwsError>;
    async fn create_fargate_profile(&self, request: &CreateFargateProfileRequest) -> Result<FargateProfile, AwsError>;
    async fn describe_nodegroup(&self, cluster_name: &str, nodegroup_name: &str) -> Result<Option<Nodegroup>, AwsError>;
    async fn create_nodegroup(&self, request: &CreateNodegroupRequest) -> Result<Nodegroup, AwsError>;
    async fn update_nodegroup_scaling(&self, cluster_name: &str, nodegroup_name: &str, scaling: NodegroupScaling) -> Result<(), AwsError>;
}
