//! AWS response models
//!
//! Field names follow the JSON the `aws` CLI prints: PascalCase for IAM,
//! EC2 and STS, camelCase for EKS.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// `sts get-caller-identity`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Subnet {
    pub subnet_id: String,
    pub vpc_id: String,
    #[serde(default)]
    pub availability_zone: String,
}

/// Lifecycle status shared by EKS clusters, Fargate profiles and node groups
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EksStatus {
    Pending,
    Creating,
    Active,
    Updating,
    Deleting,
    Failed,
    CreateFailed,
    DeleteFailed,
    Degraded,
    #[serde(other)]
    Unknown,
}

impl EksStatus {
    /// Still converging on its own; worth waiting for
    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Pending | Self::Creating | Self::Updating)
    }

    /// Will not become `Active` without operator action
    pub fn is_terminal_failure(self) -> bool {
        matches!(
            self,
            Self::Deleting | Self::Failed | Self::CreateFailed | Self::DeleteFailed
        )
    }
}

impl std::fmt::Display for EksStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Creating => "CREATING",
            Self::Active => "ACTIVE",
            Self::Updating => "UPDATING",
            Self::Deleting => "DELETING",
            Self::Failed => "FAILED",
            Self::CreateFailed => "CREATE_FAILED",
            Self::DeleteFailed => "DELETE_FAILED",
            Self::Degraded => "DEGRADED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VpcConfig {
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    #[serde(default)]
    pub vpc_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterIdentity {
    #[serde(default)]
    pub oidc: Option<OidcIssuer>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OidcIssuer {
    #[serde(default)]
    pub issuer: Option<String>,
}

/// `eks describe-cluster` → `cluster`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EksCluster {
    pub name: String,
    #[serde(default)]
    pub arn: String,
    pub status: EksStatus,
    pub version: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub role_arn: String,
    #[serde(default)]
    pub resources_vpc_config: VpcConfig,
    #[serde(default)]
    pub identity: ClusterIdentity,
}

impl EksCluster {
    pub fn oidc_issuer(&self) -> Option<&str> {
        self.identity.oidc.as_ref().and_then(|o| o.issuer.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateClusterRequest {
    pub name: String,
    pub version: String,
    pub role_arn: String,
    pub subnet_ids: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct IamRole {
    pub role_name: String,
    pub arn: String,
    /// Trust policy (the CLI prints it decoded)
    #[serde(default)]
    pub assume_role_policy_document: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct IamPolicy {
    pub policy_name: String,
    pub arn: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct AttachedPolicy {
    pub policy_name: String,
    pub policy_arn: String,
}

/// IAM OIDC identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcProvider {
    pub arn: String,
    /// Provider URL without scheme (`oidc.eks.<region>.amazonaws.com/id/<id>`)
    pub url: String,
}

impl OidcProvider {
    /// Provider ARNs embed the URL: `arn:aws:iam::<account>:oidc-provider/<url>`
    pub fn from_arn(arn: &str) -> Option<Self> {
        arn.split_once(":oidc-provider/").map(|(_, url)| Self {
            arn: arn.to_string(),
            url: url.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct FargateProfileSelector {
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// `eks describe-fargate-profile` → `fargateProfile`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FargateProfile {
    pub fargate_profile_name: String,
    pub status: EksStatus,
    #[serde(default)]
    pub pod_execution_role_arn: String,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub selectors: Vec<FargateProfileSelector>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateFargateProfileRequest {
    pub cluster_name: String,
    pub profile_name: String,
    pub pod_execution_role_arn: String,
    pub subnets: Vec<String>,
    pub selectors: Vec<FargateProfileSelector>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodegroupScaling {
    pub min_size: u32,
    pub max_size: u32,
    pub desired_size: u32,
}

/// `eks describe-nodegroup` → `nodegroup`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Nodegroup {
    pub nodegroup_name: String,
    pub status: EksStatus,
    #[serde(default)]
    pub instance_types: Vec<String>,
    #[serde(default)]
    pub scaling_config: NodegroupScaling,
    #[serde(default)]
    pub node_role: String,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub disk_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateNodegroupRequest {
    pub cluster_name: String,
    pub nodegroup_name: String,
    pub node_role_arn: String,
    pub subnets: Vec<String>,
    pub instance_types: Vec<String>,
    pub scaling: NodegroupScaling,
    pub disk_size: u32,
    pub tags: BTreeMap<String, String>,
}
