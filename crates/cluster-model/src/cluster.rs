//! ClusterSpec
//!
//! Desired EKS control plane, network placement and node capacity.

use crate::error::ModelError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Kubernetes version used when the spec file does not pin one
pub const DEFAULT_KUBERNETES_VERSION: &str = "1.29";

/// Fargate profile `eksctl create cluster --fargate` creates
pub const DEFAULT_FARGATE_PROFILE: &str = "fp-default";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Cluster name (may be supplied on the command line instead)
    #[serde(default)]
    pub name: String,

    /// AWS region (may be supplied on the command line instead)
    #[serde(default)]
    pub region: String,

    /// Kubernetes version, `major.minor`
    #[serde(default = "default_version")]
    pub version: String,

    /// VPC the subnets must belong to (optional, derived from subnets when omitted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,

    /// Subnet placement
    pub subnets: Subnets,

    /// Node capacity backing pod scheduling
    #[serde(default)]
    pub nodes: NodeMode,

    /// Set when the desired state asks for an Ingress (requires public subnets)
    #[serde(default)]
    pub ingress_requested: bool,

    /// Tags applied to AWS resources created for this cluster
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

fn default_version() -> String {
    DEFAULT_KUBERNETES_VERSION.to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Subnets {
    /// Private subnet IDs (control plane ENIs, Fargate pods, node groups)
    #[serde(default)]
    pub private: Vec<String>,

    /// Public subnet IDs (internet-facing load balancers)
    #[serde(default)]
    pub public: Vec<String>,
}

/// Node capacity mode
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum NodeMode {
    /// Managed EC2 node group
    Ec2(NodeGroupSpec),

    /// Fargate profiles
    Fargate(FargateSpec),
}

impl Default for NodeMode {
    fn default() -> Self {
        Self::Fargate(FargateSpec::default())
    }
}

impl NodeMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ec2(_) => "ec2",
            Self::Fargate(_) => "fargate",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FargateSpec {
    /// Fargate profiles to maintain
    #[serde(default = "default_fargate_profiles")]
    pub profiles: Vec<FargateProfileSpec>,
}

impl Default for FargateSpec {
    fn default() -> Self {
        Self {
            profiles: default_fargate_profiles(),
        }
    }
}

fn default_fargate_profiles() -> Vec<FargateProfileSpec> {
    vec![FargateProfileSpec {
        name: DEFAULT_FARGATE_PROFILE.to_string(),
        selectors: vec![
            FargateSelector::namespace("default"),
            FargateSelector::namespace("kube-system"),
        ],
    }]
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FargateProfileSpec {
    /// Profile name
    pub name: String,

    /// Pod selectors; a pod matching any selector runs on Fargate
    pub selectors: Vec<FargateSelector>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct FargateSelector {
    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl FargateSelector {
    pub fn namespace(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            labels: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupSpec {
    /// Node group name (defaults to `<cluster>-ng`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default = "default_instance_types")]
    pub instance_types: Vec<String>,

    #[serde(default)]
    pub scaling: ScalingConfig,

    /// Root volume size in GiB
    #[serde(default = "default_disk_size")]
    pub disk_size: u32,
}

impl NodeGroupSpec {
    /// Node group name for a cluster
    pub fn resolved_name(&self, cluster_name: &str) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}-ng", cluster_name))
    }
}

impl Default for NodeGroupSpec {
    fn default() -> Self {
        Self {
            name: None,
            instance_types: default_instance_types(),
            scaling: ScalingConfig::default(),
            disk_size: default_disk_size(),
        }
    }
}

fn default_instance_types() -> Vec<String> {
    vec!["t3.medium".to_string()]
}

fn default_disk_size() -> u32 {
    20
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScalingConfig {
    pub min_size: u32,
    pub desired_size: u32,
    pub max_size: u32,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            desired_size: 2,
            max_size: 3,
        }
    }
}

impl ClusterSpec {
    /// Key used to serialize operations against one cluster
    pub fn key(&self) -> String {
        format!("{}/{}", self.region, self.name)
    }

    /// Private subnets followed by public subnets, without duplicates
    pub fn all_subnets(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.subnets
            .private
            .iter()
            .chain(self.subnets.public.iter())
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect()
    }

    /// Validate the spec before any AWS call is made.
    ///
    /// Every violation is collected so the operator sees all of them at once.
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut problems = Vec::new();

        if !is_valid_cluster_name(&self.name) {
            problems.push(format!(
                "cluster name '{}' must start with a letter and contain only letters, digits and '-' (max 100)",
                self.name
            ));
        }
        if !is_valid_region(&self.region) {
            problems.push(format!("region '{}' is not a valid AWS region name", self.region));
        }
        if !is_valid_version(&self.version) {
            problems.push(format!("version '{}' must look like '1.29'", self.version));
        }
        if let Some(vpc_id) = &self.vpc_id {
            if !vpc_id.starts_with("vpc-") {
                problems.push(format!("vpcId '{}' must start with 'vpc-'", vpc_id));
            }
        }

        if self.subnets.private.is_empty() {
            problems.push("at least one private subnet is required".to_string());
        }
        if self.ingress_requested && self.subnets.public.is_empty() {
            problems.push("at least one public subnet is required when an ingress is requested".to_string());
        }

        let mut seen = BTreeSet::new();
        for subnet in self.subnets.private.iter().chain(self.subnets.public.iter()) {
            if !subnet.starts_with("subnet-") {
                problems.push(format!("subnet '{}' must start with 'subnet-'", subnet));
            }
            if !seen.insert(subnet.as_str()) {
                problems.push(format!("subnet '{}' is listed more than once", subnet));
            }
        }

        match &self.nodes {
            NodeMode::Ec2(group) => {
                let s = group.scaling;
                if s.max_size == 0 {
                    problems.push("node group maxSize must be at least 1".to_string());
                }
                if s.min_size > s.desired_size || s.desired_size > s.max_size {
                    problems.push(format!(
                        "node group scaling must satisfy minSize <= desiredSize <= maxSize (got {}/{}/{})",
                        s.min_size, s.desired_size, s.max_size
                    ));
                }
                if group.instance_types.is_empty() {
                    problems.push("node group needs at least one instance type".to_string());
                }
            }
            NodeMode::Fargate(fargate) => {
                if fargate.profiles.is_empty() {
                    problems.push("fargate mode needs at least one profile".to_string());
                }
                let mut names = BTreeSet::new();
                for profile in &fargate.profiles {
                    if profile.selectors.is_empty() {
                        problems.push(format!("fargate profile '{}' needs at least one selector", profile.name));
                    }
                    if !names.insert(profile.name.as_str()) {
                        problems.push(format!("fargate profile '{}' is declared twice", profile.name));
                    }
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ModelError::Validation(problems))
        }
    }
}

fn is_valid_cluster_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    name.len() <= 100 && chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// `us-east-1`, `eu-central-2`, `us-gov-west-1`
fn is_valid_region(region: &str) -> bool {
    let parts: Vec<&str> = region.split('-').collect();
    let (prefix, rest) = match parts.as_slice() {
        [prefix, "gov", rest @ ..] => (*prefix, rest),
        [prefix, rest @ ..] => (*prefix, rest),
        [] => return false,
    };
    if prefix.len() != 2 || !prefix.chars().all(|c| c.is_ascii_lowercase()) {
        return false;
    }
    match rest {
        [area, number] => {
            !area.is_empty()
                && area.chars().all(|c| c.is_ascii_lowercase())
                && number.len() == 1
                && number.chars().all(|c| c.is_ascii_digit())
        }
        _ => false,
    }
}

fn is_valid_version(version: &str) -> bool {
    match version.split_once('.') {
        Some((major, minor)) => {
            !major.is_empty()
                && !minor.is_empty()
                && major.chars().all(|c| c.is_ascii_digit())
                && minor.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}
