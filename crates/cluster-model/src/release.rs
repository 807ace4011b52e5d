//! ControllerRelease
//!
//! Desired AWS Load Balancer Controller release and the IAM binding it needs.

use crate::cluster::ClusterSpec;
use crate::iam::{IamPolicyBinding, PolicyDocumentSource, ServiceAccountRef};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// IAM policy published with the controller release the chart version below ships
pub const DEFAULT_POLICY_URL: &str =
    "https://raw.githubusercontent.com/kubernetes-sigs/aws-load-balancer-controller/v2.7.2/docs/install/iam_policy.json";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartRepository {
    pub name: String,
    pub url: String,
}

impl Default for ChartRepository {
    fn default() -> Self {
        Self {
            name: "eks".to_string(),
            url: "https://aws.github.io/eks-charts".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerRelease {
    /// Helm release name
    pub release_name: String,

    /// Namespace the release and its service account live in
    pub namespace: String,

    /// Chart reference (`<repo>/<chart>`)
    pub chart: String,

    pub repository: ChartRepository,

    /// Pinned chart version (latest when omitted)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_version: Option<String>,

    /// Service account the controller runs as
    pub service_account_name: String,

    /// Name of the controller Deployment the health check watches
    pub deployment_name: String,

    pub policy_name: String,

    pub policy_document: PolicyDocumentSource,

    /// IAM role name (defaults to `AmazonEKSLoadBalancerControllerRole-<cluster>`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,

    /// Extra chart values merged over the computed ones
    #[serde(skip_serializing_if = "Value::is_null")]
    pub extra_values: Value,
}

impl Default for ControllerRelease {
    fn default() -> Self {
        Self {
            release_name: "aws-load-balancer-controller".to_string(),
            namespace: "kube-system".to_string(),
            chart: "eks/aws-load-balancer-controller".to_string(),
            repository: ChartRepository::default(),
            chart_version: Some("1.7.2".to_string()),
            service_account_name: "aws-load-balancer-controller".to_string(),
            deployment_name: "aws-load-balancer-controller".to_string(),
            policy_name: "AWSLoadBalancerControllerIAMPolicy".to_string(),
            policy_document: PolicyDocumentSource::Url(DEFAULT_POLICY_URL.to_string()),
            role_name: None,
            extra_values: Value::Null,
        }
    }
}

impl ControllerRelease {
    pub fn service_account(&self) -> ServiceAccountRef {
        ServiceAccountRef::new(&self.namespace, &self.service_account_name)
    }

    pub fn role_name(&self, cluster_name: &str) -> String {
        self.role_name
            .clone()
            .unwrap_or_else(|| format!("AmazonEKSLoadBalancerControllerRole-{}", cluster_name))
    }

    /// IAM binding the release depends on
    pub fn policy_binding(&self, cluster_name: &str) -> IamPolicyBinding {
        IamPolicyBinding {
            policy_name: self.policy_name.clone(),
            policy_document: self.policy_document.clone(),
            role_name: self.role_name(cluster_name),
            service_account: self.service_account(),
        }
    }

    /// Chart values: the `--set` flags of the manual install plus extra values
    pub fn values(&self, cluster: &ClusterSpec, vpc_id: &str) -> Value {
        let mut values = json!({
            "clusterName": cluster.name,
            "region": cluster.region,
            "vpcId": vpc_id,
            "serviceAccount": {
                "create": false,
                "name": self.service_account_name,
            }
        });
        merge_values(&mut values, &self.extra_values);
        values
    }
}

/// Deep-merge `overlay` into `base`; objects merge key by key, everything else replaces
pub fn merge_values(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                merge_values(base_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (_, Value::Null) => {}
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Whether every value in `desired` is present with the same value in `observed`
pub fn values_subset(desired: &Value, observed: &Value) -> bool {
    match (desired, observed) {
        (Value::Object(d), Value::Object(o)) => d
            .iter()
            .all(|(key, value)| o.get(key).is_some_and(|ov| values_subset(value, ov))),
        (d, o) => d == o,
    }
}

/// Empty values object
pub fn empty_values() -> Value {
    Value::Object(Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{NodeMode, Subnets};

    fn cluster() -> ClusterSpec {
        ClusterSpec {
            name: "demo-cluster".to_string(),
            region: "us-east-1".to_string(),
            version: "1.29".to_string(),
            vpc_id: None,
            subnets: Subnets::default(),
            nodes: NodeMode::default(),
            ingress_requested: true,
            tags: Default::default(),
        }
    }

    #[test]
    fn test_values_match_manual_install() {
        let release = ControllerRelease::default();
        let values = release.values(&cluster(), "vpc-123");
        assert_eq!(values["clusterName"], "demo-cluster");
        assert_eq!(values["vpcId"], "vpc-123");
        assert_eq!(values["serviceAccount"]["create"], false);
        assert_eq!(values["serviceAccount"]["name"], "aws-load-balancer-controller");
    }

    #[test]
    fn test_extra_values_merge() {
        let release = ControllerRelease {
            extra_values: json!({"replicaCount": 1, "serviceAccount": {"annotations": {"a": "b"}}}),
            ..ControllerRelease::default()
        };
        let values = release.values(&cluster(), "vpc-123");
        assert_eq!(values["replicaCount"], 1);
        assert_eq!(values["serviceAccount"]["create"], false);
        assert_eq!(values["serviceAccount"]["annotations"]["a"], "b");
    }

    #[test]
    fn test_values_subset_ignores_extra_observed_keys() {
        let desired = json!({"clusterName": "a", "serviceAccount": {"create": false}});
        let observed = json!({"clusterName": "a", "serviceAccount": {"create": false, "name": "x"}, "more": 1});
        assert!(values_subset(&desired, &observed));
        assert!(!values_subset(&observed, &desired));
    }

    #[test]
    fn test_role_name_defaults_per_cluster() {
        let release = ControllerRelease::default();
        assert_eq!(
            release.policy_binding("demo-cluster").role_name,
            "AmazonEKSLoadBalancerControllerRole-demo-cluster"
        );
    }
}
