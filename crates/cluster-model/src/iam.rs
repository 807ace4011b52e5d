//! IAM bindings
//!
//! `OidcBinding` ties a cluster to its IAM OIDC provider; `IamPolicyBinding`
//! ties a named policy to an IAM role assumed by a Kubernetes service account
//! (IRSA). Bindings are created before the controller install and never
//! mutated afterwards.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::PathBuf;

/// Audience EKS service account tokens are issued for
pub const STS_AUDIENCE: &str = "sts.amazonaws.com";

/// Annotation binding a service account to an IAM role
pub const ROLE_ARN_ANNOTATION: &str = "eks.amazonaws.com/role-arn";

/// Cluster to IAM OIDC provider association
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OidcBinding {
    pub cluster_name: String,

    /// Issuer URL as reported by EKS (`https://oidc.eks.<region>.amazonaws.com/id/<id>`)
    pub issuer_url: String,

    pub provider_arn: String,
}

impl OidcBinding {
    /// Issuer without scheme, the form IAM uses in provider URLs and condition keys
    pub fn issuer_host_path(&self) -> &str {
        strip_scheme(&self.issuer_url)
    }
}

/// Issuer URL without `https://`
pub fn strip_scheme(url: &str) -> &str {
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
        .trim_end_matches('/')
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountRef {
    pub namespace: String,
    pub name: String,
}

impl ServiceAccountRef {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Subject claim of the projected service account token
    pub fn subject(&self) -> String {
        format!("system:serviceaccount:{}:{}", self.namespace, self.name)
    }
}

/// Where an IAM policy document comes from
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum PolicyDocumentSource {
    /// Downloaded over HTTPS
    Url(String),

    /// Local file, relative to the spec file
    Path(PathBuf),

    /// Embedded JSON document
    Inline(Value),
}

/// Named policy → IAM role → Kubernetes service account
#[derive(Debug, Clone, PartialEq)]
pub struct IamPolicyBinding {
    pub policy_name: String,
    pub policy_document: PolicyDocumentSource,
    pub role_name: String,
    pub service_account: ServiceAccountRef,
}

impl IamPolicyBinding {
    /// Trust policy letting the service account assume the role through the cluster OIDC provider
    pub fn trust_policy(&self, oidc: &OidcBinding) -> Value {
        let issuer = oidc.issuer_host_path();
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Federated": oidc.provider_arn },
                "Action": "sts:AssumeRoleWithWebIdentity",
                "Condition": {
                    "StringEquals": {
                        format!("{}:aud", issuer): STS_AUDIENCE,
                        format!("{}:sub", issuer): self.service_account.subject(),
                    }
                }
            }]
        })
    }
}

/// Trust policy for a role assumed by an AWS service (e.g. `eks.amazonaws.com`)
pub fn service_trust_policy(service: &str) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole"
        }]
    })
}

/// Whether a role trust policy lets `service_account` assume it through `oidc`
pub fn trust_covers_service_account(
    trust_policy: &Value,
    oidc: &OidcBinding,
    service_account: &ServiceAccountRef,
) -> bool {
    let sub_key = format!("{}:sub", oidc.issuer_host_path());
    let subject = service_account.subject();

    statements(trust_policy).iter().any(|statement| {
        let federated = statement
            .pointer("/Principal/Federated")
            .and_then(Value::as_str)
            .is_some_and(|arn| arn == oidc.provider_arn);
        let allowed = statement.get("Effect").and_then(Value::as_str) == Some("Allow");
        let subject_matches = ["StringEquals", "StringLike"].iter().any(|op| {
            statement
                .pointer(&format!("/Condition/{}", op))
                .and_then(|c| c.get(&sub_key))
                .is_some_and(|v| value_contains(v, &subject))
        });
        federated && allowed && subject_matches
    })
}

/// Whether a role trust policy lets an AWS service assume it
pub fn trust_covers_service(trust_policy: &Value, service: &str) -> bool {
    statements(trust_policy).iter().any(|statement| {
        statement.get("Effect").and_then(Value::as_str) == Some("Allow")
            && statement
                .pointer("/Principal/Service")
                .is_some_and(|v| value_contains(v, service))
    })
}

fn statements(policy: &Value) -> Vec<Value> {
    match policy.get("Statement") {
        Some(Value::Array(items)) => items.clone(),
        Some(single @ Value::Object(_)) => vec![single.clone()],
        _ => Vec::new(),
    }
}

/// IAM allows a string or a list of strings in most positions
fn value_contains(value: &Value, wanted: &str) -> bool {
    match value {
        Value::String(s) => s == wanted,
        Value::Array(items) => items.iter().any(|v| v.as_str() == Some(wanted)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oidc() -> OidcBinding {
        OidcBinding {
            cluster_name: "demo-cluster".to_string(),
            issuer_url: "https://oidc.eks.us-east-1.amazonaws.com/id/ABC123".to_string(),
            provider_arn: "arn:aws:iam::111122223333:oidc-provider/oidc.eks.us-east-1.amazonaws.com/id/ABC123".to_string(),
        }
    }

    fn binding() -> IamPolicyBinding {
        IamPolicyBinding {
            policy_name: "AWSLoadBalancerControllerIAMPolicy".to_string(),
            policy_document: PolicyDocumentSource::Inline(json!({})),
            role_name: "lb-role".to_string(),
            service_account: ServiceAccountRef::new("kube-system", "aws-load-balancer-controller"),
        }
    }

    #[test]
    fn test_trust_policy_covers_its_service_account() {
        let policy = binding().trust_policy(&oidc());
        assert_eq!(
            policy.pointer("/Statement/0/Condition/StringEquals/oidc.eks.us-east-1.amazonaws.com~1id~1ABC123:sub"),
            Some(&json!("system:serviceaccount:kube-system:aws-load-balancer-controller"))
        );
        assert!(trust_covers_service_account(&policy, &oidc(), &binding().service_account));
    }

    #[test]
    fn test_trust_policy_rejects_other_service_account() {
        let policy = binding().trust_policy(&oidc());
        let other = ServiceAccountRef::new("default", "someone-else");
        assert!(!trust_covers_service_account(&policy, &oidc(), &other));
    }

    #[test]
    fn test_trust_policy_rejects_other_provider() {
        let policy = binding().trust_policy(&oidc());
        let mut other = oidc();
        other.provider_arn = "arn:aws:iam::111122223333:oidc-provider/other".to_string();
        assert!(!trust_covers_service_account(&policy, &other, &binding().service_account));
    }

    #[test]
    fn test_service_trust() {
        let policy = service_trust_policy("eks.amazonaws.com");
        assert!(trust_covers_service(&policy, "eks.amazonaws.com"));
        assert!(!trust_covers_service(&policy, "eks-fargate-pods.amazonaws.com"));
    }

    #[test]
    fn test_strip_scheme() {
        assert_eq!(strip_scheme("https://oidc.example/id/1/"), "oidc.example/id/1");
        assert_eq!(strip_scheme("oidc.example/id/1"), "oidc.example/id/1");
    }
}
