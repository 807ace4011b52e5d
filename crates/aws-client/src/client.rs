//! `aws` CLI client
//!
//! Every call runs `aws <service> <command> ... --region <region> --output json`
//! and parses stdout. Errors on stderr are classified by `AwsError`.

use crate::aws_trait::AwsClientTrait;
use crate::error::AwsError;
use crate::models::*;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// AWS client backed by the `aws` CLI
#[derive(Debug, Clone)]
pub struct AwsCliClient {
    binary: String,
    region: String,
    profile: Option<String>,
    call_timeout: Duration,
}

impl AwsCliClient {
    /// Create a client for a region
    ///
    /// # Arguments
    /// * `region` - AWS region every call targets
    /// * `profile` - named CLI profile (falls back to the CLI's own resolution)
    pub fn new(region: impl Into<String>, profile: Option<String>) -> Self {
        Self {
            binary: "aws".to_string(),
            region: region.into(),
            profile,
            call_timeout: Duration::from_secs(120),
        }
    }

    /// Use a different `aws` executable
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Bound every CLI invocation
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Run a CLI command and return its JSON output (`Null` when stdout is empty)
    async fn run(&self, args: &[&str]) -> Result<Value, AwsError> {
        let operation = args.iter().take(2).copied().collect::<Vec<_>>().join(" ");
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .args(["--region", self.region.as_str(), "--output", "json", "--no-cli-pager"])
            .kill_on_drop(true);
        if let Some(profile) = &self.profile {
            command.args(["--profile", profile.as_str()]);
        }

        debug!("Running aws {}", operation);
        let output = tokio::time::timeout(self.call_timeout, command.output())
            .await
            .map_err(|_| AwsError::Timeout {
                operation: operation.clone(),
                seconds: self.call_timeout.as_secs(),
            })?
            .map_err(|e| AwsError::Cli(format!("failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AwsError::from_cli_stderr(&stderr, &operation));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&stdout)?)
    }

    /// Run a command and deserialize one field of its output
    async fn run_field<T: DeserializeOwned>(&self, args: &[&str], field: &str) -> Result<T, AwsError> {
        let mut value = self.run(args).await?;
        let inner = value
            .get_mut(field)
            .map(Value::take)
            .ok_or_else(|| AwsError::Cli(format!("response to {} has no '{}' field", args.join(" "), field)))?;
        Ok(serde_json::from_value(inner)?)
    }

    /// Write a kubeconfig entry for a cluster (`aws eks update-kubeconfig`)
    pub async fn update_kubeconfig(&self, cluster_name: &str, kubeconfig: &Path, alias: &str) -> Result<(), AwsError> {
        let path = kubeconfig.to_string_lossy().into_owned();
        self.run(&[
            "eks",
            "update-kubeconfig",
            "--name",
            cluster_name,
            "--kubeconfig",
            path.as_str(),
            "--alias",
            alias,
        ])
        .await?;
        Ok(())
    }
}

/// Missing resources become `None`
fn optional<T>(result: Result<T, AwsError>) -> Result<Option<T>, AwsError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// `k=v,k2=v2` as the EKS commands take it
fn eks_tags(tags: &BTreeMap<String, String>) -> String {
    tags.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

fn scaling_arg(scaling: NodegroupScaling) -> String {
    format!(
        "minSize={},maxSize={},desiredSize={}",
        scaling.min_size, scaling.max_size, scaling.desired_size
    )
}

#[async_trait::async_trait]
impl AwsClientTrait for AwsCliClient {
    fn region(&self) -> &str {
        &self.region
    }

    async fn get_caller_identity(&self) -> Result<CallerIdentity, AwsError> {
        let value = self.run(&["sts", "get-caller-identity"]).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn describe_subnets(&self, subnet_ids: &[String]) -> Result<Vec<Subnet>, AwsError> {
        let mut args = vec!["ec2", "describe-subnets", "--subnet-ids"];
        args.extend(subnet_ids.iter().map(String::as_str));
        self.run_field(&args, "Subnets").await
    }

    async fn describe_cluster(&self, name: &str) -> Result<Option<EksCluster>, AwsError> {
        optional(self.run_field(&["eks", "describe-cluster", "--name", name], "cluster").await)
    }

    async fn create_cluster(&self, request: &CreateClusterRequest) -> Result<EksCluster, AwsError> {
        let vpc_config = format!("subnetIds={}", request.subnet_ids.join(","));
        let tags = eks_tags(&request.tags);
        let mut args = vec![
            "eks",
            "create-cluster",
            "--name",
            request.name.as_str(),
            "--kubernetes-version",
            request.version.as_str(),
            "--role-arn",
            request.role_arn.as_str(),
            "--resources-vpc-config",
            vpc_config.as_str(),
        ];
        if !request.tags.is_empty() {
            args.extend(["--tags", tags.as_str()]);
        }
        self.run_field(&args, "cluster").await
    }

    async fn get_role(&self, role_name: &str) -> Result<Option<IamRole>, AwsError> {
        optional(self.run_field(&["iam", "get-role", "--role-name", role_name], "Role").await)
    }

    async fn create_role(&self, role_name: &str, trust_policy: &Value, tags: &BTreeMap<String, String>) -> Result<IamRole, AwsError> {
        let document = trust_policy.to_string();
        let tag_args: Vec<String> = tags
            .iter()
            .map(|(k, v)| format!("Key={},Value={}", k, v))
            .collect();
        let mut args = vec![
            "iam",
            "create-role",
            "--role-name",
            role_name,
            "--assume-role-policy-document",
            document.as_str(),
        ];
        if !tag_args.is_empty() {
            args.push("--tags");
            args.extend(tag_args.iter().map(String::as_str));
        }
        self.run_field(&args, "Role").await
    }

    async fn list_attached_role_policies(&self, role_name: &str) -> Result<Vec<AttachedPolicy>, AwsError> {
        self.run_field(
            &["iam", "list-attached-role-policies", "--role-name", role_name],
            "AttachedPolicies",
        )
        .await
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), AwsError> {
        self.run(&[
            "iam",
            "attach-role-policy",
            "--role-name",
            role_name,
            "--policy-arn",
            policy_arn,
        ])
        .await?;
        Ok(())
    }

    async fn find_policy(&self, policy_name: &str) -> Result<Option<IamPolicy>, AwsError> {
        let policies: Vec<IamPolicy> = self
            .run_field(&["iam", "list-policies", "--scope", "Local"], "Policies")
            .await?;
        Ok(policies.into_iter().find(|p| p.policy_name == policy_name))
    }

    async fn create_policy(&self, policy_name: &str, document: &Value) -> Result<IamPolicy, AwsError> {
        let document = document.to_string();
        self.run_field(
            &[
                "iam",
                "create-policy",
                "--policy-name",
                policy_name,
                "--policy-document",
                document.as_str(),
            ],
            "Policy",
        )
        .await
    }

    async fn list_oidc_providers(&self) -> Result<Vec<OidcProvider>, AwsError> {
        let value = self.run(&["iam", "list-open-id-connect-providers"]).await?;
        let providers = value
            .get("OpenIDConnectProviderList")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("Arn").and_then(Value::as_str))
                    .filter_map(OidcProvider::from_arn)
                    .collect()
            })
            .unwrap_or_default();
        Ok(providers)
    }

    async fn create_oidc_provider(&self, url: &str, client_ids: &[String]) -> Result<OidcProvider, AwsError> {
        let mut args = vec!["iam", "create-open-id-connect-provider", "--url", url, "--client-id-list"];
        args.extend(client_ids.iter().map(String::as_str));
        let arn: String = self.run_field(&args, "OpenIDConnectProviderArn").await?;
        OidcProvider::from_arn(&arn).ok_or_else(|| AwsError::Cli(format!("unexpected OIDC provider ARN {}", arn)))
    }

    async fn describe_fargate_profile(&self, cluster_name: &str, profile_name: &str) -> Result<Option<FargateProfile>, AwsError> {
        optional(
            self.run_field(
                &[
                    "eks",
                    "describe-fargate-profile",
                    "--cluster-name",
                    cluster_name,
                    "--fargate-profile-name",
                    profile_name,
                ],
                "fargateProfile",
            )
            .await,
        )
    }

    async fn create_fargate_profile(&self, request: &CreateFargateProfileRequest) -> Result<FargateProfile, AwsError> {
        let selectors = serde_json::to_string(&request.selectors)?;
        let tags = eks_tags(&request.tags);
        let mut args = vec![
            "eks",
            "create-fargate-profile",
            "--cluster-name",
            request.cluster_name.as_str(),
            "--fargate-profile-name",
            request.profile_name.as_str(),
            "--pod-execution-role-arn",
            request.pod_execution_role_arn.as_str(),
            "--selectors",
            selectors.as_str(),
            "--subnets",
        ];
        args.extend(request.subnets.iter().map(String::as_str));
        if !request.tags.is_empty() {
            args.extend(["--tags", tags.as_str()]);
        }
        self.run_field(&args, "fargateProfile").await
    }

    async fn describe_nodegroup(&self, cluster_name: &str, nodegroup_name: &str) -> Result<Option<Nodegroup>, AwsError> {
        optional(
            self.run_field(
                &[
                    "eks",
                    "describe-nodegroup",
                    "--cluster-name",
                    cluster_name,
                    "--nodegroup-name",
                    nodegroup_name,
                ],
                "nodegroup",
            )
            .await,
        )
    }

    async fn create_nodegroup(&self, request: &CreateNodegroupRequest) -> Result<Nodegroup, AwsError> {
        let scaling = scaling_arg(request.scaling);
        let disk_size = request.disk_size.to_string();
        let tags = eks_tags(&request.tags);
        let mut args = vec![
            "eks",
            "create-nodegroup",
            "--cluster-name",
            request.cluster_name.as_str(),
            "--nodegroup-name",
            request.nodegroup_name.as_str(),
            "--node-role",
            request.node_role_arn.as_str(),
            "--scaling-config",
            scaling.as_str(),
            "--disk-size",
            disk_size.as_str(),
            "--instance-types",
        ];
        args.extend(request.instance_types.iter().map(String::as_str));
        args.push("--subnets");
        args.extend(request.subnets.iter().map(String::as_str));
        if !request.tags.is_empty() {
            args.extend(["--tags", tags.as_str()]);
        }
        self.run_field(&args, "nodegroup").await
    }

    async fn update_nodegroup_scaling(&self, cluster_name: &str, nodegroup_name: &str, scaling: NodegroupScaling) -> Result<(), AwsError> {
        let scaling = scaling_arg(scaling);
        self.run(&[
            "eks",
            "update-nodegroup-config",
            "--cluster-name",
            cluster_name,
            "--nodegroup-name",
            nodegroup_name,
            "--scaling-config",
            scaling.as_str(),
        ])
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eks_tags_format() {
        let tags = BTreeMap::from([
            ("project".to_string(), "demo".to_string()),
            ("owner".to_string(), "ops".to_string()),
        ]);
        assert_eq!(eks_tags(&tags), "owner=ops,project=demo");
    }

    #[test]
    fn test_scaling_arg() {
        let scaling = NodegroupScaling { min_size: 1, max_size: 3, desired_size: 2 };
        assert_eq!(scaling_arg(scaling), "minSize=1,maxSize=3,desiredSize=2");
    }

    #[test]
    fn test_optional_maps_not_found() {
        let missing: Result<u8, AwsError> = Err(AwsError::NotFound("x".to_string()));
        assert_eq!(optional(missing).unwrap(), None);

        let denied: Result<u8, AwsError> = Err(AwsError::AccessDenied {
            operation: "GetRole".to_string(),
            message: "no".to_string(),
        });
        assert!(optional(denied).is_err());
    }

    #[tokio::test]
    async fn test_missing_binary_is_cli_error() {
        let client = AwsCliClient::new("us-east-1", None).with_binary("/nonexistent/aws-cli-for-tests");
        let err = client.get_caller_identity().await.unwrap_err();
        assert!(matches!(err, AwsError::Cli(_)));
    }
}
