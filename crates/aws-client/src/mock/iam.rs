//! IAM, STS and EC2 operations for MockAwsClient

use super::{MockAwsClient, lock};
use crate::error::AwsError;
use crate::models::*;
use serde_json::Value;
use std::collections::BTreeMap;

pub async fn get_caller_identity(client: &MockAwsClient) -> Result<CallerIdentity, AwsError> {
    client.enter("GetCallerIdentity")?;
    Ok(CallerIdentity {
        account: client.account_id.clone(),
        arn: client.arn("iam", "user/test"),
        user_id: "AIDATESTUSER".to_string(),
    })
}

pub async fn describe_subnets(client: &MockAwsClient, subnet_ids: &[String]) -> Result<Vec<Subnet>, AwsError> {
    client.enter("DescribeSubnets")?;
    let subnets = lock(&client.subnets);
    subnet_ids
        .iter()
        .map(|id| {
            subnets.get(id).cloned().ok_or_else(|| {
                AwsError::from_code(
                    "InvalidSubnetID.NotFound",
                    "DescribeSubnets",
                    &format!("The subnet ID '{}' does not exist", id),
                )
            })
        })
        .collect()
}

pub async fn get_role(client: &MockAwsClient, role_name: &str) -> Result<Option<IamRole>, AwsError> {
    client.enter("GetRole")?;
    Ok(lock(&client.roles).get(role_name).cloned())
}

pub async fn create_role(
    client: &MockAwsClient,
    role_name: &str,
    trust_policy: &Value,
    _tags: &BTreeMap<String, String>,
) -> Result<IamRole, AwsError> {
    client.enter("CreateRole")?;
    let mut roles = lock(&client.roles);
    if roles.contains_key(role_name) {
        return Err(AwsError::AlreadyExists(format!("Role with name {} already exists.", role_name)));
    }
    let role = IamRole {
        role_name: role_name.to_string(),
        arn: client.arn("iam", &format!("role/{}", role_name)),
        assume_role_policy_document: trust_policy.clone(),
    };
    roles.insert(role_name.to_string(), role.clone());
    client.record_mutation("CreateRole", role_name);
    Ok(role)
}

pub async fn list_attached_role_policies(client: &MockAwsClient, role_name: &str) -> Result<Vec<AttachedPolicy>, AwsError> {
    client.enter("ListAttachedRolePolicies")?;
    if !lock(&client.roles).contains_key(role_name) {
        return Err(AwsError::NotFound(format!("The role with name {} cannot be found.", role_name)));
    }
    Ok(lock(&client.attachments).get(role_name).cloned().unwrap_or_default())
}

pub async fn attach_role_policy(client: &MockAwsClient, role_name: &str, policy_arn: &str) -> Result<(), AwsError> {
    client.enter("AttachRolePolicy")?;
    if !lock(&client.roles).contains_key(role_name) {
        return Err(AwsError::NotFound(format!("The role with name {} cannot be found.", role_name)));
    }
    let policy_name = policy_arn.rsplit('/').next().unwrap_or(policy_arn).to_string();
    let mut attachments = lock(&client.attachments);
    let attached = attachments.entry(role_name.to_string()).or_default();
    if !attached.iter().any(|p| p.policy_arn == policy_arn) {
        attached.push(AttachedPolicy {
            policy_name,
            policy_arn: policy_arn.to_string(),
        });
    }
    client.record_mutation("AttachRolePolicy", role_name);
    Ok(())
}

pub async fn find_policy(client: &MockAwsClient, policy_name: &str) -> Result<Option<IamPolicy>, AwsError> {
    client.enter("ListPolicies")?;
    Ok(lock(&client.policies).get(policy_name).cloned())
}

pub async fn create_policy(client: &MockAwsClient, policy_name: &str, document: &Value) -> Result<IamPolicy, AwsError> {
    client.enter("CreatePolicy")?;
    let mut policies = lock(&client.policies);
    if policies.contains_key(policy_name) {
        return Err(AwsError::AlreadyExists(format!(
            "A policy called {} already exists. Duplicate names are not allowed.",
            policy_name
        )));
    }
    let policy = IamPolicy {
        policy_name: policy_name.to_string(),
        arn: client.arn("iam", &format!("policy/{}", policy_name)),
    };
    policies.insert(policy_name.to_string(), policy.clone());
    lock(&client.policy_documents).insert(policy_name.to_string(), document.clone());
    client.record_mutation("CreatePolicy", policy_name);
    Ok(policy)
}

pub async fn list_oidc_providers(client: &MockAwsClient) -> Result<Vec<OidcProvider>, AwsError> {
    client.enter("ListOpenIDConnectProviders")?;
    Ok(lock(&client.oidc_providers).clone())
}

pub async fn create_oidc_provider(client: &MockAwsClient, url: &str, _client_ids: &[String]) -> Result<OidcProvider, AwsError> {
    client.enter("CreateOpenIDConnectProvider")?;
    let host_path = url
        .strip_prefix("https://")
        .unwrap_or(url)
        .trim_end_matches('/')
        .to_string();
    let mut providers = lock(&client.oidc_providers);
    if providers.iter().any(|p| p.url == host_path) {
        return Err(AwsError::AlreadyExists(format!("Provider with url {} already exists.", url)));
    }
    let provider = OidcProvider {
        arn: client.arn("iam", &format!("oidc-provider/{}", host_path)),
        url: host_path,
    };
    providers.push(provider.clone());
    client.record_mutation("CreateOpenIDConnectProvider", url);
    Ok(provider)
}
