//! Integration tests for the aws CLI client
//!
//! These tests require the `aws` CLI with working credentials.
//! Set AWS_REGION (and optionally AWS_PROFILE) to run.

use aws_client::{AwsCliClient, AwsClientTrait};

fn client() -> AwsCliClient {
    let region = std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
    AwsCliClient::new(region, std::env::var("AWS_PROFILE").ok())
}

#[tokio::test]
#[ignore] // Requires AWS credentials
async fn test_caller_identity() {
    let identity = client().get_caller_identity().await.expect("Failed to get caller identity");
    assert_eq!(identity.account.len(), 12);
}

#[tokio::test]
#[ignore]
async fn test_missing_cluster_is_none() {
    let cluster = client()
        .describe_cluster("eks-provisioner-does-not-exist")
        .await
        .expect("Failed to describe cluster");
    assert!(cluster.is_none());
}

#[tokio::test]
#[ignore]
async fn test_missing_role_is_none() {
    let role = client()
        .get_role("eks-provisioner-does-not-exist")
        .await
        .expect("Failed to get role");
    assert!(role.is_none());
}

#[tokio::test]
#[ignore]
async fn test_list_oidc_providers() {
    let providers = client().list_oidc_providers().await.expect("Failed to list OIDC providers");
    println!("Found {} OIDC providers", providers.len());
}
