//! Integration tests for the Kubernetes client
//!
//! These tests require a reachable cluster in the current kubeconfig context.

use kube_client::{KubeClient, KubeClientTrait, ObjectKey};
use serde_json::json;

#[tokio::test]
#[ignore] // Requires a Kubernetes cluster
async fn test_get_kube_system_namespace() {
    let client = KubeClient::try_default().await.expect("Failed to create client");
    let key = ObjectKey::new("v1", "Namespace", None, "kube-system");
    let namespace = client.get(&key).await.expect("Failed to get namespace");
    assert!(namespace.is_some());
}

#[tokio::test]
#[ignore]
async fn test_configmap_lifecycle() {
    let client = KubeClient::try_default().await.expect("Failed to create client");
    let object = json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": "eks-provisioner-it", "namespace": "default"},
        "data": {"a": "1"}
    });
    let key = ObjectKey::from_object(&object).expect("key");
    let _ = client.delete(&key).await;

    client.create(&object).await.expect("Failed to create");
    let patched = client
        .patch(&key, &json!({"data": {"a": null, "b": "2"}}))
        .await
        .expect("Failed to patch");
    assert_eq!(patched["data"], json!({"b": "2"}));
    client.delete(&key).await.expect("Failed to delete");
}
