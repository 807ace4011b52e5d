//! Unit tests for the Kubernetes reconciler against MockKubeClient

use super::*;
use crate::config::ProvisionerConfig;
use crate::test_utils::{demo_desired_state, fast_config, test_context};
use kube_client::MockKubeClient;
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn reconciler(kube: &MockKubeClient) -> KubeReconciler {
    KubeReconciler::new(Arc::new(kube.clone()), test_context())
}

fn reconciler_with(kube: &MockKubeClient, config: ProvisionerConfig) -> KubeReconciler {
    KubeReconciler::new(
        Arc::new(kube.clone()),
        RunContext::new(Arc::new(config), CancellationToken::new()),
    )
}

fn deployment_key() -> ObjectKey {
    ObjectKey::new("apps/v1", "Deployment", Some("default"), "nginx-deployment")
}

fn config_map(name: &str) -> Manifest {
    Manifest::new(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": name, "namespace": "default"},
        "data": {"greeting": "hello"}
    }))
    .unwrap()
}

fn with_replicas(manifests: &[Manifest], replicas: i64) -> Vec<Manifest> {
    manifests
        .iter()
        .map(|m| {
            let mut value = m.value().clone();
            if m.kind() == "Deployment" {
                value["spec"]["replicas"] = json!(replicas);
            }
            Manifest::new(value).unwrap()
        })
        .collect()
}

#[tokio::test]
async fn test_core_workload_is_created() {
    let kube = MockKubeClient::new("demo-cluster");
    let manifests = demo_desired_state().core_manifests().unwrap();
    let mut recorder = StageRecorder::default();

    let applied = reconciler(&kube).apply_batch(&manifests, &mut recorder).await.unwrap();

    assert_eq!(applied.len(), 2);
    assert_eq!(
        recorder.status_of("Service", "default/nginx-service"),
        Some(ResourceStatus::Created)
    );
    assert_eq!(
        recorder.status_of("Deployment", "default/nginx-deployment"),
        Some(ResourceStatus::Created)
    );
    // Service before Deployment
    assert_eq!(
        kube.mutations(),
        vec![
            "create Service default/nginx-service".to_string(),
            "create Deployment default/nginx-deployment".to_string(),
        ]
    );

    let live = kube.object(&deployment_key()).unwrap();
    assert!(
        live.pointer("/metadata/annotations")
            .and_then(|a| a.get(diff::LAST_APPLIED_ANNOTATION))
            .is_some()
    );
}

#[tokio::test]
async fn test_second_apply_is_a_no_op() {
    let kube = MockKubeClient::new("demo-cluster");
    let manifests = demo_desired_state().core_manifests().unwrap();
    reconciler(&kube)
        .apply_batch(&manifests, &mut StageRecorder::default())
        .await
        .unwrap();
    kube.reset_counters();

    let mut recorder = StageRecorder::default();
    reconciler(&kube).apply_batch(&manifests, &mut recorder).await.unwrap();

    assert_eq!(kube.mutation_count(), 0, "unexpected mutations: {:?}", kube.mutations());
    assert!(recorder.resources.iter().all(|r| r.status == ResourceStatus::Unchanged));
}

#[tokio::test]
async fn test_changed_replicas_are_patched() {
    let kube = MockKubeClient::new("demo-cluster");
    let manifests = demo_desired_state().core_manifests().unwrap();
    reconciler(&kube)
        .apply_batch(&manifests, &mut StageRecorder::default())
        .await
        .unwrap();
    kube.reset_counters();

    let mut recorder = StageRecorder::default();
    reconciler(&kube)
        .apply_batch(&with_replicas(&manifests, 5), &mut recorder)
        .await
        .unwrap();

    assert_eq!(
        recorder.status_of("Deployment", "default/nginx-deployment"),
        Some(ResourceStatus::Updated)
    );
    assert_eq!(
        recorder.status_of("Service", "default/nginx-service"),
        Some(ResourceStatus::Unchanged)
    );
    assert_eq!(kube.mutations(), vec!["patch Deployment default/nginx-deployment".to_string()]);
    assert_eq!(
        kube.object(&deployment_key()).unwrap().pointer("/spec/replicas"),
        Some(&json!(5))
    );
}

#[tokio::test]
async fn test_env_removed_from_container_is_pruned() {
    let kube = MockKubeClient::new("demo-cluster");
    let manifests = demo_desired_state().core_manifests().unwrap();
    let deployment = manifests.iter().find(|m| m.kind() == "Deployment").cloned().unwrap();
    let mut with_env = deployment.value().clone();
    with_env["spec"]["template"]["spec"]["containers"][0]["env"] = json!([{"name": "DEBUG", "value": "1"}]);
    reconciler(&kube)
        .apply_batch(&[Manifest::new(with_env).unwrap()], &mut StageRecorder::default())
        .await
        .unwrap();
    kube.reset_counters();

    let mut recorder = StageRecorder::default();
    reconciler(&kube)
        .apply_batch(std::slice::from_ref(&deployment), &mut recorder)
        .await
        .unwrap();

    assert_eq!(
        recorder.status_of("Deployment", "default/nginx-deployment"),
        Some(ResourceStatus::Updated)
    );
    let live = kube.object(&deployment_key()).unwrap();
    assert!(live.pointer("/spec/template/spec/containers/0/env").is_none());

    kube.reset_counters();
    reconciler(&kube)
        .apply_batch(std::slice::from_ref(&deployment), &mut StageRecorder::default())
        .await
        .unwrap();
    assert_eq!(kube.mutation_count(), 0, "unexpected mutations: {:?}", kube.mutations());
}

#[tokio::test]
async fn test_object_created_by_someone_else_is_adopted() {
    let kube = MockKubeClient::new("demo-cluster");
    let manifests = demo_desired_state().core_manifests().unwrap();
    for manifest in &manifests {
        kube.add_object(manifest.value().clone()).unwrap();
    }

    let mut recorder = StageRecorder::default();
    reconciler(&kube).apply_batch(&manifests, &mut recorder).await.unwrap();

    // Only the last-applied annotation is written
    assert!(recorder.resources.iter().all(|r| r.status == ResourceStatus::Updated));
    kube.reset_counters();
    reconciler(&kube)
        .apply_batch(&manifests, &mut StageRecorder::default())
        .await
        .unwrap();
    assert_eq!(kube.mutation_count(), 0);
}

#[tokio::test]
async fn test_failure_does_not_stop_the_batch() {
    let kube = MockKubeClient::new("demo-cluster");
    kube.fail_writes_to("Service", "nginx-service");
    let manifests = demo_desired_state().core_manifests().unwrap();
    let mut recorder = StageRecorder::default();

    let err = reconciler(&kube).apply_batch(&manifests, &mut recorder).await.unwrap_err();

    assert!(matches!(err, ProvisionerError::Kube(_)), "got {:?}", err);
    assert_eq!(recorder.status_of("Service", "default/nginx-service"), Some(ResourceStatus::Error));
    assert_eq!(
        recorder.status_of("Deployment", "default/nginx-deployment"),
        Some(ResourceStatus::Created)
    );
    assert!(kube.object(&deployment_key()).is_some());
}

#[tokio::test]
async fn test_rollback_undoes_created_and_updated_objects() {
    let kube = MockKubeClient::new("demo-cluster");
    let manifests = demo_desired_state().core_manifests().unwrap();
    let deployment = manifests.iter().find(|m| m.kind() == "Deployment").cloned().unwrap();
    reconciler(&kube)
        .apply_batch(std::slice::from_ref(&deployment), &mut StageRecorder::default())
        .await
        .unwrap();

    kube.fail_writes_to("Service", "nginx-service");
    let mut batch = vec![config_map("nginx-config")];
    batch.extend(with_replicas(std::slice::from_ref(&deployment), 5));
    batch.extend(manifests.iter().filter(|m| m.kind() == "Service").cloned());

    let config = ProvisionerConfig {
        rollback_on_failure: true,
        ..fast_config()
    };
    let mut recorder = StageRecorder::default();
    let result = reconciler_with(&kube, config).apply_batch(&batch, &mut recorder).await;

    assert!(result.is_err());
    assert_eq!(
        recorder.status_of("ConfigMap", "default/nginx-config"),
        Some(ResourceStatus::RolledBack)
    );
    assert_eq!(
        recorder.status_of("Deployment", "default/nginx-deployment"),
        Some(ResourceStatus::RolledBack)
    );
    assert!(kube.object(&ObjectKey::new("v1", "ConfigMap", Some("default"), "nginx-config")).is_none());
    assert_eq!(
        kube.object(&deployment_key()).unwrap().pointer("/spec/replicas"),
        Some(&json!(3))
    );
}

#[tokio::test]
async fn test_rollout_that_never_completes_times_out() {
    let kube = MockKubeClient::new("demo-cluster");
    kube.script_availability(&deployment_key(), &[0]);
    let manifests = demo_desired_state().core_manifests().unwrap();

    let err = reconciler(&kube)
        .apply_batch(&manifests, &mut StageRecorder::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionerError::Timeout(_)), "got {:?}", err);
    assert_eq!(err.exit_code(), 5);
}

#[tokio::test]
async fn test_ingress_address_is_reported() {
    let kube = MockKubeClient::new("demo-cluster");
    let manifests = demo_desired_state().ingress_manifests().unwrap();
    let reconciler = reconciler(&kube);
    let applied = reconciler
        .apply_batch(&manifests, &mut StageRecorder::default())
        .await
        .unwrap();

    let address = reconciler.wait_for_ingress_address(&applied[0].key).await.unwrap();
    assert_eq!(address, "k8s-demo-cluster-0123456789.us-east-1.elb.amazonaws.com");
}

#[tokio::test]
async fn test_ingress_without_address_times_out() {
    let kube = MockKubeClient::new("demo-cluster");
    kube.set_ingress_hostname(None);
    let manifests = demo_desired_state().ingress_manifests().unwrap();
    let reconciler = reconciler(&kube);
    let applied = reconciler
        .apply_batch(&manifests, &mut StageRecorder::default())
        .await
        .unwrap();

    let err = reconciler.wait_for_ingress_address(&applied[0].key).await.unwrap_err();
    assert!(matches!(err, ProvisionerError::Timeout(_)));
}

#[tokio::test]
async fn test_cancelled_run_stops_before_writing() {
    let kube = MockKubeClient::new("demo-cluster");
    let ctx = test_context();
    ctx.cancel.cancel();
    let reconciler = KubeReconciler::new(Arc::new(kube.clone()), ctx);
    let manifests = demo_desired_state().core_manifests().unwrap();

    let err = reconciler
        .apply_batch(&manifests, &mut StageRecorder::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionerError::Cancelled));
    assert_eq!(kube.mutation_count(), 0);
}

#[test]
fn test_ingress_address_falls_back_to_ip() {
    let live = json!({"status": {"loadBalancer": {"ingress": [{"ip": "203.0.113.7"}]}}});
    assert_eq!(readiness::ingress_address(&live).as_deref(), Some("203.0.113.7"));
    assert_eq!(readiness::ingress_address(&json!({"status": {}})), None);
}
