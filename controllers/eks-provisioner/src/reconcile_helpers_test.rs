//! Unit tests for reconcile_helpers module

use super::*;
use crate::test_utils::test_context;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

#[tokio::test]
async fn test_lookup_or_create_existing_is_unchanged() {
    let creates = AtomicU32::new(0);
    let (value, status) = lookup_or_create(
        &test_context(),
        ReconcileMode::Apply,
        "IAMRole",
        "demo",
        || async { Ok(Some("existing")) },
        || async {
            creates.fetch_add(1, Ordering::SeqCst);
            Ok("created")
        },
    )
    .await
    .unwrap();
    assert_eq!(value, "existing");
    assert_eq!(status, ResourceStatus::Unchanged);
    assert_eq!(creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_lookup_or_create_missing_is_created() {
    let (value, status) = lookup_or_create(
        &test_context(),
        ReconcileMode::Apply,
        "IAMRole",
        "demo",
        || async { Ok(None) },
        || async { Ok("created") },
    )
    .await
    .unwrap();
    assert_eq!(value, "created");
    assert_eq!(status, ResourceStatus::Created);
}

#[tokio::test]
async fn test_verify_mode_never_creates() {
    let creates = AtomicU32::new(0);
    let result: Result<(&str, ResourceStatus), _> = lookup_or_create(
        &test_context(),
        ReconcileMode::Verify,
        "IAMRole",
        "demo",
        || async { Ok(None) },
        || async {
            creates.fetch_add(1, Ordering::SeqCst);
            Ok("created")
        },
    )
    .await;
    assert!(matches!(result, Err(ProvisionerError::NotConverged(_))));
    assert_eq!(creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_create_race_falls_back_to_lookup() {
    let lookups = Mutex::new(vec![Some("winner"), None]);
    let (value, status) = lookup_or_create(
        &test_context(),
        ReconcileMode::Apply,
        "IAMPolicy",
        "demo",
        || async { Ok(lookups.lock().unwrap().pop().flatten()) },
        || async { Err(ProvisionerError::AlreadyExists("EntityAlreadyExists".to_string())) },
    )
    .await
    .unwrap();
    assert_eq!(value, "winner");
    assert_eq!(status, ResourceStatus::Unchanged);
}

#[test]
fn test_drift_lists_every_difference() {
    let mut drift = Drift::default();
    drift.compare("version", "1.29", "1.28");
    drift.compare("subnets", &vec!["subnet-a"], &vec!["subnet-a"]);
    drift.push("selectors differ");
    assert_eq!(drift.differences().len(), 2);

    match drift.into_conflict("EKSCluster", "demo-cluster") {
        Err(ProvisionerError::Conflict(message)) => {
            assert!(message.contains("version"));
            assert!(message.contains("selectors differ"));
        }
        other => panic!("expected conflict, got {:?}", other),
    }
}

#[test]
fn test_empty_drift_is_ok() {
    assert!(Drift::default().into_conflict("EKSCluster", "demo-cluster").is_ok());
}
