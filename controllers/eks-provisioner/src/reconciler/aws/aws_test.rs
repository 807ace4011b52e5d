//! Unit tests for the AWS reconciler against MockAwsClient

use super::*;
use crate::error::ErrorClass;
use crate::report::ResourceStatus;
use crate::test_utils::{demo_cluster_spec, mock_aws_with_demo_subnets, test_context};
use aws_client::{EksStatus, FargateProfile, FargateProfileSelector, FaultKind, MockAwsClient, Nodegroup, NodegroupScaling};
use cluster_model::{NodeGroupSpec, NodeMode, ScalingConfig};

fn reconciler(client: &MockAwsClient, mode: ReconcileMode) -> AwsReconciler {
    AwsReconciler::new(Arc::new(client.clone()), test_context(), mode)
}

#[tokio::test]
async fn test_demo_cluster_converges() {
    let aws = mock_aws_with_demo_subnets();
    let spec = demo_cluster_spec();
    let mut recorder = StageRecorder::default();

    let state = reconciler(&aws, ReconcileMode::Apply)
        .reconcile(&spec, &mut recorder)
        .await
        .unwrap();

    assert_eq!(state.account_id, "111122223333");
    assert_eq!(state.cluster.status, EksStatus::Active);
    assert_eq!(state.vpc_id, "vpc-0demo");
    assert_eq!(
        state.oidc.provider_arn,
        "arn:aws:iam::111122223333:oidc-provider/oidc.eks.us-east-1.amazonaws.com/id/DEMOCLUSTER"
    );
    assert_eq!(recorder.status_of("EKSCluster", "demo-cluster"), Some(ResourceStatus::Created));
    assert_eq!(recorder.status_of("FargateProfile", "fp-default"), Some(ResourceStatus::Created));
    assert_eq!(
        recorder.status_of("IAMRole", "demo-cluster-fargate-pod-execution-role"),
        Some(ResourceStatus::Created)
    );

    let mutations = aws.mutations();
    assert!(mutations.contains(&"CreateCluster demo-cluster".to_string()));
    assert!(mutations.contains(&"CreateFargateProfile fp-default".to_string()));
    assert_eq!(aws.call_count("CreateOpenIDConnectProvider"), 1);
}

#[tokio::test]
async fn test_second_run_makes_no_changes() {
    let aws = mock_aws_with_demo_subnets();
    let spec = demo_cluster_spec();
    reconciler(&aws, ReconcileMode::Apply)
        .reconcile(&spec, &mut StageRecorder::default())
        .await
        .unwrap();
    aws.reset_counters();

    let mut recorder = StageRecorder::default();
    reconciler(&aws, ReconcileMode::Apply)
        .reconcile(&spec, &mut recorder)
        .await
        .unwrap();

    assert_eq!(aws.mutation_count(), 0, "unexpected mutations: {:?}", aws.mutations());
    assert!(recorder.resources.iter().all(|r| r.status == ResourceStatus::Unchanged));
}

#[tokio::test]
async fn test_verify_mode_on_converged_account_passes() {
    let aws = mock_aws_with_demo_subnets();
    let spec = demo_cluster_spec();
    reconciler(&aws, ReconcileMode::Apply)
        .reconcile(&spec, &mut StageRecorder::default())
        .await
        .unwrap();
    aws.reset_counters();

    reconciler(&aws, ReconcileMode::Verify)
        .reconcile(&spec, &mut StageRecorder::default())
        .await
        .unwrap();
    assert_eq!(aws.mutation_count(), 0);
}

#[tokio::test]
async fn test_verify_mode_on_empty_account_is_not_converged() {
    let aws = mock_aws_with_demo_subnets();
    let result = reconciler(&aws, ReconcileMode::Verify)
        .reconcile(&demo_cluster_spec(), &mut StageRecorder::default())
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotConverged);
    assert_eq!(aws.mutation_count(), 0);
}

#[tokio::test]
async fn test_no_private_subnets_fails_before_any_call() {
    let aws = mock_aws_with_demo_subnets();
    let mut spec = demo_cluster_spec();
    spec.subnets.private.clear();

    let err = reconciler(&aws, ReconcileMode::Apply)
        .reconcile(&spec, &mut StageRecorder::default())
        .await
        .unwrap_err();

    assert_eq!(err.class(), ErrorClass::Validation);
    assert_eq!(aws.call_count("GetCallerIdentity"), 0);
    assert_eq!(aws.call_count("DescribeSubnets"), 0);
}

#[tokio::test]
async fn test_region_of_client_must_match() {
    let aws = MockAwsClient::new("eu-west-1");
    let err = reconciler(&aws, ReconcileMode::Apply)
        .reconcile(&demo_cluster_spec(), &mut StageRecorder::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionerError::InvalidConfig(_)));
}

#[tokio::test]
async fn test_unknown_subnet_is_region_mismatch() {
    let aws = mock_aws_with_demo_subnets();
    let mut spec = demo_cluster_spec();
    spec.subnets.private.push("subnet-0elsewhere".to_string());

    let err = reconciler(&aws, ReconcileMode::Apply)
        .reconcile(&spec, &mut StageRecorder::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionerError::RegionMismatch(_)), "got {:?}", err);
    assert_eq!(err.exit_code(), 2);
    assert_eq!(aws.mutation_count(), 0);
}

#[tokio::test]
async fn test_subnets_in_two_vpcs_are_rejected() {
    let aws = mock_aws_with_demo_subnets();
    aws.add_subnet("subnet-0other", "vpc-0other", "us-east-1c");
    let mut spec = demo_cluster_spec();
    spec.subnets.private.push("subnet-0other".to_string());

    let err = reconciler(&aws, ReconcileMode::Apply)
        .reconcile(&spec, &mut StageRecorder::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionerError::VpcMismatch(_)), "got {:?}", err);
    assert_eq!(aws.mutation_count(), 0);
}

#[tokio::test]
async fn test_declared_vpc_must_match_subnets() {
    let aws = mock_aws_with_demo_subnets();
    let mut spec = demo_cluster_spec();
    spec.vpc_id = Some("vpc-0declared".to_string());

    let err = reconciler(&aws, ReconcileMode::Apply)
        .reconcile(&spec, &mut StageRecorder::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionerError::VpcMismatch(_)));
}

#[tokio::test]
async fn test_existing_cluster_with_other_version_conflicts() {
    let aws = mock_aws_with_demo_subnets();
    let spec = demo_cluster_spec();
    reconciler(&aws, ReconcileMode::Apply)
        .reconcile(&spec, &mut StageRecorder::default())
        .await
        .unwrap();

    let mut newer = spec.clone();
    newer.version = "1.30".to_string();
    aws.reset_counters();
    let err = reconciler(&aws, ReconcileMode::Apply)
        .reconcile(&newer, &mut StageRecorder::default())
        .await
        .unwrap_err();

    match err {
        ProvisionerError::Conflict(message) => assert!(message.contains("version")),
        other => panic!("expected conflict, got {:?}", other),
    }
    assert_eq!(aws.mutation_count(), 0);
}

#[tokio::test]
async fn test_fargate_profile_with_other_selectors_conflicts() {
    let aws = mock_aws_with_demo_subnets();
    aws.add_fargate_profile(
        "demo-cluster",
        FargateProfile {
            fargate_profile_name: "fp-default".to_string(),
            status: EksStatus::Active,
            pod_execution_role_arn: "arn:aws:iam::111122223333:role/other".to_string(),
            subnets: vec![],
            selectors: vec![FargateProfileSelector {
                namespace: "apps".to_string(),
                labels: Default::default(),
            }],
        },
    );

    let err = reconciler(&aws, ReconcileMode::Apply)
        .reconcile(&demo_cluster_spec(), &mut StageRecorder::default())
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Conflict);
    assert_eq!(aws.call_count("CreateFargateProfile"), 0);
}

#[tokio::test]
async fn test_role_trusting_another_service_conflicts() {
    let aws = mock_aws_with_demo_subnets();
    aws.add_role(aws_client::IamRole {
        role_name: "demo-cluster-cluster-role".to_string(),
        arn: "arn:aws:iam::111122223333:role/demo-cluster-cluster-role".to_string(),
        assume_role_policy_document: cluster_model::service_trust_policy("lambda.amazonaws.com"),
    });

    let err = reconciler(&aws, ReconcileMode::Apply)
        .reconcile(&demo_cluster_spec(), &mut StageRecorder::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionerError::Conflict(_)));
    assert_eq!(aws.call_count("CreateCluster"), 0);
}

#[tokio::test]
async fn test_access_denied_is_permission_error() {
    let aws = mock_aws_with_demo_subnets();
    aws.inject_fault("CreateRole", FaultKind::AccessDenied, 1);

    let err = reconciler(&aws, ReconcileMode::Apply)
        .reconcile(&demo_cluster_spec(), &mut StageRecorder::default())
        .await
        .unwrap_err();

    assert_eq!(err.class(), ErrorClass::Permission);
    assert_eq!(err.exit_code(), 4);
    // Permission errors are never retried
    assert_eq!(aws.call_count("CreateRole"), 1);
}

#[tokio::test]
async fn test_throttled_describe_is_retried() {
    let aws = mock_aws_with_demo_subnets();
    aws.inject_fault("DescribeCluster", FaultKind::Throttle, 2);

    reconciler(&aws, ReconcileMode::Apply)
        .reconcile(&demo_cluster_spec(), &mut StageRecorder::default())
        .await
        .unwrap();
    assert_eq!(aws.call_count("CreateCluster"), 1);
}

#[tokio::test]
async fn test_node_group_is_created_and_rescaled() {
    let aws = mock_aws_with_demo_subnets();
    let mut spec = demo_cluster_spec();
    spec.nodes = NodeMode::Ec2(NodeGroupSpec::default());

    let mut recorder = StageRecorder::default();
    reconciler(&aws, ReconcileMode::Apply)
        .reconcile(&spec, &mut recorder)
        .await
        .unwrap();
    assert_eq!(recorder.status_of("Nodegroup", "demo-cluster-ng"), Some(ResourceStatus::Created));
    assert_eq!(
        recorder.status_of("IAMRole", "demo-cluster-node-role"),
        Some(ResourceStatus::Created)
    );

    spec.nodes = NodeMode::Ec2(NodeGroupSpec {
        scaling: ScalingConfig {
            min_size: 2,
            desired_size: 4,
            max_size: 6,
        },
        ..Default::default()
    });
    aws.reset_counters();

    let mut recorder = StageRecorder::default();
    reconciler(&aws, ReconcileMode::Apply)
        .reconcile(&spec, &mut recorder)
        .await
        .unwrap();
    assert_eq!(recorder.status_of("Nodegroup", "demo-cluster-ng"), Some(ResourceStatus::Updated));
    assert_eq!(aws.mutations(), vec!["UpdateNodegroupConfig demo-cluster-ng".to_string()]);
}

#[tokio::test]
async fn test_node_group_instance_type_drift_conflicts() {
    let aws = mock_aws_with_demo_subnets();
    let mut spec = demo_cluster_spec();
    spec.nodes = NodeMode::Ec2(NodeGroupSpec::default());
    aws.add_nodegroup(
        "demo-cluster",
        Nodegroup {
            nodegroup_name: "demo-cluster-ng".to_string(),
            status: EksStatus::Active,
            instance_types: vec!["m5.large".to_string()],
            scaling_config: NodegroupScaling {
                min_size: 1,
                max_size: 3,
                desired_size: 2,
            },
            node_role: String::new(),
            subnets: vec![],
            disk_size: Some(20),
        },
    );

    let err = reconciler(&aws, ReconcileMode::Apply)
        .reconcile(&spec, &mut StageRecorder::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionerError::Conflict(_)));
    assert_eq!(aws.call_count("UpdateNodegroupConfig"), 0);
}

#[test]
fn test_partition_from_region() {
    assert_eq!(partition("us-east-1"), "aws");
    assert_eq!(partition("us-gov-west-1"), "aws-us-gov");
    assert_eq!(partition("cn-north-1"), "aws-cn");
}
