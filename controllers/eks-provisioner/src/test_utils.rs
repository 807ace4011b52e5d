//! Test utilities shared by the reconciler, installer and driver tests
//!
//! Everything runs against the in-memory mocks of the client crates with
//! millisecond delays, so waits and retries are exercised without slowing
//! the suite down.

use crate::backoff::RetryConfig;
use crate::config::ProvisionerConfig;
use crate::connector::{ClusterConnector, ClusterSession};
use crate::context::RunContext;
use crate::error::ProvisionerError;
use async_trait::async_trait;
use aws_client::{AwsClientTrait, MockAwsClient};
use cluster_model::{ClusterSpec, DesiredState, PolicyDocumentSource};
use helm_client::{MockHelmClient, ReleaseRequest};
use kube_client::MockKubeClient;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEMO_SPEC: &str = include_str!("../../../demos/demo-cluster.yaml");

/// Subnets of the demo spec, all in `vpc-0demo`
pub const DEMO_SUBNETS: [(&str, &str); 4] = [
    ("subnet-0a1b2c3d4e5f60001", "us-east-1a"),
    ("subnet-0a1b2c3d4e5f60002", "us-east-1b"),
    ("subnet-0a1b2c3d4e5f60003", "us-east-1a"),
    ("subnet-0a1b2c3d4e5f60004", "us-east-1b"),
];

pub fn fast_config() -> ProvisionerConfig {
    ProvisionerConfig {
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        },
        aws_poll_interval: Duration::from_millis(1),
        cluster_timeout: Duration::from_millis(500),
        capacity_timeout: Duration::from_millis(500),
        kube_poll_interval: Duration::from_millis(1),
        rollout_timeout: Duration::from_millis(200),
        ingress_timeout: Duration::from_millis(200),
        health_polls: 3,
        health_interval: Duration::from_millis(1),
        health_timeout: Duration::from_millis(200),
        helm_timeout: Duration::from_secs(5),
        rollback_on_failure: false,
        rollback_release: true,
    }
}

pub fn test_context() -> RunContext {
    context_with(fast_config())
}

pub fn context_with(config: ProvisionerConfig) -> RunContext {
    RunContext::new(Arc::new(config), CancellationToken::new())
}

/// Minimal stand-in for the load balancer controller policy
pub fn controller_policy() -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": ["elasticloadbalancing:*", "ec2:Describe*"],
            "Resource": "*"
        }]
    })
}

/// The demo spec with an inline controller policy, so tests never download it
pub fn demo_desired_state() -> DesiredState {
    let mut desired = DesiredState::from_yaml_str(DEMO_SPEC).unwrap();
    let mut release = desired.controller_release().unwrap();
    release.policy_document = PolicyDocumentSource::Inline(controller_policy());
    desired.controller = Some(release);
    desired
}

pub fn demo_cluster_spec() -> ClusterSpec {
    demo_desired_state().cluster
}

pub fn mock_aws_with_demo_subnets() -> MockAwsClient {
    let aws = MockAwsClient::new("us-east-1");
    for (subnet_id, zone) in DEMO_SUBNETS {
        aws.add_subnet(subnet_id, "vpc-0demo", zone);
    }
    aws
}

/// Controller Deployment as the chart would create it
pub fn controller_deployment(namespace: &str, name: &str, replicas: i64) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name, "namespace": namespace},
        "spec": {
            "replicas": replicas,
            "selector": {"matchLabels": {"app.kubernetes.io/name": name}},
            "template": {
                "metadata": {"labels": {"app.kubernetes.io/name": name}},
                "spec": {
                    "serviceAccountName": name,
                    "containers": [{
                        "name": "controller",
                        "image": "public.ecr.aws/eks/aws-load-balancer-controller:v2.7.2"
                    }]
                }
            }
        }
    })
}

/// Make `helm` installs create the controller Deployment in `kube`
pub fn install_controller_on_upgrade(helm: &MockHelmClient, kube: &MockKubeClient) {
    let kube = kube.clone();
    helm.on_install(move |request: &ReleaseRequest| {
        let deployment = controller_deployment(&request.namespace, &request.name, 2);
        kube.add_object(deployment).unwrap();
    });
}

/// Connector handing out shared mocks
#[derive(Debug, Clone)]
pub struct MockConnector {
    pub aws: MockAwsClient,
    pub kube: MockKubeClient,
    pub helm: MockHelmClient,
    connects: Arc<AtomicU32>,
}

impl MockConnector {
    pub fn new(aws: MockAwsClient, kube: MockKubeClient, helm: MockHelmClient) -> Self {
        Self {
            aws,
            kube,
            helm,
            connects: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Forget recorded mutations of every mock
    pub fn reset_counters(&self) {
        self.aws.reset_counters();
        self.kube.reset_counters();
        self.helm.reset_counters();
    }

    /// Mutations across AWS, Kubernetes and Helm
    pub fn mutation_count(&self) -> usize {
        self.aws.mutation_count() + self.kube.mutation_count() + self.helm.mutation_count()
    }
}

#[async_trait]
impl ClusterConnector for MockConnector {
    fn aws(&self, _region: &str) -> Arc<dyn AwsClientTrait> {
        Arc::new(self.aws.clone())
    }

    async fn connect(&self, _cluster: &ClusterSpec) -> Result<ClusterSession, ProvisionerError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(ClusterSession {
            kube: Arc::new(self.kube.clone()),
            helm: Arc::new(self.helm.clone()),
        })
    }
}

/// Empty demo account: subnets exist, nothing else does
pub fn demo_environment() -> MockConnector {
    let kube = MockKubeClient::new("demo-cluster");
    let helm = MockHelmClient::new();
    install_controller_on_upgrade(&helm, &kube);
    MockConnector::new(mock_aws_with_demo_subnets(), kube, helm)
}
