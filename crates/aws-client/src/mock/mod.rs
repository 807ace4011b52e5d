//! Mock AwsClient for unit testing
//!
//! In-memory implementation of `AwsClientTrait`. Resources created through
//! the mock start in `CREATING` and turn `ACTIVE` after a configurable number
//! of describe calls, so wait loops are exercised.
//!
//! The mock is organized by service:
//! - `eks.rs` - clusters, Fargate profiles, node groups
//! - `iam.rs` - roles, policies, OIDC providers, caller identity, subnets

mod eks;
mod iam;

use crate::aws_trait::AwsClientTrait;
use crate::error::AwsError;
use crate::models::*;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Failure the mock returns instead of running an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Throttle,
    Unavailable,
    AccessDenied,
}

impl FaultKind {
    fn to_error(self, operation: &str) -> AwsError {
        match self {
            Self::Throttle => AwsError::from_code("Throttling", operation, "Rate exceeded"),
            Self::Unavailable => AwsError::from_code("ServiceUnavailable", operation, "Service unavailable"),
            Self::AccessDenied => AwsError::from_code(
                "AccessDenied",
                operation,
                &format!("User: arn:aws:iam::111122223333:user/test is not authorized to perform: {}", operation),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    kind: FaultKind,
    remaining: u32,
}

/// Mock AwsClient for testing
///
/// Clones share state, so a test can keep a handle for assertions while the
/// code under test owns another.
#[derive(Debug, Clone)]
pub struct MockAwsClient {
    pub(crate) region: String,
    pub(crate) account_id: String,
    pub(crate) subnets: Arc<Mutex<HashMap<String, Subnet>>>,
    pub(crate) clusters: Arc<Mutex<HashMap<String, EksCluster>>>,
    pub(crate) roles: Arc<Mutex<HashMap<String, IamRole>>>,
    pub(crate) attachments: Arc<Mutex<HashMap<String, Vec<AttachedPolicy>>>>,
    pub(crate) policies: Arc<Mutex<HashMap<String, IamPolicy>>>,
    pub(crate) policy_documents: Arc<Mutex<HashMap<String, Value>>>,
    pub(crate) oidc_providers: Arc<Mutex<Vec<OidcProvider>>>,
    pub(crate) fargate_profiles: Arc<Mutex<HashMap<(String, String), FargateProfile>>>,
    pub(crate) nodegroups: Arc<Mutex<HashMap<(String, String), Nodegroup>>>,
    // Describe calls left before a resource turns ACTIVE, keyed by resource path
    pub(crate) pending: Arc<Mutex<HashMap<String, u32>>>,
    pub(crate) activation_polls: Arc<Mutex<u32>>,
    faults: Arc<Mutex<HashMap<String, Fault>>>,
    calls: Arc<Mutex<HashMap<String, u32>>>,
    mutations: Arc<Mutex<Vec<String>>>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockAwsClient {
    /// Create an empty mock for a region
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: "111122223333".to_string(),
            subnets: Arc::new(Mutex::new(HashMap::new())),
            clusters: Arc::new(Mutex::new(HashMap::new())),
            roles: Arc::new(Mutex::new(HashMap::new())),
            attachments: Arc::new(Mutex::new(HashMap::new())),
            policies: Arc::new(Mutex::new(HashMap::new())),
            policy_documents: Arc::new(Mutex::new(HashMap::new())),
            oidc_providers: Arc::new(Mutex::new(Vec::new())),
            fargate_profiles: Arc::new(Mutex::new(HashMap::new())),
            nodegroups: Arc::new(Mutex::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            activation_polls: Arc::new(Mutex::new(1)),
            faults: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(HashMap::new())),
            mutations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Number of describe calls a new resource stays in `CREATING` (default 1)
    pub fn set_activation_polls(&self, polls: u32) {
        *lock(&self.activation_polls) = polls;
    }

    /// Add a subnet to the mock store (for test setup)
    pub fn add_subnet(&self, subnet_id: &str, vpc_id: &str, availability_zone: &str) {
        lock(&self.subnets).insert(
            subnet_id.to_string(),
            Subnet {
                subnet_id: subnet_id.to_string(),
                vpc_id: vpc_id.to_string(),
                availability_zone: availability_zone.to_string(),
            },
        );
    }

    /// Add an existing cluster (for test setup)
    pub fn add_cluster(&self, cluster: EksCluster) {
        lock(&self.clusters).insert(cluster.name.clone(), cluster);
    }

    /// Add an existing role (for test setup)
    pub fn add_role(&self, role: IamRole) {
        lock(&self.roles).insert(role.role_name.clone(), role);
    }

    /// Add an existing Fargate profile (for test setup)
    pub fn add_fargate_profile(&self, cluster_name: &str, profile: FargateProfile) {
        lock(&self.fargate_profiles).insert(
            (cluster_name.to_string(), profile.fargate_profile_name.clone()),
            profile,
        );
    }

    /// Add an existing node group (for test setup)
    pub fn add_nodegroup(&self, cluster_name: &str, nodegroup: Nodegroup) {
        lock(&self.nodegroups).insert(
            (cluster_name.to_string(), nodegroup.nodegroup_name.clone()),
            nodegroup,
        );
    }

    /// Make the next `times` calls of `operation` (e.g. `CreatePolicy`) fail
    pub fn inject_fault(&self, operation: &str, kind: FaultKind, times: u32) {
        lock(&self.faults).insert(operation.to_string(), Fault { kind, remaining: times });
    }

    /// Calls made to `operation`, including failed ones
    pub fn call_count(&self, operation: &str) -> u32 {
        lock(&self.calls).get(operation).copied().unwrap_or(0)
    }

    /// Successful mutating calls, in order
    pub fn mutations(&self) -> Vec<String> {
        lock(&self.mutations).clone()
    }

    pub fn mutation_count(&self) -> usize {
        lock(&self.mutations).len()
    }

    /// Forget recorded calls and mutations, keeping stored resources
    pub fn reset_counters(&self) {
        lock(&self.calls).clear();
        lock(&self.mutations).clear();
    }

    /// Policy document stored by `CreatePolicy`
    pub fn policy_document(&self, policy_name: &str) -> Option<Value> {
        lock(&self.policy_documents).get(policy_name).cloned()
    }

    /// Record a call and return an injected fault, if any
    pub(crate) fn enter(&self, operation: &str) -> Result<(), AwsError> {
        *lock(&self.calls).entry(operation.to_string()).or_insert(0) += 1;
        let mut faults = lock(&self.faults);
        if let Some(fault) = faults.get_mut(operation) {
            if fault.remaining > 0 {
                fault.remaining -= 1;
                return Err(fault.kind.to_error(operation));
            }
        }
        Ok(())
    }

    pub(crate) fn record_mutation(&self, operation: &str, target: &str) {
        lock(&self.mutations).push(format!("{} {}", operation, target));
    }

    pub(crate) fn mark_pending(&self, key: String) {
        let polls = *lock(&self.activation_polls);
        lock(&self.pending).insert(key, polls);
    }

    /// Count down a pending resource; true once it should report ACTIVE
    pub(crate) fn poll_pending(&self, key: &str) -> bool {
        let mut pending = lock(&self.pending);
        match pending.get_mut(key) {
            Some(left) if *left > 1 => {
                *left -= 1;
                false
            }
            Some(_) => {
                pending.remove(key);
                true
            }
            None => true,
        }
    }

    pub(crate) fn arn(&self, service: &str, resource: &str) -> String {
        match service {
            "iam" => format!("arn:aws:iam::{}:{}", self.account_id, resource),
            _ => format!("arn:aws:{}:{}:{}:{}", service, self.region, self.account_id, resource),
        }
    }
}

#[async_trait::async_trait]
impl AwsClientTrait for MockAwsClient {
    fn region(&self) -> &str {
        &self.region
    }

    async fn get_caller_identity(&self) -> Result<CallerIdentity, AwsError> {
        iam::get_caller_identity(self).await
    }

    async fn describe_subnets(&self, subnet_ids: &[String]) -> Result<Vec<Subnet>, AwsError> {
        iam::describe_subnets(self, subnet_ids).await
    }

    // EKS - delegated to eks module
    async fn describe_cluster(&self, name: &str) -> Result<Option<EksCluster>, AwsError> {
        eks::describe_cluster(self, name).await
    }

    async fn create_cluster(&self, request: &CreateClusterRequest) -> Result<EksCluster, AwsError> {
        eks::create_cluster(self, request).await
    }

    // IAM - delegated to iam module
    async fn get_role(&self, role_name: &str) -> Result<Option<IamRole>, AwsError> {
        iam::get_role(self, role_name).await
    }

    async fn create_role(&self, role_name: &str, trust_policy: &Value, tags: &BTreeMap<String, String>) -> Result<IamRole, AwsError> {
        iam::create_role(self, role_name, trust_policy, tags).await
    }

    async fn list_attached_role_policies(&self, role_name: &str) -> Result<Vec<AttachedPolicy>, AwsError> {
        iam::list_attached_role_policies(self, role_name).await
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), AwsError> {
        iam::attach_role_policy(self, role_name, policy_arn).await
    }

    async fn find_policy(&self, policy_name: &str) -> Result<Option<IamPolicy>, AwsError> {
        iam::find_policy(self, policy_name).await
    }

    async fn create_policy(&self, policy_name: &str, document: &Value) -> Result<IamPolicy, AwsError> {
        iam::create_policy(self, policy_name, document).await
    }

    async fn list_oidc_providers(&self) -> Result<Vec<OidcProvider>, AwsError> {
        iam::list_oidc_providers(self).await
    }

    async fn create_oidc_provider(&self, url: &str, client_ids: &[String]) -> Result<OidcProvider, AwsError> {
        iam::create_oidc_provider(self, url, client_ids).await
    }

    async fn describe_fargate_profile(&self, cluster_name: &str, profile_name: &str) -> Result<Option<FargateProfile>, AwsError> {
        eks::describe_fargate_profile(self, cluster_name, profile_name).await
    }

    async fn create_fargate_profile(&self, request: &CreateFargateProfileRequest) -> Result<FargateProfile, AwsError> {
        eks::create_fargate_profile(self, request).await
    }

    async fn describe_nodegroup(&self, cluster_name: &str, nodegroup_name: &str) -> Result<Option<Nodegroup>, AwsError> {
        eks::describe_nodegroup(self, cluster_name, nodegroup_name).await
    }

    async fn create_nodegroup(&self, request: &CreateNodegroupRequest) -> Result<Nodegroup, AwsError> {
        eks::create_nodegroup(self, request).await
    }

    async fn update_nodegroup_scaling(&self, cluster_name: &str, nodegroup_name: &str, scaling: NodegroupScaling) -> Result<(), AwsError> {
        eks::update_nodegroup_scaling(self, cluster_name, nodegroup_name, scaling).await
    }
}
