//! KubeClient trait for mocking

use crate::error::KubeClientError;
use crate::object::ObjectKey;
use serde_json::Value;

/// Trait for untyped Kubernetes object operations
///
/// Objects travel as JSON so any kind can be reconciled without a typed
/// binding. `get` returns `Ok(None)` for a missing object.
#[async_trait::async_trait]
pub trait KubeClientTrait: Send + Sync {
    /// Context or cluster the client talks to (for log lines)
    fn context(&self) -> &str;

    async fn get(&self, key: &ObjectKey) -> Result<Option<Value>, KubeClientError>;

    async fn create(&self, object: &Value) -> Result<Value, KubeClientError>;

    /// JSON merge patch (`application/merge-patch+json`)
    async fn patch(&self, key: &ObjectKey, patch: &Value) -> Result<Value, KubeClientError>;

    async fn delete(&self, key: &ObjectKey) -> Result<(), KubeClientError>;
}
