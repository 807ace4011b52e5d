//! HelmClient trait for mocking

use crate::error::HelmError;
use crate::models::{HelmRelease, ReleaseRequest, ReleaseRevision};

/// Trait for Helm release operations
#[async_trait::async_trait]
pub trait HelmClientTrait: Send + Sync {
    /// `helm repo add --force-update` followed by `helm repo update <name>`
    async fn add_repo(&self, name: &str, url: &str) -> Result<(), HelmError>;

    /// Current release, `None` when never installed or uninstalled
    async fn get_release(&self, name: &str, namespace: &str) -> Result<Option<HelmRelease>, HelmError>;

    /// Revision history, oldest first; empty when the release does not exist
    async fn revisions(&self, name: &str, namespace: &str) -> Result<Vec<ReleaseRevision>, HelmError>;

    /// `helm upgrade --install`
    async fn upgrade_install(&self, request: &ReleaseRequest) -> Result<HelmRelease, HelmError>;

    /// `helm rollback <name> <revision>`
    async fn rollback(&self, name: &str, namespace: &str, revision: u32) -> Result<(), HelmError>;

    /// `helm uninstall`; a missing release is not an error
    async fn uninstall(&self, name: &str, namespace: &str) -> Result<(), HelmError>;
}
