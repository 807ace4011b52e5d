//! Provisioner error types.
//!
//! Client errors are classified as they cross into the provisioner: each
//! `From` conversion decides whether a failure is worth retrying, is a
//! permission problem, or is fatal. The class drives retries and the
//! process exit code.

use aws_client::AwsError;
use cluster_model::ModelError;
use helm_client::HelmError;
use kube_client::KubeClientError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Coarse error category, one per exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    Validation,
    Conflict,
    Permission,
    Timeout,
    NotConverged,
    Transient,
    Cancelled,
    Other,
}

impl ErrorClass {
    /// Process exit code for a run that failed with this class
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Validation => 2,
            Self::Conflict => 3,
            Self::Permission => 4,
            Self::Timeout => 5,
            Self::NotConverged => 6,
            Self::Transient => 7,
            Self::Cancelled => 130,
            Self::Other => 1,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Permission => "permission",
            Self::Timeout => "timeout",
            Self::NotConverged => "not-converged",
            Self::Transient => "transient",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Errors that can occur while provisioning a cluster.
#[derive(Debug, Error)]
pub enum ProvisionerError {
    /// Desired state failed validation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Invalid runtime configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Live resource diverges from the desired state in a way that cannot be patched
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Create raced with another writer or a name is taken
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Caller is not allowed to perform an operation; the message is the provider's own text
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Subnets are not in the target region
    #[error("Region mismatch: {0}")]
    RegionMismatch(String),

    /// Subnets span several VPCs or differ from the declared VPC
    #[error("VPC mismatch: {0}")]
    VpcMismatch(String),

    /// A bounded wait expired
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Load balancer controller never became healthy
    #[error("Controller not ready: {0}")]
    ControllerNotReady(String),

    /// Verify mode found work that an apply would do
    #[error("Not converged: {0}")]
    NotConverged(String),

    /// Throttling or a service fault; retried with backoff
    #[error("Transient error: {0}")]
    Transient(String),

    /// Run interrupted
    #[error("Cancelled")]
    Cancelled,

    /// AWS error without a more specific class
    #[error("AWS error: {0}")]
    Aws(AwsError),

    /// Kubernetes API error without a more specific class
    #[error("Kubernetes error: {0}")]
    Kube(KubeClientError),

    /// Helm error without a more specific class
    #[error("Helm error: {0}")]
    Helm(HelmError),

    /// IAM policy document could not be loaded
    #[error("Policy document error: {0}")]
    PolicyDocument(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A cluster run ended without producing a report
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProvisionerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) | Self::InvalidConfig(_) | Self::RegionMismatch(_) | Self::VpcMismatch(_) => {
                ErrorClass::Validation
            }
            Self::Conflict(_) | Self::AlreadyExists(_) => ErrorClass::Conflict,
            Self::Permission(_) => ErrorClass::Permission,
            Self::Timeout(_) | Self::ControllerNotReady(_) => ErrorClass::Timeout,
            Self::NotConverged(_) => ErrorClass::NotConverged,
            Self::Transient(_) => ErrorClass::Transient,
            Self::Cancelled => ErrorClass::Cancelled,
            Self::Aws(_) | Self::Kube(_) | Self::Helm(_) | Self::PolicyDocument(_) | Self::Serialization(_) | Self::Internal(_) => {
                ErrorClass::Other
            }
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.class().exit_code()
    }

    /// Retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

impl From<AwsError> for ProvisionerError {
    fn from(error: AwsError) -> Self {
        if error.is_transient() {
            Self::Transient(error.to_string())
        } else if error.is_permission() {
            Self::Permission(error.to_string())
        } else if error.is_already_exists() {
            Self::AlreadyExists(error.to_string())
        } else {
            Self::Aws(error)
        }
    }
}

impl From<KubeClientError> for ProvisionerError {
    fn from(error: KubeClientError) -> Self {
        if error.is_transient() {
            Self::Transient(error.to_string())
        } else if error.is_forbidden() {
            Self::Permission(error.to_string())
        } else if error.is_conflict() {
            Self::AlreadyExists(error.to_string())
        } else {
            Self::Kube(error)
        }
    }
}

impl From<HelmError> for ProvisionerError {
    fn from(error: HelmError) -> Self {
        if error.is_transient() {
            Self::Transient(error.to_string())
        } else {
            Self::Helm(error)
        }
    }
}

impl From<ModelError> for ProvisionerError {
    fn from(error: ModelError) -> Self {
        Self::Validation(error.to_string())
    }
}

impl From<reqwest::Error> for ProvisionerError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() {
            Self::Transient(format!("policy download: {}", error))
        } else {
            Self::PolicyDocument(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttling_classified_transient() {
        let err = ProvisionerError::from(AwsError::from_code("Throttling", "CreatePolicy", "Rate exceeded"));
        assert!(err.is_transient());
        assert_eq!(err.exit_code(), 7);
    }

    #[test]
    fn test_access_denied_keeps_aws_message() {
        let err = ProvisionerError::from(AwsError::from_code(
            "AccessDenied",
            "CreateRole",
            "User: arn:aws:iam::111122223333:user/ci is not authorized to perform: iam:CreateRole",
        ));
        assert_eq!(err.class(), ErrorClass::Permission);
        assert!(err.to_string().contains("is not authorized to perform: iam:CreateRole"));
    }

    #[test]
    fn test_kube_conflict_is_already_exists() {
        let err = ProvisionerError::from(KubeClientError::Api {
            code: 409,
            reason: "AlreadyExists".to_string(),
            message: "exists".to_string(),
        });
        assert!(err.is_already_exists());
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ProvisionerError::Validation("x".to_string()).exit_code(), 2);
        assert_eq!(ProvisionerError::VpcMismatch("x".to_string()).exit_code(), 2);
        assert_eq!(ProvisionerError::ControllerNotReady("x".to_string()).exit_code(), 5);
        assert_eq!(ProvisionerError::NotConverged("x".to_string()).exit_code(), 6);
        assert_eq!(ProvisionerError::Cancelled.exit_code(), 130);
        assert_eq!(
            ProvisionerError::Helm(HelmError::Spawn("helm: not found".to_string())).exit_code(),
            1
        );
    }
}
