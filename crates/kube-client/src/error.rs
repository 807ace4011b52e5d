//! Kubernetes client errors

use thiserror::Error;

/// Errors that can occur when talking to the Kubernetes API
#[derive(Debug, Error)]
pub enum KubeClientError {
    /// API server rejected the request
    #[error("Kubernetes API error {code} ({reason}): {message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },

    /// Transport or client-side failure
    #[error("Kubernetes client error: {0}")]
    Client(#[source] kube::Error),

    /// Kubeconfig could not be loaded or has no usable context
    #[error("kubeconfig error: {0}")]
    Config(String),

    /// Object lacks identity fields
    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<kube::Error> for KubeClientError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(response) => Self::Api {
                code: response.code,
                reason: response.reason.clone(),
                message: response.message.clone(),
            },
            other => Self::Client(other),
        }
    }
}

impl KubeClientError {
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == Some(404)
    }

    /// Optimistic-concurrency conflict or name collision
    pub fn is_conflict(&self) -> bool {
        self.code() == Some(409)
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self.code(), Some(401 | 403))
    }

    /// Retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api { code, .. } => *code == 429 || *code >= 500,
            Self::Client(_) => true,
            _ => false,
        }
    }
}
