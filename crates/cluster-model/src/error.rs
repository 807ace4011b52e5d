//! Desired-state model errors

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, validating or rendering desired state
#[derive(Debug, Error)]
pub enum ModelError {
    /// Spec file could not be read
    #[error("failed to read {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Spec file or manifest is not valid YAML for the model
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON conversion of a rendered object failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// One or more validation rules were violated
    #[error("invalid desired state: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// A manifest is missing its identity fields
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
}

impl ModelError {
    /// Build a validation error from a single message
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }
}
