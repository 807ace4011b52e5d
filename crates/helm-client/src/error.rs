//! Helm client errors

use thiserror::Error;

/// stderr fragments of failures worth retrying
const TRANSIENT_MARKERS: &[&str] = &[
    "i/o timeout",
    "connection refused",
    "connection reset by peer",
    "TLS handshake timeout",
    "the server is currently unable to handle the request",
    "etcdserver: request timed out",
    "another operation (install/upgrade/rollback) is in progress",
];

#[derive(Debug, Error)]
pub enum HelmError {
    /// helm could not be started
    #[error("failed to run helm: {0}")]
    Spawn(String),

    /// helm exited non-zero
    #[error("helm {command} failed: {stderr}")]
    Failed { command: String, stderr: String },

    #[error("helm {command} timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HelmError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Failed { stderr, .. } => TRANSIENT_MARKERS.iter().any(|m| stderr.contains(m)),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    pub fn is_release_not_found(&self) -> bool {
        matches!(self, Self::Failed { stderr, .. } if stderr.contains("release: not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> HelmError {
        HelmError::Failed {
            command: "status".to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_not_found() {
        assert!(failed("Error: release: not found").is_release_not_found());
        assert!(!failed("Error: release: not found").is_transient());
    }

    #[test]
    fn test_transient() {
        assert!(failed("Error: Kubernetes cluster unreachable: dial tcp 10.0.0.1:443: i/o timeout").is_transient());
        assert!(!failed("Error: INSTALLATION FAILED: chart not found").is_transient());
    }
}
