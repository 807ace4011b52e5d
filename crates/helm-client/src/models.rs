//! Helm release models

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    Deployed,
    Failed,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
    Superseded,
    Uninstalling,
    Uninstalled,
    #[serde(other)]
    Unknown,
}

impl ReleaseStatus {
    pub fn is_pending(self) -> bool {
        matches!(self, Self::PendingInstall | Self::PendingUpgrade | Self::PendingRollback)
    }
}

/// Observed state of a release
#[derive(Debug, Clone, PartialEq)]
pub struct HelmRelease {
    pub name: String,
    pub namespace: String,
    /// Release revision, incremented by every upgrade and rollback
    pub revision: u32,
    pub status: ReleaseStatus,
    pub chart_name: String,
    pub chart_version: String,
    pub app_version: Option<String>,
    /// User-supplied values
    pub values: Value,
}

/// One entry of `helm history`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseRevision {
    pub revision: u32,
    pub status: ReleaseStatus,
    /// `<chart>-<version>`
    #[serde(default)]
    pub chart: String,
    #[serde(default)]
    pub description: String,
}

/// `helm upgrade --install` arguments
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseRequest {
    pub name: String,
    pub namespace: String,
    /// `<repo>/<chart>`
    pub chart: String,
    pub version: Option<String>,
    pub values: Value,
    /// Passed to helm as `--wait --timeout`
    pub wait_timeout: Option<Duration>,
}

/// Subset of `helm status -o json`
#[derive(Debug, Deserialize)]
pub(crate) struct StatusOutput {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub version: u32,
    pub info: StatusInfo,
    #[serde(default)]
    pub chart: Option<ChartOutput>,
    #[serde(default)]
    pub config: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusInfo {
    pub status: ReleaseStatus,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChartOutput {
    pub metadata: ChartMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChartMetadata {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub app_version: Option<String>,
}

impl From<StatusOutput> for HelmRelease {
    fn from(output: StatusOutput) -> Self {
        let (chart_name, chart_version, app_version) = match output.chart {
            Some(chart) => (chart.metadata.name, chart.metadata.version, chart.metadata.app_version),
            None => (String::new(), String::new(), None),
        };
        Self {
            name: output.name,
            namespace: output.namespace,
            revision: output.version,
            status: output.info.status,
            chart_name,
            chart_version,
            app_version,
            values: output.config.unwrap_or(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_output() {
        let output: StatusOutput = serde_json::from_value(json!({
            "name": "aws-load-balancer-controller",
            "namespace": "kube-system",
            "version": 2,
            "info": {"status": "deployed", "description": "Upgrade complete"},
            "chart": {"metadata": {"name": "aws-load-balancer-controller", "version": "1.7.2", "appVersion": "v2.7.2"}},
            "config": {"clusterName": "demo-cluster"}
        }))
        .unwrap();
        let release = HelmRelease::from(output);
        assert_eq!(release.revision, 2);
        assert_eq!(release.status, ReleaseStatus::Deployed);
        assert_eq!(release.chart_version, "1.7.2");
        assert_eq!(release.values["clusterName"], "demo-cluster");
    }

    #[test]
    fn test_history_output() {
        let history: Vec<ReleaseRevision> = serde_json::from_value(json!([
            {"revision": 1, "updated": "2024-01-01T00:00:00Z", "status": "superseded", "chart": "aws-load-balancer-controller-1.7.1", "app_version": "v2.7.1", "description": "Install complete"},
            {"revision": 2, "updated": "2024-02-01T00:00:00Z", "status": "pending-upgrade", "chart": "aws-load-balancer-controller-1.7.2", "app_version": "v2.7.2", "description": "Preparing upgrade"}
        ]))
        .unwrap();
        assert_eq!(history[0].status, ReleaseStatus::Superseded);
        assert!(history[1].status.is_pending());
        assert_eq!(history[1].chart, "aws-load-balancer-controller-1.7.2");
    }

    #[test]
    fn test_pending_status() {
        let status: ReleaseStatus = serde_json::from_value(json!("pending-upgrade")).unwrap();
        assert!(status.is_pending());
    }
}
