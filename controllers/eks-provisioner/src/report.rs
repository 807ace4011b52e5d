//! Run reports
//!
//! Every run produces a `RunReport`: one entry per stage with its duration,
//! the per-resource outcome and any warnings. Reports serialize to JSON for
//! `--report-file`.

use crate::error::{ErrorClass, ProvisionerError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Outcome for a single resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceStatus {
    Created,
    Updated,
    Unchanged,
    Error,
    RolledBack,
}

impl ResourceStatus {
    /// Whether this outcome involved a mutating call
    pub fn is_mutation(self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::RolledBack)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Error => "error",
            Self::RolledBack => "rolled-back",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceReport {
    pub kind: String,
    pub name: String,
    pub status: ResourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Collects resource outcomes and warnings while a stage runs
#[derive(Debug, Default)]
pub struct StageRecorder {
    pub resources: Vec<ResourceReport>,
    pub warnings: Vec<String>,
}

impl StageRecorder {
    pub fn record(&mut self, kind: &str, name: &str, status: ResourceStatus) {
        self.push(kind, name, status, None);
    }

    pub fn record_with_message(&mut self, kind: &str, name: &str, status: ResourceStatus, message: impl Into<String>) {
        self.push(kind, name, status, Some(message.into()));
    }

    fn push(&mut self, kind: &str, name: &str, status: ResourceStatus, message: Option<String>) {
        self.resources.push(ResourceReport {
            kind: kind.to_string(),
            name: name.to_string(),
            status,
            message,
        });
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Last recorded status for a resource
    pub fn status_of(&self, kind: &str, name: &str) -> Option<ResourceStatus> {
        self.resources
            .iter()
            .rev()
            .find(|r| r.kind == kind && r.name == name)
            .map(|r| r.status)
    }

    /// Replace the status of an already recorded resource
    pub fn set_status(&mut self, kind: &str, name: &str, status: ResourceStatus) {
        if let Some(report) = self
            .resources
            .iter_mut()
            .rev()
            .find(|r| r.kind == kind && r.name == name)
        {
            report.status = status;
        }
    }

    /// Attach a message to an already recorded resource
    pub fn set_message(&mut self, kind: &str, name: &str, message: impl Into<String>) {
        if let Some(report) = self
            .resources
            .iter_mut()
            .rev()
            .find(|r| r.kind == kind && r.name == name)
        {
            report.message = Some(message.into());
        }
    }
}

/// Driver stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Validate,
    AwsReconcile,
    CoreWorkload,
    ControllerInstall,
    Ingress,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validate => "validate",
            Self::AwsReconcile => "aws-reconcile",
            Self::CoreWorkload => "core-workload",
            Self::ControllerInstall => "controller-install",
            Self::Ingress => "ingress",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub resources: Vec<ResourceReport>,
    pub warnings: Vec<String>,
}

/// The error a run stopped on
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedError {
    pub stage: Stage,
    pub class: ErrorClass,
    pub exit_code: u8,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub cluster: String,
    pub region: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<StageReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportedError>,
}

impl RunReport {
    pub fn new(run_id: Uuid, cluster: &str, region: &str) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            cluster: cluster.to_string(),
            region: region.to_string(),
            started_at: now,
            finished_at: now,
            stages: Vec::new(),
            error: None,
        }
    }

    pub fn fail(&mut self, stage: Stage, error: &ProvisionerError) {
        self.error = Some(ReportedError {
            stage,
            class: error.class(),
            exit_code: error.exit_code(),
            message: error.to_string(),
        });
    }

    pub fn converged(&self) -> bool {
        self.error.is_none()
    }

    pub fn exit_code(&self) -> u8 {
        self.error.as_ref().map_or(0, |e| e.exit_code)
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Every resource of every stage
    pub fn resources(&self) -> impl Iterator<Item = &ResourceReport> {
        self.stages.iter().flat_map(|s| s.resources.iter())
    }

    /// Resources whose outcome involved a mutating call
    pub fn mutation_count(&self) -> usize {
        self.resources().filter(|r| r.status.is_mutation()).count()
    }
}
