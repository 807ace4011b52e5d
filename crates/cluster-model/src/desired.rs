//! DesiredState
//!
//! Root of the spec file: one cluster, its workloads, and the ingress
//! controller release.

use crate::cluster::ClusterSpec;
use crate::error::ModelError;
use crate::manifest::{Manifest, parse_documents, sort_for_apply};
use crate::release::ControllerRelease;
use crate::workload::{IngressManifest, ServiceManifest, WorkloadManifest};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DesiredState {
    pub cluster: ClusterSpec,

    #[serde(default)]
    pub workloads: Vec<WorkloadManifest>,

    #[serde(default)]
    pub services: Vec<ServiceManifest>,

    #[serde(default)]
    pub ingresses: Vec<IngressManifest>,

    /// Raw multi-document YAML files applied with the core workload
    #[serde(default)]
    pub manifest_files: Vec<PathBuf>,

    /// Load balancer controller release (defaults apply when ingresses are declared)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<ControllerRelease>,

    /// Directory relative paths resolve against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl DesiredState {
    /// Parse a spec document; relative paths resolve against the current directory
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ModelError> {
        let mut desired: DesiredState = serde_yaml::from_str(yaml)?;
        desired.cluster.ingress_requested |= !desired.ingresses.is_empty();
        Ok(desired)
    }

    /// Load a spec file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut desired = Self::from_yaml_str(&yaml)?;
        desired.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(desired)
    }

    /// Fill in the cluster name and region from the command line.
    ///
    /// Values present in both places must agree.
    pub fn with_cluster_identity(mut self, name: Option<&str>, region: Option<&str>) -> Result<Self, ModelError> {
        fill_or_match("name", &mut self.cluster.name, name)?;
        fill_or_match("region", &mut self.cluster.region, region)?;
        Ok(self)
    }

    /// Controller release to install, if any
    pub fn controller_release(&self) -> Option<ControllerRelease> {
        match &self.controller {
            Some(release) => Some(release.clone()),
            None if !self.ingresses.is_empty() => Some(ControllerRelease::default()),
            None => None,
        }
    }

    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Validate the whole document, reporting every problem
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut problems = match self.cluster.validate() {
            Ok(()) => Vec::new(),
            Err(ModelError::Validation(problems)) => problems,
            Err(other) => return Err(other),
        };

        let mut names = BTreeSet::new();
        for workload in &self.workloads {
            workload.validate(&mut problems);
            if !names.insert(("Deployment", &workload.namespace, &workload.name)) {
                problems.push(format!("workload '{}' is declared twice", workload.name));
            }
        }
        for service in &self.services {
            service.validate(&mut problems);
            if !names.insert(("Service", &service.namespace, &service.name)) {
                problems.push(format!("service '{}' is declared twice", service.name));
            }
        }
        for ingress in &self.ingresses {
            ingress.validate(&mut problems);
            if !names.insert(("Ingress", &ingress.namespace, &ingress.name)) {
                problems.push(format!("ingress '{}' is declared twice", ingress.name));
            }
            for rule in &ingress.rules {
                let declared = self
                    .services
                    .iter()
                    .any(|s| s.name == rule.service_name && s.namespace == ingress.namespace);
                if !self.services.is_empty() && !declared {
                    problems.push(format!(
                        "ingress '{}' routes to undeclared service '{}'",
                        ingress.name, rule.service_name
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ModelError::Validation(problems))
        }
    }

    /// Deployments, Services and raw manifests, in apply order
    pub fn core_manifests(&self) -> Result<Vec<Manifest>, ModelError> {
        let mut manifests = Vec::new();
        for path in &self.manifest_files {
            let resolved = self.resolve_path(path);
            let yaml = std::fs::read_to_string(&resolved).map_err(|source| ModelError::Io {
                path: resolved.clone(),
                source,
            })?;
            for manifest in parse_documents(&yaml)? {
                manifests.push(manifest.with_default_namespace("default"));
            }
        }
        for service in &self.services {
            manifests.push(service.render()?);
        }
        for workload in &self.workloads {
            manifests.push(workload.render()?);
        }
        sort_for_apply(&mut manifests);
        Ok(manifests)
    }

    /// Ingress objects, applied once the controller is ready
    pub fn ingress_manifests(&self) -> Result<Vec<Manifest>, ModelError> {
        self.ingresses.iter().map(IngressManifest::render).collect()
    }
}

fn fill_or_match(field: &str, current: &mut String, given: Option<&str>) -> Result<(), ModelError> {
    match given {
        Some(value) if current.is_empty() => {
            *current = value.to_string();
            Ok(())
        }
        Some(value) if current != value => Err(ModelError::invalid(format!(
            "cluster {} '{}' on the command line does not match '{}' in the spec file",
            field, value, current
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMO: &str = include_str!("../../../demos/demo-cluster.yaml");

    #[test]
    fn test_demo_spec_parses_and_validates() {
        let desired = DesiredState::from_yaml_str(DEMO).unwrap();
        assert!(desired.cluster.ingress_requested);
        desired.validate().unwrap();
        assert_eq!(desired.workloads[0].replicas, 3);
        assert!(desired.controller_release().is_some());
    }

    #[test]
    fn test_identity_filled_from_cli() {
        let yaml = "cluster:\n  subnets:\n    private: [subnet-a]\n";
        let desired = DesiredState::from_yaml_str(yaml)
            .unwrap()
            .with_cluster_identity(Some("demo-cluster"), Some("us-east-1"))
            .unwrap();
        assert_eq!(desired.cluster.key(), "us-east-1/demo-cluster");
        assert!(desired.controller_release().is_none());
    }

    #[test]
    fn test_identity_mismatch_rejected() {
        let desired = DesiredState::from_yaml_str(DEMO).unwrap();
        assert!(desired.with_cluster_identity(Some("other"), None).is_err());
    }

    #[test]
    fn test_core_manifests_order() {
        let desired = DesiredState::from_yaml_str(DEMO).unwrap();
        let manifests = desired.core_manifests().unwrap();
        let kinds: Vec<&str> = manifests.iter().map(Manifest::kind).collect();
        assert_eq!(kinds, vec!["Service", "Deployment"]);
        assert_eq!(desired.ingress_manifests().unwrap().len(), 1);
    }

    #[test]
    fn test_ingress_to_undeclared_service_rejected() {
        let mut desired = DesiredState::from_yaml_str(DEMO).unwrap();
        desired.ingresses[0].rules[0].service_name = "missing".to_string();
        assert!(desired.validate().is_err());
    }
}
