//! Kubernetes manifests as untyped JSON objects
//!
//! Rendered workloads and raw `manifestFiles` both end up as `Manifest`
//! values, which is all the Kubernetes reconciler needs.

use crate::error::ModelError;
use serde::Deserialize;
use serde_json::Value;

/// Kinds that are not namespaced
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "StorageClass",
    "IngressClass",
    "PersistentVolume",
    "PriorityClass",
];

/// A Kubernetes object with validated identity fields
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    value: Value,
}

impl Manifest {
    /// Wrap an object; `apiVersion`, `kind` and `metadata.name` are required
    pub fn new(value: Value) -> Result<Self, ModelError> {
        for (pointer, field) in [("/apiVersion", "apiVersion"), ("/kind", "kind"), ("/metadata/name", "metadata.name")] {
            match value.pointer(pointer).and_then(Value::as_str) {
                Some(s) if !s.is_empty() => {}
                _ => {
                    return Err(ModelError::InvalidManifest(format!(
                        "object is missing {}",
                        field
                    )));
                }
            }
        }
        Ok(Self { value })
    }

    pub fn api_version(&self) -> &str {
        self.str_at("/apiVersion")
    }

    pub fn kind(&self) -> &str {
        self.str_at("/kind")
    }

    pub fn name(&self) -> &str {
        self.str_at("/metadata/name")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.value.pointer("/metadata/namespace").and_then(Value::as_str)
    }

    pub fn is_namespaced(&self) -> bool {
        !CLUSTER_SCOPED_KINDS.contains(&self.kind())
    }

    /// Fill in `metadata.namespace` for namespaced kinds that omit it
    pub fn with_default_namespace(mut self, namespace: &str) -> Self {
        if self.is_namespaced() && self.namespace().is_none() {
            if let Some(metadata) = self.value.get_mut("metadata").and_then(Value::as_object_mut) {
                metadata.insert("namespace".to_string(), Value::String(namespace.to_string()));
            }
        }
        self
    }

    /// `Kind namespace/name` for log lines
    pub fn display_name(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{} {}/{}", self.kind(), ns, self.name()),
            None => format!("{} {}", self.kind(), self.name()),
        }
    }

    /// Apply order: prerequisites first, routing last
    pub fn apply_priority(&self) -> u8 {
        match self.kind() {
            "Namespace" => 0,
            "CustomResourceDefinition" => 1,
            "ServiceAccount" => 2,
            "ClusterRole" | "Role" => 3,
            "ClusterRoleBinding" | "RoleBinding" => 4,
            "ConfigMap" | "Secret" => 5,
            "Service" => 6,
            "Deployment" | "StatefulSet" | "DaemonSet" => 7,
            "Ingress" => 9,
            _ => 8,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    fn str_at(&self, pointer: &str) -> &str {
        self.value.pointer(pointer).and_then(Value::as_str).unwrap_or_default()
    }
}

/// Parse a multi-document YAML stream; empty documents are skipped and `List` objects flattened
pub fn parse_documents(yaml: &str) -> Result<Vec<Manifest>, ModelError> {
    let mut manifests = Vec::new();
    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        if value.get("kind").and_then(Value::as_str) == Some("List") {
            if let Some(items) = value.get("items").and_then(Value::as_array) {
                for item in items {
                    manifests.push(Manifest::new(item.clone())?);
                }
            }
            continue;
        }
        manifests.push(Manifest::new(value)?);
    }
    Ok(manifests)
}

/// Stable sort by apply priority
pub fn sort_for_apply(manifests: &mut [Manifest]) {
    manifests.sort_by_key(Manifest::apply_priority);
}
