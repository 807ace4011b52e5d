//! Object identity and JSON merge patches

use crate::error::KubeClientError;
use serde_json::Value;
use std::fmt;

/// apiVersion, kind, namespace and name of an object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// Identity of a JSON object
    pub fn from_object(object: &Value) -> Result<Self, KubeClientError> {
        let field = |pointer: &str| {
            object
                .pointer(pointer)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| KubeClientError::InvalidObject(format!("missing {}", pointer)))
        };
        Ok(Self {
            api_version: field("/apiVersion")?.to_string(),
            kind: field("/kind")?.to_string(),
            namespace: object
                .pointer("/metadata/namespace")
                .and_then(Value::as_str)
                .map(str::to_string),
            name: field("/metadata/name")?.to_string(),
        })
    }

    /// `(group, version)`; the core group is empty
    pub fn group_version(&self) -> (&str, &str) {
        self.api_version
            .split_once('/')
            .unwrap_or(("", self.api_version.as_str()))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Apply an RFC 7386 JSON merge patch to `target`
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_from_object() {
        let key = ObjectKey::from_object(&json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "nginx", "namespace": "default"}
        }))
        .unwrap();
        assert_eq!(key.group_version(), ("apps", "v1"));
        assert_eq!(key.to_string(), "Deployment default/nginx");

        let core = ObjectKey::new("v1", "Namespace", None, "demo");
        assert_eq!(core.group_version(), ("", "v1"));
    }

    #[test]
    fn test_key_requires_name() {
        let result = ObjectKey::from_object(&json!({"apiVersion": "v1", "kind": "Service", "metadata": {}}));
        assert!(matches!(result, Err(KubeClientError::InvalidObject(_))));
    }

    #[test]
    fn test_merge_patch_rfc7386() {
        let mut target = json!({"a": "b", "c": {"d": "e", "f": "g"}, "list": [1, 2]});
        merge_patch(&mut target, &json!({"a": "z", "c": {"f": null}, "list": [3]}));
        assert_eq!(target, json!({"a": "z", "c": {"d": "e"}, "list": [3]}));
    }
}
