//! Three-way merge patch computation
//!
//! Inputs are the last-applied configuration (what this tool wrote last
//! time), the live object (what the API server holds, including defaulted
//! and server-populated fields) and the desired object. The result is a JSON
//! merge patch, or `None` when the live object already satisfies the desired
//! state.

use serde_json::{Map, Value};

/// Annotation holding the last-applied configuration, as `kubectl apply` does
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Compute the merge patch taking `live` to `desired`.
///
/// Fields of `desired` that are missing from or differ in `live` are set.
/// Fields present in `last` but dropped from `desired` are set to `null`.
/// Fields only `live` has (server defaults, status) are left alone.
pub fn three_way_patch(last: Option<&Value>, live: &Value, desired: &Value) -> Option<Value> {
    let empty = Map::new();
    let last = last.and_then(Value::as_object).unwrap_or(&empty);
    match (live.as_object(), desired.as_object()) {
        (Some(live), Some(desired)) => object_patch(last, live, desired).map(Value::Object),
        _ if is_subset(desired, live) => None,
        _ => Some(desired.clone()),
    }
}

fn object_patch(last: &Map<String, Value>, live: &Map<String, Value>, desired: &Map<String, Value>) -> Option<Map<String, Value>> {
    let mut patch = Map::new();

    for (key, want) in desired {
        if want.is_null() {
            continue;
        }
        match live.get(key) {
            None | Some(Value::Null) => {
                patch.insert(key.clone(), want.clone());
            }
            Some(have) => match (have, want) {
                (Value::Object(have), Value::Object(want_map)) => {
                    let empty = Map::new();
                    let last_child = last.get(key).and_then(Value::as_object).unwrap_or(&empty);
                    if let Some(child) = object_patch(last_child, have, want_map) {
                        patch.insert(key.clone(), Value::Object(child));
                    }
                }
                // Arrays are replaced whole, so an element that lost a field
                // since the last apply must be sent again even when live still matches.
                (_, Value::Array(_)) if last.get(key).is_some_and(|applied| applied != want) => {
                    patch.insert(key.clone(), want.clone());
                }
                _ => {
                    if !is_subset(want, have) {
                        patch.insert(key.clone(), want.clone());
                    }
                }
            },
        }
    }

    // Removed since the last apply
    for key in last.keys() {
        if !desired.contains_key(key) && live.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }

    (!patch.is_empty()).then_some(patch)
}

/// Whether `live` satisfies `desired`, ignoring keys only `live` has.
///
/// Arrays must have the same length and match element by element.
pub fn is_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(want), Value::Object(have)) => want.iter().all(|(key, value)| match have.get(key) {
            Some(found) => is_subset(value, found),
            None => value.is_null(),
        }),
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(w, h)| is_subset(w, h))
        }
        (Value::Number(want), Value::Number(have)) => match (want.as_f64(), have.as_f64()) {
            (Some(w), Some(h)) => w == h,
            _ => want == have,
        },
        _ => desired == live,
    }
}

/// Last-applied configuration recorded on a live object
pub fn last_applied(live: &Value) -> Option<Value> {
    live.pointer("/metadata/annotations")
        .and_then(|a| a.get(LAST_APPLIED_ANNOTATION))
        .and_then(Value::as_str)
        .and_then(|raw| serde_json::from_str(raw).ok())
}

/// `desired` with its own serialization recorded in the last-applied annotation
pub fn with_last_applied(desired: &Value) -> Result<Value, serde_json::Error> {
    let mut object = desired.clone();
    let recorded = serde_json::to_string(desired)?;
    if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
        let annotations = metadata
            .entry("annotations")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(annotations) = annotations.as_object_mut() {
            annotations.insert(LAST_APPLIED_ANNOTATION.to_string(), Value::String(recorded));
        }
    }
    Ok(object)
}

/// Drop server-populated fields so a live object can be written back
pub fn strip_server_fields(live: &Value) -> Value {
    let mut object = live.clone();
    if let Some(map) = object.as_object_mut() {
        map.remove("status");
    }
    if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in ["uid", "resourceVersion", "generation", "creationTimestamp", "managedFields", "selfLink"] {
            metadata.remove(field);
        }
        if let Some(annotations) = metadata.get_mut("annotations").and_then(Value::as_object_mut) {
            annotations.remove(LAST_APPLIED_ANNOTATION);
        }
    }
    object
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment(replicas: i64) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "nginx-deployment", "namespace": "default", "labels": {"app": "nginx"}},
            "spec": {
                "replicas": replicas,
                "template": {"spec": {"containers": [{"name": "nginx", "image": "nginx:1.23", "ports": [{"containerPort": 80}]}]}}
            }
        })
    }

    fn live_from(desired: &Value) -> Value {
        let mut live = with_last_applied(desired).unwrap();
        live["metadata"]["uid"] = json!("abc");
        live["metadata"]["resourceVersion"] = json!("7");
        live["spec"]["progressDeadlineSeconds"] = json!(600);
        live["spec"]["template"]["spec"]["containers"][0]["imagePullPolicy"] = json!("IfNotPresent");
        live["spec"]["template"]["spec"]["containers"][0]["ports"][0]["protocol"] = json!("TCP");
        live["status"] = json!({"availableReplicas": 3});
        live
    }

    #[test]
    fn test_server_defaults_do_not_cause_a_patch() {
        let desired = deployment(3);
        let live = live_from(&desired);
        assert_eq!(three_way_patch(last_applied(&live).as_ref(), &live, &desired), None);
    }

    #[test]
    fn test_changed_scalar_is_patched() {
        let live = live_from(&deployment(3));
        let desired = deployment(5);
        let patch = three_way_patch(last_applied(&live).as_ref(), &live, &desired).unwrap();
        assert_eq!(patch, json!({"spec": {"replicas": 5}}));
    }

    #[test]
    fn test_removed_field_is_nulled() {
        let previous = deployment(3);
        let live = live_from(&previous);
        let mut desired = previous.clone();
        desired["metadata"].as_object_mut().unwrap().remove("labels");

        let patch = three_way_patch(last_applied(&live).as_ref(), &live, &desired).unwrap();
        assert_eq!(patch, json!({"metadata": {"labels": null}}));
    }

    #[test]
    fn test_field_never_applied_is_kept() {
        // Set by someone else; not in last-applied, so not ours to remove
        let desired = deployment(3);
        let mut live = live_from(&desired);
        live["metadata"]["labels"]["team"] = json!("web");
        assert_eq!(three_way_patch(last_applied(&live).as_ref(), &live, &desired), None);
    }

    #[test]
    fn test_changed_array_is_replaced_whole() {
        let live = live_from(&deployment(3));
        let mut desired = deployment(3);
        desired["spec"]["template"]["spec"]["containers"][0]["image"] = json!("nginx:1.25");

        let patch = three_way_patch(last_applied(&live).as_ref(), &live, &desired).unwrap();
        assert_eq!(
            patch.pointer("/spec/template/spec/containers/0/image"),
            Some(&json!("nginx:1.25"))
        );
        assert_eq!(patch["spec"]["template"]["spec"]["containers"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_field_removed_inside_array_element_is_pruned() {
        let mut previous = deployment(3);
        previous["spec"]["template"]["spec"]["containers"][0]["env"] = json!([{"name": "DEBUG", "value": "1"}]);
        let live = live_from(&previous);
        let desired = deployment(3);

        let patch = three_way_patch(last_applied(&live).as_ref(), &live, &desired).unwrap();
        let containers = &patch["spec"]["template"]["spec"]["containers"];
        assert_eq!(containers, &desired["spec"]["template"]["spec"]["containers"]);
        assert!(containers[0].get("env").is_none());
    }

    #[test]
    fn test_unchanged_array_with_server_defaults_is_not_resent() {
        let desired = deployment(3);
        let live = live_from(&desired);
        let patch = three_way_patch(last_applied(&live).as_ref(), &live, &desired);
        assert!(patch.is_none());
    }

    #[test]
    fn test_array_length_change_is_detected() {
        assert!(!is_subset(&json!([1, 2]), &json!([1, 2, 3])));
        assert!(is_subset(&json!([{"a": 1}]), &json!([{"a": 1, "b": 2}])));
    }

    #[test]
    fn test_last_applied_round_trip() {
        let desired = deployment(3);
        let annotated = with_last_applied(&desired).unwrap();
        assert_eq!(last_applied(&annotated), Some(desired));
    }

    #[test]
    fn test_strip_server_fields() {
        let live = live_from(&deployment(3));
        let stripped = strip_server_fields(&live);
        assert!(stripped.get("status").is_none());
        assert!(stripped.pointer("/metadata/uid").is_none());
        assert!(stripped.pointer("/metadata/annotations").unwrap().as_object().unwrap().is_empty());
        assert_eq!(stripped.pointer("/spec/replicas"), Some(&json!(3)));
    }
}
