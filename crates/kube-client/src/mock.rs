//! Mock KubeClient for unit testing
//!
//! Stores objects in memory and imitates the parts of API-server behaviour
//! the provisioner depends on:
//! - server-populated metadata (`uid`, `resourceVersion`, `generation`)
//! - defaulted fields (`imagePullPolicy`, port `protocol`, `sessionAffinity`)
//! - Deployment rollout status, Service `clusterIP`, Ingress load balancer address
//!
//! Deployment availability can be scripted per object to exercise health
//! checks.

use crate::error::KubeClientError;
use crate::kube_trait::KubeClientTrait;
use crate::object::{ObjectKey, merge_patch};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock KubeClient for testing
///
/// Clones share state.
#[derive(Debug, Clone)]
pub struct MockKubeClient {
    context: String,
    objects: Arc<Mutex<BTreeMap<ObjectKey, Value>>>,
    // Scripted availableReplicas per Deployment, one value per GET
    availability: Arc<Mutex<HashMap<ObjectKey, VecDeque<i64>>>>,
    failing: Arc<Mutex<HashSet<(String, String)>>>,
    ingress_hostname: Arc<Mutex<Option<String>>>,
    mutations: Arc<Mutex<Vec<String>>>,
    next_id: Arc<Mutex<u64>>,
}

impl MockKubeClient {
    /// Create an empty mock for a context name
    pub fn new(context: impl Into<String>) -> Self {
        let context = context.into();
        Self {
            ingress_hostname: Arc::new(Mutex::new(Some(format!(
                "k8s-{}-0123456789.us-east-1.elb.amazonaws.com",
                context.replace(['/', ':', '.'], "-")
            )))),
            context,
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            availability: Arc::new(Mutex::new(HashMap::new())),
            failing: Arc::new(Mutex::new(HashSet::new())),
            mutations: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// Add an object as if it already existed (for test setup)
    pub fn add_object(&self, object: Value) -> Result<(), KubeClientError> {
        let key = ObjectKey::from_object(&object)?;
        let stored = self.admit(object, None);
        lock(&self.objects).insert(key, stored);
        Ok(())
    }

    /// Stored object, without going through `get`
    pub fn object(&self, key: &ObjectKey) -> Option<Value> {
        lock(&self.objects).get(key).cloned()
    }

    /// Script `status.availableReplicas` for successive GETs of a Deployment; the last value sticks
    pub fn script_availability(&self, key: &ObjectKey, values: &[i64]) {
        lock(&self.availability).insert(key.clone(), values.iter().copied().collect());
    }

    /// Address reported on Ingress objects (`None` models a missing controller)
    pub fn set_ingress_hostname(&self, hostname: Option<&str>) {
        *lock(&self.ingress_hostname) = hostname.map(str::to_string);
    }

    /// Make create/patch of `kind`/`name` fail with 422
    pub fn fail_writes_to(&self, kind: &str, name: &str) {
        lock(&self.failing).insert((kind.to_string(), name.to_string()));
    }

    /// Successful create/patch/delete calls, in order
    pub fn mutations(&self) -> Vec<String> {
        lock(&self.mutations).clone()
    }

    pub fn mutation_count(&self) -> usize {
        lock(&self.mutations).len()
    }

    pub fn reset_counters(&self) {
        lock(&self.mutations).clear();
    }

    fn check_writable(&self, key: &ObjectKey) -> Result<(), KubeClientError> {
        if lock(&self.failing).contains(&(key.kind.clone(), key.name.clone())) {
            return Err(KubeClientError::Api {
                code: 422,
                reason: "Invalid".to_string(),
                message: format!("{} is invalid (injected)", key),
            });
        }
        Ok(())
    }

    /// Apply server-side population to a written object
    fn admit(&self, mut object: Value, previous: Option<&Value>) -> Value {
        let id = {
            let mut next = lock(&self.next_id);
            *next += 1;
            *next
        };

        let spec_changed = previous.is_none_or(|p| p.get("spec") != object.get("spec"));
        let generation = previous
            .and_then(|p| p.pointer("/metadata/generation"))
            .and_then(Value::as_i64)
            .unwrap_or(0)
            + i64::from(spec_changed);

        if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
            let uid = previous
                .and_then(|p| p.pointer("/metadata/uid"))
                .cloned()
                .unwrap_or_else(|| json!(format!("00000000-0000-4000-8000-{:012}", id)));
            metadata.insert("uid".to_string(), uid);
            metadata.insert("resourceVersion".to_string(), json!(id.to_string()));
            metadata.insert("generation".to_string(), json!(generation));
            metadata
                .entry("creationTimestamp")
                .or_insert_with(|| json!("2024-01-01T00:00:00Z"));
        }

        let kind = object.get("kind").and_then(Value::as_str).unwrap_or_default().to_string();
        match kind.as_str() {
            "Deployment" => default_deployment(&mut object),
            "Service" => default_service(&mut object, id, previous),
            "Ingress" => {
                if let Some(hostname) = lock(&self.ingress_hostname).clone() {
                    object["status"] = json!({"loadBalancer": {"ingress": [{"hostname": hostname}]}});
                }
            }
            _ => {}
        }
        object
    }
}

fn default_deployment(object: &mut Value) {
    let replicas = object.pointer("/spec/replicas").and_then(Value::as_i64).unwrap_or(1);
    if let Some(spec) = object.get_mut("spec").and_then(Value::as_object_mut) {
        spec.entry("replicas").or_insert(json!(replicas));
        spec.entry("progressDeadlineSeconds").or_insert(json!(600));
        spec.entry("revisionHistoryLimit").or_insert(json!(10));
    }
    if let Some(containers) = object
        .pointer_mut("/spec/template/spec/containers")
        .and_then(Value::as_array_mut)
    {
        for container in containers.iter_mut().filter_map(Value::as_object_mut) {
            container.entry("imagePullPolicy").or_insert(json!("IfNotPresent"));
            container
                .entry("terminationMessagePath")
                .or_insert(json!("/dev/termination-log"));
            if let Some(ports) = container.get_mut("ports").and_then(Value::as_array_mut) {
                for port in ports.iter_mut().filter_map(Value::as_object_mut) {
                    port.entry("protocol").or_insert(json!("TCP"));
                }
            }
        }
    }
    let generation = object.pointer("/metadata/generation").cloned().unwrap_or(json!(1));
    object["status"] = json!({
        "observedGeneration": generation,
        "replicas": replicas,
        "readyReplicas": replicas,
        "availableReplicas": replicas,
        "updatedReplicas": replicas,
    });
}

fn default_service(object: &mut Value, id: u64, previous: Option<&Value>) {
    let cluster_ip = previous
        .and_then(|p| p.pointer("/spec/clusterIP"))
        .cloned()
        .unwrap_or_else(|| json!(format!("10.100.{}.{}", (id / 250) % 250, id % 250 + 1)));
    if let Some(spec) = object.get_mut("spec").and_then(Value::as_object_mut) {
        spec.entry("type").or_insert(json!("ClusterIP"));
        spec.entry("sessionAffinity").or_insert(json!("None"));
        spec.insert("clusterIP".to_string(), cluster_ip.clone());
        spec.insert("clusterIPs".to_string(), json!([cluster_ip]));
        if let Some(ports) = spec.get_mut("ports").and_then(Value::as_array_mut) {
            for port in ports.iter_mut().filter_map(Value::as_object_mut) {
                port.entry("protocol").or_insert(json!("TCP"));
            }
        }
    }
}

#[async_trait::async_trait]
impl KubeClientTrait for MockKubeClient {
    fn context(&self) -> &str {
        &self.context
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<Value>, KubeClientError> {
        let mut object = match lock(&self.objects).get(key).cloned() {
            Some(object) => object,
            None => return Ok(None),
        };
        if key.kind == "Deployment" {
            let mut availability = lock(&self.availability);
            if let Some(script) = availability.get_mut(key) {
                let value = if script.len() > 1 {
                    script.pop_front()
                } else {
                    script.front().copied()
                };
                if let Some(available) = value {
                    object["status"]["availableReplicas"] = json!(available);
                    object["status"]["readyReplicas"] = json!(available);
                }
            }
        }
        Ok(Some(object))
    }

    async fn create(&self, object: &Value) -> Result<Value, KubeClientError> {
        let key = ObjectKey::from_object(object)?;
        self.check_writable(&key)?;
        if lock(&self.objects).contains_key(&key) {
            return Err(KubeClientError::Api {
                code: 409,
                reason: "AlreadyExists".to_string(),
                message: format!("{} already exists", key),
            });
        }
        let stored = self.admit(object.clone(), None);
        lock(&self.objects).insert(key.clone(), stored.clone());
        lock(&self.mutations).push(format!("create {}", key));
        Ok(stored)
    }

    async fn patch(&self, key: &ObjectKey, patch: &Value) -> Result<Value, KubeClientError> {
        self.check_writable(key)?;
        let previous = lock(&self.objects).get(key).cloned().ok_or_else(|| KubeClientError::Api {
            code: 404,
            reason: "NotFound".to_string(),
            message: format!("{} not found", key),
        })?;
        let mut updated = previous.clone();
        merge_patch(&mut updated, patch);
        let stored = self.admit(updated, Some(&previous));
        lock(&self.objects).insert(key.clone(), stored.clone());
        lock(&self.mutations).push(format!("patch {}", key));
        Ok(stored)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), KubeClientError> {
        if lock(&self.objects).remove(key).is_some() {
            lock(&self.mutations).push(format!("delete {}", key));
        }
        Ok(())
    }
}
