//! Workload manifests
//!
//! Operator-owned Deployment, Service and Ingress descriptions. They are
//! rendered to Kubernetes objects with `k8s-openapi` types and reconciled,
//! never mutated by the provisioner.

use crate::error::ModelError;
use crate::manifest::Manifest;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

fn default_namespace() -> String {
    "default".to_string()
}

fn default_replicas() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadManifest {
    /// Deployment name
    pub name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Container image reference
    pub image: String,

    #[serde(default)]
    pub ports: Vec<WorkloadPort>,

    /// Pod labels, also used as the Deployment selector (defaults to `app: <name>`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Pod affinity, copied into the pod spec without interpretation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadPort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub container_port: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl WorkloadManifest {
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        if self.labels.is_empty() {
            BTreeMap::from([("app".to_string(), self.name.clone())])
        } else {
            self.labels.clone()
        }
    }

    pub fn validate(&self, problems: &mut Vec<String>) {
        if self.name.is_empty() {
            problems.push("workload name must not be empty".to_string());
        }
        if self.image.is_empty() {
            problems.push(format!("workload '{}' needs an image", self.name));
        }
        if self.replicas < 0 {
            problems.push(format!("workload '{}' replicas must not be negative", self.name));
        }
        for port in &self.ports {
            if !(1..=65535).contains(&port.container_port) {
                problems.push(format!(
                    "workload '{}' containerPort {} is out of range",
                    self.name, port.container_port
                ));
            }
        }
    }

    /// Render the `apps/v1` Deployment
    pub fn render(&self) -> Result<Manifest, ModelError> {
        let labels = self.selector_labels();
        let ports: Vec<ContainerPort> = self
            .ports
            .iter()
            .map(|p| ContainerPort {
                name: p.name.clone(),
                container_port: p.container_port,
                protocol: p.protocol.clone(),
                ..Default::default()
            })
            .collect();

        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(self.replicas),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: self.name.clone(),
                            image: Some(self.image.clone()),
                            ports: (!ports.is_empty()).then_some(ports),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        };

        let mut value = serde_json::to_value(&deployment)?;
        if let Some(affinity) = &self.affinity {
            if let Some(pod_spec) = value.pointer_mut("/spec/template/spec") {
                pod_spec["affinity"] = affinity.clone();
            }
        }
        Manifest::new(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceManifest {
    pub name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Pod selector
    pub selector: BTreeMap<String, String>,

    pub ports: Vec<ServicePortSpec>,

    /// Service type (`ClusterIP` unless stated)
    #[serde(default = "default_service_type", rename = "type")]
    pub service_type: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

fn default_service_type() -> String {
    "ClusterIP".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePortSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub port: i32,

    /// Container port (defaults to `port`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl ServiceManifest {
    pub fn validate(&self, problems: &mut Vec<String>) {
        if self.name.is_empty() {
            problems.push("service name must not be empty".to_string());
        }
        if self.ports.is_empty() {
            problems.push(format!("service '{}' needs at least one port", self.name));
        }
        if !["ClusterIP", "NodePort", "LoadBalancer"].contains(&self.service_type.as_str()) {
            problems.push(format!(
                "service '{}' has unsupported type '{}'",
                self.name, self.service_type
            ));
        }
    }

    /// Render the `v1` Service
    pub fn render(&self) -> Result<Manifest, ModelError> {
        let service = Service {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                annotations: (!self.annotations.is_empty()).then(|| self.annotations.clone()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(self.selector.clone()),
                type_: Some(self.service_type.clone()),
                ports: Some(
                    self.ports
                        .iter()
                        .map(|p| ServicePort {
                            name: p.name.clone(),
                            port: p.port,
                            target_port: Some(IntOrString::Int(p.target_port.unwrap_or(p.port))),
                            protocol: p.protocol.clone(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        };
        Manifest::new(serde_json::to_value(&service)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngressManifest {
    pub name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Ingress class served by the load balancer controller
    #[serde(default = "default_ingress_class")]
    pub class_name: String,

    /// ALB annotations (internet-facing, IP targets unless stated)
    #[serde(default = "default_ingress_annotations")]
    pub annotations: BTreeMap<String, String>,

    pub rules: Vec<IngressPathRule>,
}

fn default_ingress_class() -> String {
    "alb".to_string()
}

fn default_ingress_annotations() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("alb.ingress.kubernetes.io/scheme".to_string(), "internet-facing".to_string()),
        ("alb.ingress.kubernetes.io/target-type".to_string(), "ip".to_string()),
    ])
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngressPathRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default = "default_path_type")]
    pub path_type: String,

    pub service_name: String,

    pub service_port: i32,
}

fn default_path() -> String {
    "/".to_string()
}

fn default_path_type() -> String {
    "Prefix".to_string()
}

impl IngressManifest {
    pub fn validate(&self, problems: &mut Vec<String>) {
        if self.name.is_empty() {
            problems.push("ingress name must not be empty".to_string());
        }
        if self.rules.is_empty() {
            problems.push(format!("ingress '{}' needs at least one rule", self.name));
        }
        for rule in &self.rules {
            if !rule.path.starts_with('/') {
                problems.push(format!("ingress '{}' path '{}' must start with '/'", self.name, rule.path));
            }
        }
    }

    /// Render the `networking.k8s.io/v1` Ingress; rules sharing a host share one HTTP rule
    pub fn render(&self) -> Result<Manifest, ModelError> {
        let mut by_host: BTreeMap<Option<String>, Vec<HTTPIngressPath>> = BTreeMap::new();
        for rule in &self.rules {
            by_host.entry(rule.host.clone()).or_default().push(HTTPIngressPath {
                path: Some(rule.path.clone()),
                path_type: rule.path_type.clone(),
                backend: IngressBackend {
                    service: Some(IngressServiceBackend {
                        name: rule.service_name.clone(),
                        port: Some(ServiceBackendPort {
                            number: Some(rule.service_port),
                            ..Default::default()
                        }),
                    }),
                    ..Default::default()
                },
            });
        }

        let ingress = Ingress {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                annotations: (!self.annotations.is_empty()).then(|| self.annotations.clone()),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                ingress_class_name: Some(self.class_name.clone()),
                rules: Some(
                    by_host
                        .into_iter()
                        .map(|(host, paths)| IngressRule {
                            host,
                            http: Some(HTTPIngressRuleValue { paths }),
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        };
        Manifest::new(serde_json::to_value(&ingress)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nginx() -> WorkloadManifest {
        WorkloadManifest {
            name: "nginx-deployment".to_string(),
            namespace: "default".to_string(),
            replicas: 3,
            image: "public.ecr.aws/nginx/nginx:1.23".to_string(),
            ports: vec![WorkloadPort { name: Some("http".to_string()), container_port: 80, protocol: None }],
            labels: BTreeMap::new(),
            affinity: Some(json!({
                "nodeAffinity": {
                    "requiredDuringSchedulingIgnoredDuringExecution": {
                        "nodeSelectorTerms": [{
                            "matchExpressions": [{"key": "kubernetes.io/arch", "operator": "In", "values": ["amd64", "arm64"]}]
                        }]
                    }
                }
            })),
        }
    }

    #[test]
    fn test_render_deployment() {
        let manifest = nginx().render().unwrap();
        let value = manifest.value();
        assert_eq!(value["apiVersion"], "apps/v1");
        assert_eq!(value["kind"], "Deployment");
        assert_eq!(value["spec"]["replicas"], 3);
        assert_eq!(value["spec"]["selector"]["matchLabels"]["app"], "nginx-deployment");
        assert_eq!(
            value["spec"]["template"]["spec"]["containers"][0]["image"],
            "public.ecr.aws/nginx/nginx:1.23"
        );
    }

    #[test]
    fn test_affinity_passed_through_verbatim() {
        let workload = nginx();
        let manifest = workload.render().unwrap();
        assert_eq!(
            manifest.value()["spec"]["template"]["spec"]["affinity"],
            workload.affinity.unwrap()
        );
    }

    #[test]
    fn test_render_service_defaults_target_port() {
        let service = ServiceManifest {
            name: "nginx-service".to_string(),
            namespace: "default".to_string(),
            selector: BTreeMap::from([("app".to_string(), "nginx-deployment".to_string())]),
            ports: vec![ServicePortSpec { name: None, port: 80, target_port: None, protocol: None }],
            service_type: default_service_type(),
            annotations: BTreeMap::new(),
        };
        let value = service.render().unwrap().into_value();
        assert_eq!(value["spec"]["type"], "ClusterIP");
        assert_eq!(value["spec"]["ports"][0]["targetPort"], 80);
    }

    #[test]
    fn test_render_ingress_groups_paths_by_host() {
        let ingress = IngressManifest {
            name: "nginx-ingress".to_string(),
            namespace: "default".to_string(),
            class_name: default_ingress_class(),
            annotations: default_ingress_annotations(),
            rules: vec![
                IngressPathRule { host: None, path: "/".to_string(), path_type: default_path_type(), service_name: "nginx-service".to_string(), service_port: 80 },
                IngressPathRule { host: None, path: "/api".to_string(), path_type: default_path_type(), service_name: "api".to_string(), service_port: 8080 },
            ],
        };
        let value = ingress.render().unwrap().into_value();
        assert_eq!(value["spec"]["ingressClassName"], "alb");
        assert_eq!(value["spec"]["rules"].as_array().unwrap().len(), 1);
        assert_eq!(value["spec"]["rules"][0]["http"]["paths"][1]["backend"]["service"]["port"]["number"], 8080);
        assert_eq!(value["metadata"]["annotations"]["alb.ingress.kubernetes.io/scheme"], "internet-facing");
    }
}
