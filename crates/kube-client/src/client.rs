//! kube-rs backed client
//!
//! Resolves the API resource of each object from its apiVersion and kind and
//! goes through `Api<DynamicObject>`.

use crate::error::KubeClientError;
use crate::kube_trait::KubeClientTrait;
use crate::object::ObjectKey;
use kube::api::{Api, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// Field manager recorded on every write
pub const FIELD_MANAGER: &str = "eks-provisioner";

/// Kubernetes client for one kubeconfig context
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    context: String,
}

impl std::fmt::Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClient").field("context", &self.context).finish()
    }
}

impl KubeClient {
    /// Client for the ambient configuration (in-cluster or current context)
    pub async fn try_default() -> Result<Self, KubeClientError> {
        let client = Client::try_default().await?;
        Ok(Self {
            client,
            context: "default".to_string(),
        })
    }

    /// Client for a named context of a kubeconfig file
    pub async fn for_context(kubeconfig: &Path, context: &str) -> Result<Self, KubeClientError> {
        let config_file = Kubeconfig::read_from(kubeconfig)
            .map_err(|e| KubeClientError::Config(format!("{}: {}", kubeconfig.display(), e)))?;
        let options = KubeConfigOptions {
            context: Some(context.to_string()),
            ..Default::default()
        };
        let config = Config::from_custom_kubeconfig(config_file, &options)
            .await
            .map_err(|e| KubeClientError::Config(format!("context {}: {}", context, e)))?;
        let client = Client::try_from(config)?;
        Ok(Self {
            client,
            context: context.to_string(),
        })
    }

    fn api(&self, key: &ObjectKey) -> Api<DynamicObject> {
        let (group, version) = key.group_version();
        let gvk = GroupVersionKind::gvk(group, version, &key.kind);
        let resource = ApiResource::from_gvk(&gvk);
        match &key.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

#[async_trait::async_trait]
impl KubeClientTrait for KubeClient {
    fn context(&self) -> &str {
        &self.context
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<Value>, KubeClientError> {
        debug!("GET {}", key);
        match self.api(key).get_opt(&key.name).await? {
            Some(object) => Ok(Some(serde_json::to_value(object)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, object: &Value) -> Result<Value, KubeClientError> {
        let key = ObjectKey::from_object(object)?;
        debug!("CREATE {}", key);
        let dynamic: DynamicObject = serde_json::from_value(object.clone())?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let created = self.api(&key).create(&params, &dynamic).await?;
        Ok(serde_json::to_value(created)?)
    }

    async fn patch(&self, key: &ObjectKey, patch: &Value) -> Result<Value, KubeClientError> {
        debug!("PATCH {}", key);
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let patched = self.api(key).patch(&key.name, &params, &Patch::Merge(patch)).await?;
        Ok(serde_json::to_value(patched)?)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), KubeClientError> {
        debug!("DELETE {}", key);
        match self.api(key).delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
