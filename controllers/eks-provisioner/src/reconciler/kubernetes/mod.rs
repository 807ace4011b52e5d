//! Kubernetes resource reconciler
//!
//! Applies manifests the way `kubectl apply` does: the last-applied
//! configuration is kept in an annotation and a three-way diff decides
//! between create, patch and no-op. A failing object does not stop the
//! batch; the first error is returned once every object was attempted.
//!
//! - `diff`: three-way merge patch computation
//! - `readiness`: rollout, cluster IP and load balancer address waits

pub mod diff;
pub mod readiness;

#[cfg(test)]
mod kubernetes_test;

use crate::context::RunContext;
use crate::error::ProvisionerError;
use crate::report::{ResourceStatus, StageRecorder};
use cluster_model::Manifest;
use diff::{LAST_APPLIED_ANNOTATION, last_applied, strip_server_fields, three_way_patch, with_last_applied};
use kube_client::{KubeClientTrait, ObjectKey, merge_patch};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What an apply did to one object
#[derive(Debug, Clone)]
pub struct AppliedObject {
    pub key: ObjectKey,
    pub status: ResourceStatus,
}

/// How to undo one applied object
#[derive(Debug, Clone)]
enum Undo {
    /// Created in this batch
    Delete { key: ObjectKey },
    /// Patched in this batch; `previous` is the configuration to go back to
    Restore { key: ObjectKey, previous: Value, applied: Value },
}

impl Undo {
    fn key(&self) -> &ObjectKey {
        match self {
            Self::Delete { key } | Self::Restore { key, .. } => key,
        }
    }
}

/// Reconciles Kubernetes objects for one cluster context.
pub struct KubeReconciler {
    pub(crate) client: Arc<dyn KubeClientTrait>,
    pub(crate) ctx: RunContext,
    rollback_on_failure: bool,
}

impl KubeReconciler {
    pub fn new(client: Arc<dyn KubeClientTrait>, ctx: RunContext) -> Self {
        let rollback_on_failure = ctx.config.rollback_on_failure;
        Self {
            client,
            ctx,
            rollback_on_failure,
        }
    }

    /// Apply `manifests` in order, then wait for Deployments and Services to become ready.
    ///
    /// On failure the batch is rolled back when `rollback_on_failure` is set.
    pub async fn apply_batch(
        &self,
        manifests: &[Manifest],
        recorder: &mut StageRecorder,
    ) -> Result<Vec<AppliedObject>, ProvisionerError> {
        info!(
            "Applying {} objects to {}",
            manifests.len(),
            self.client.context()
        );

        let mut applied = Vec::new();
        let mut undo = Vec::new();
        let mut first_error = None;

        for manifest in manifests {
            self.ctx.checkpoint()?;
            let name = resource_name(manifest);
            match self.apply_one(manifest).await {
                Ok((object, step)) => {
                    recorder.record(manifest.kind(), &name, object.status);
                    undo.extend(step);
                    applied.push(object);
                }
                Err(e) => {
                    error!("Failed to apply {}: {}", manifest.display_name(), e);
                    recorder.record_with_message(manifest.kind(), &name, ResourceStatus::Error, e.to_string());
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if first_error.is_none() {
            for (manifest, object) in manifests.iter().zip(&applied) {
                if let Err(e) = self.wait_ready(&object.key).await {
                    error!("{} did not become ready: {}", manifest.display_name(), e);
                    recorder.record_with_message(manifest.kind(), &resource_name(manifest), ResourceStatus::Error, e.to_string());
                    first_error = Some(e);
                    break;
                }
            }
        }

        match first_error {
            None => Ok(applied),
            Some(e) => {
                if self.rollback_on_failure && !matches!(e, ProvisionerError::Cancelled) {
                    self.roll_back(undo, recorder).await;
                }
                Err(e)
            }
        }
    }

    /// Create or patch one object; returns its outcome and how to undo it
    async fn apply_one(&self, manifest: &Manifest) -> Result<(AppliedObject, Option<Undo>), ProvisionerError> {
        let desired = manifest.value();
        let key = ObjectKey::from_object(desired)?;

        match self.get(&key).await? {
            Some(live) => self.patch_existing(key, desired, &live).await,
            None => {
                let object = with_last_applied(desired)?;
                let created = self
                    .ctx
                    .retry(&format!("create {}", key), || async {
                        self.client.create(&object).await.map_err(ProvisionerError::from)
                    })
                    .await;
                match created {
                    Ok(_) => {
                        info!("Created {}", key);
                        let undo = Undo::Delete { key: key.clone() };
                        Ok((
                            AppliedObject {
                                key,
                                status: ResourceStatus::Created,
                            },
                            Some(undo),
                        ))
                    }
                    Err(e) if e.is_already_exists() => {
                        warn!("{} was created concurrently, patching it instead", key);
                        let live = self.get(&key).await?.ok_or(e)?;
                        self.patch_existing(key, desired, &live).await
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn patch_existing(
        &self,
        key: ObjectKey,
        desired: &Value,
        live: &Value,
    ) -> Result<(AppliedObject, Option<Undo>), ProvisionerError> {
        let last = last_applied(live);
        let mut patch = three_way_patch(last.as_ref(), live, desired);
        if last.as_ref() != Some(desired) {
            let annotation = json!({
                "metadata": {"annotations": {LAST_APPLIED_ANNOTATION: serde_json::to_string(desired)?}}
            });
            merge_patch(patch.get_or_insert_with(|| json!({})), &annotation);
        }

        let Some(patch) = patch else {
            debug!("{} is up to date", key);
            return Ok((
                AppliedObject {
                    key,
                    status: ResourceStatus::Unchanged,
                },
                None,
            ));
        };

        debug!("Patching {}: {}", key, patch);
        self.ctx
            .retry(&format!("patch {}", key), || async {
                self.client.patch(&key, &patch).await.map_err(ProvisionerError::from)
            })
            .await?;
        info!("Updated {}", key);

        let undo = Undo::Restore {
            key: key.clone(),
            previous: last.unwrap_or_else(|| strip_server_fields(live)),
            applied: desired.clone(),
        };
        Ok((
            AppliedObject {
                key,
                status: ResourceStatus::Updated,
            },
            Some(undo),
        ))
    }

    /// Undo a failed batch in reverse order. Failures are logged, not returned.
    async fn roll_back(&self, undo: Vec<Undo>, recorder: &mut StageRecorder) {
        warn!("Rolling back {} objects on {}", undo.len(), self.client.context());
        for step in undo.into_iter().rev() {
            let key = step.key().clone();
            let result = match &step {
                Undo::Delete { key } => self
                    .ctx
                    .retry(&format!("delete {}", key), || async {
                        self.client.delete(key).await.map_err(ProvisionerError::from)
                    })
                    .await,
                Undo::Restore { key, previous, applied } => self.restore(key, previous, applied).await,
            };
            match result {
                Ok(()) => {
                    info!("Rolled back {}", key);
                    recorder.set_status(&key.kind, &key_name(&key), ResourceStatus::RolledBack);
                }
                Err(e) => {
                    error!("Failed to roll back {}: {}", key, e);
                    recorder.warn(format!("rollback of {} failed: {}", key, e));
                }
            }
        }
    }

    async fn restore(&self, key: &ObjectKey, previous: &Value, applied: &Value) -> Result<(), ProvisionerError> {
        let Some(live) = self.get(key).await? else {
            return Ok(());
        };
        let mut patch = three_way_patch(Some(applied), &live, previous).unwrap_or_else(|| json!({}));
        let annotation = json!({
            "metadata": {"annotations": {LAST_APPLIED_ANNOTATION: serde_json::to_string(previous)?}}
        });
        merge_patch(&mut patch, &annotation);
        self.ctx
            .retry(&format!("restore {}", key), || async {
                self.client.patch(key, &patch).await.map_err(ProvisionerError::from)
            })
            .await?;
        Ok(())
    }

    /// Live object, retried on transient errors
    pub(crate) async fn get(&self, key: &ObjectKey) -> Result<Option<Value>, ProvisionerError> {
        self.ctx
            .retry(&format!("get {}", key), || async {
                self.client.get(key).await.map_err(ProvisionerError::from)
            })
            .await
    }
}

/// Name used in reports: `namespace/name` for namespaced objects
fn resource_name(manifest: &Manifest) -> String {
    match manifest.namespace() {
        Some(ns) => format!("{}/{}", ns, manifest.name()),
        None => manifest.name().to_string(),
    }
}

pub(crate) fn key_name(key: &ObjectKey) -> String {
    match &key.namespace {
        Some(ns) => format!("{}/{}", ns, key.name),
        None => key.name.clone(),
    }
}
