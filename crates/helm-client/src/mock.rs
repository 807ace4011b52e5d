//! Mock HelmClient for unit testing
//!
//! Keeps release history in memory. An install hook lets tests create the
//! objects a chart would (e.g. the controller Deployment in a
//! `MockKubeClient`).

use crate::error::HelmError;
use crate::helm_trait::HelmClientTrait;
use crate::models::{HelmRelease, ReleaseRequest, ReleaseRevision, ReleaseStatus};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type InstallHook = Box<dyn Fn(&ReleaseRequest) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock HelmClient for testing
#[derive(Clone)]
pub struct MockHelmClient {
    repos: Arc<Mutex<HashMap<String, String>>>,
    // Revision history per (namespace, name), oldest first
    releases: Arc<Mutex<HashMap<(String, String), Vec<HelmRelease>>>>,
    install_hook: Arc<Mutex<Option<InstallHook>>>,
    install_failures: Arc<Mutex<u32>>,
    mutations: Arc<Mutex<Vec<String>>>,
}

impl fmt::Debug for MockHelmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockHelmClient")
            .field("repos", &self.repos)
            .field("releases", &self.releases)
            .field("mutations", &self.mutations)
            .finish_non_exhaustive()
    }
}

impl MockHelmClient {
    pub fn new() -> Self {
        Self {
            repos: Arc::new(Mutex::new(HashMap::new())),
            releases: Arc::new(Mutex::new(HashMap::new())),
            install_hook: Arc::new(Mutex::new(None)),
            install_failures: Arc::new(Mutex::new(0)),
            mutations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Run `hook` after every successful upgrade/install
    pub fn on_install(&self, hook: impl Fn(&ReleaseRequest) + Send + Sync + 'static) {
        *lock(&self.install_hook) = Some(Box::new(hook));
    }

    /// Make the next `times` upgrade/install calls fail
    pub fn fail_installs(&self, times: u32) {
        *lock(&self.install_failures) = times;
    }

    /// Add a release as if it was already installed (for test setup)
    pub fn add_release(&self, release: HelmRelease) {
        lock(&self.releases)
            .entry((release.namespace.clone(), release.name.clone()))
            .or_default()
            .push(release);
    }

    pub fn repo_url(&self, name: &str) -> Option<String> {
        lock(&self.repos).get(name).cloned()
    }

    /// All revisions of a release, oldest first
    pub fn history(&self, name: &str, namespace: &str) -> Vec<HelmRelease> {
        lock(&self.releases)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Successful upgrade/install and rollback calls, in order
    pub fn mutations(&self) -> Vec<String> {
        lock(&self.mutations).clone()
    }

    pub fn mutation_count(&self) -> usize {
        lock(&self.mutations).len()
    }

    pub fn reset_counters(&self) {
        lock(&self.mutations).clear();
    }
}

impl Default for MockHelmClient {
    fn default() -> Self {
        Self::new()
    }
}

fn chart_name(chart: &str) -> String {
    chart.rsplit('/').next().unwrap_or(chart).to_string()
}

#[async_trait::async_trait]
impl HelmClientTrait for MockHelmClient {
    async fn add_repo(&self, name: &str, url: &str) -> Result<(), HelmError> {
        lock(&self.repos).insert(name.to_string(), url.to_string());
        Ok(())
    }

    async fn get_release(&self, name: &str, namespace: &str) -> Result<Option<HelmRelease>, HelmError> {
        Ok(self.history(name, namespace).pop())
    }

    async fn revisions(&self, name: &str, namespace: &str) -> Result<Vec<ReleaseRevision>, HelmError> {
        Ok(self
            .history(name, namespace)
            .into_iter()
            .map(|r| ReleaseRevision {
                revision: r.revision,
                status: r.status,
                chart: format!("{}-{}", r.chart_name, r.chart_version),
                description: String::new(),
            })
            .collect())
    }

    async fn upgrade_install(&self, request: &ReleaseRequest) -> Result<HelmRelease, HelmError> {
        let pending = self
            .history(&request.name, &request.namespace)
            .last()
            .is_some_and(|r| r.status.is_pending());
        if pending {
            return Err(HelmError::Failed {
                command: "upgrade".to_string(),
                stderr: "Error: UPGRADE FAILED: another operation (install/upgrade/rollback) is in progress".to_string(),
            });
        }

        if let Some((repo, _)) = request.chart.split_once('/') {
            if !lock(&self.repos).contains_key(repo) {
                return Err(HelmError::Failed {
                    command: "upgrade".to_string(),
                    stderr: format!("Error: repo {} not found", repo),
                });
            }
        }

        {
            let mut failures = lock(&self.install_failures);
            if *failures > 0 {
                *failures -= 1;
                return Err(HelmError::Failed {
                    command: "upgrade".to_string(),
                    stderr: "Error: UPGRADE FAILED: context deadline exceeded".to_string(),
                });
            }
        }

        let release = {
            let mut releases = lock(&self.releases);
            let history = releases
                .entry((request.namespace.clone(), request.name.clone()))
                .or_default();
            if let Some(last) = history.last_mut() {
                if last.status == ReleaseStatus::Deployed {
                    last.status = ReleaseStatus::Superseded;
                }
            }
            let release = HelmRelease {
                name: request.name.clone(),
                namespace: request.namespace.clone(),
                revision: history.last().map_or(1, |r| r.revision + 1),
                status: ReleaseStatus::Deployed,
                chart_name: chart_name(&request.chart),
                chart_version: request.version.clone().unwrap_or_else(|| "0.0.0".to_string()),
                app_version: None,
                values: request.values.clone(),
            };
            history.push(release.clone());
            release
        };

        lock(&self.mutations).push(format!("upgrade {}/{} r{}", request.namespace, request.name, release.revision));
        if let Some(hook) = lock(&self.install_hook).as_ref() {
            hook(request);
        }
        Ok(release)
    }

    async fn rollback(&self, name: &str, namespace: &str, revision: u32) -> Result<(), HelmError> {
        let mut releases = lock(&self.releases);
        let history = releases
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| HelmError::Failed {
                command: "rollback".to_string(),
                stderr: "Error: release: not found".to_string(),
            })?;
        let target = history
            .iter()
            .find(|r| r.revision == revision)
            .cloned()
            .ok_or_else(|| HelmError::Failed {
                command: "rollback".to_string(),
                stderr: format!("Error: release has no {} version", revision),
            })?;
        let next = history.last().map_or(1, |r| r.revision + 1);
        if let Some(last) = history.last_mut() {
            last.status = ReleaseStatus::Superseded;
        }
        history.push(HelmRelease {
            revision: next,
            status: ReleaseStatus::Deployed,
            ..target
        });
        drop(releases);
        lock(&self.mutations).push(format!("rollback {}/{} r{}", namespace, name, revision));
        Ok(())
    }

    async fn uninstall(&self, name: &str, namespace: &str) -> Result<(), HelmError> {
        let removed = lock(&self.releases).remove(&(namespace.to_string(), name.to_string()));
        if removed.is_some() {
            lock(&self.mutations).push(format!("uninstall {}/{}", namespace, name));
        }
        Ok(())
    }
}
