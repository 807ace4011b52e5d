//! `helm` CLI client

use crate::error::HelmError;
use crate::helm_trait::HelmClientTrait;
use crate::models::{HelmRelease, ReleaseRequest, ReleaseRevision, StatusOutput};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Helm client backed by the `helm` CLI
#[derive(Debug, Clone)]
pub struct HelmCli {
    binary: String,
    kubeconfig: Option<PathBuf>,
    kube_context: Option<String>,
    call_timeout: Duration,
}

impl HelmCli {
    pub fn new() -> Self {
        Self {
            binary: "helm".to_string(),
            kubeconfig: None,
            kube_context: None,
            call_timeout: Duration::from_secs(600),
        }
    }

    /// Target a kubeconfig context instead of the current one
    pub fn with_context(mut self, kubeconfig: impl Into<PathBuf>, context: impl Into<String>) -> Self {
        self.kubeconfig = Some(kubeconfig.into());
        self.kube_context = Some(context.into());
        self
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Run helm; `stdin` is piped to the process when given
    async fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<String, HelmError> {
        let command_name = args.first().copied().unwrap_or_default().to_string();
        let mut command = Command::new(&self.binary);
        command.args(args).kill_on_drop(true);
        if let Some(kubeconfig) = &self.kubeconfig {
            command.arg("--kubeconfig").arg(kubeconfig);
        }
        if let Some(context) = &self.kube_context {
            command.args(["--kube-context", context.as_str()]);
        }
        command
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Running helm {}", args.join(" "));
        let mut child = command
            .spawn()
            .map_err(|e| HelmError::Spawn(format!("{}: {}", self.binary, e)))?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| HelmError::Spawn(format!("writing values to helm: {}", e)))?;
        }

        let output = tokio::time::timeout(self.call_timeout, child.wait_with_output())
            .await
            .map_err(|_| HelmError::Timeout {
                command: command_name.clone(),
                seconds: self.call_timeout.as_secs(),
            })?
            .map_err(|e| HelmError::Spawn(e.to_string()))?;

        if !output.status.success() {
            return Err(HelmError::Failed {
                command: command_name,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for HelmCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HelmClientTrait for HelmCli {
    async fn add_repo(&self, name: &str, url: &str) -> Result<(), HelmError> {
        self.run(&["repo", "add", name, url, "--force-update"], None).await?;
        self.run(&["repo", "update", name], None).await?;
        Ok(())
    }

    async fn get_release(&self, name: &str, namespace: &str) -> Result<Option<HelmRelease>, HelmError> {
        let stdout = match self
            .run(&["status", name, "--namespace", namespace, "--output", "json"], None)
            .await
        {
            Ok(stdout) => stdout,
            Err(e) if e.is_release_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let status: StatusOutput = serde_json::from_str(&stdout)?;
        let mut release = HelmRelease::from(status);
        if release.values.is_null() {
            let values = self
                .run(&["get", "values", name, "--namespace", namespace, "--output", "json"], None)
                .await?;
            release.values = serde_json::from_str(&values)?;
        }
        Ok(Some(release))
    }

    async fn revisions(&self, name: &str, namespace: &str) -> Result<Vec<ReleaseRevision>, HelmError> {
        match self
            .run(&["history", name, "--namespace", namespace, "--output", "json"], None)
            .await
        {
            Ok(stdout) => Ok(serde_json::from_str(&stdout)?),
            Err(e) if e.is_release_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn upgrade_install(&self, request: &ReleaseRequest) -> Result<HelmRelease, HelmError> {
        let values = serde_json::to_string(&request.values)?;
        let timeout = request
            .wait_timeout
            .map(|t| format!("{}s", t.as_secs()))
            .unwrap_or_default();
        let mut args = vec![
            "upgrade",
            "--install",
            request.name.as_str(),
            request.chart.as_str(),
            "--namespace",
            request.namespace.as_str(),
            "--values",
            "-",
        ];
        if let Some(version) = &request.version {
            args.extend(["--version", version.as_str()]);
        }
        if request.wait_timeout.is_some() {
            args.extend(["--wait", "--timeout", timeout.as_str()]);
        }
        self.run(&args, Some(&values)).await?;

        self.get_release(&request.name, &request.namespace)
            .await?
            .ok_or_else(|| HelmError::Failed {
                command: "upgrade".to_string(),
                stderr: format!("release {} missing after upgrade", request.name),
            })
    }

    async fn rollback(&self, name: &str, namespace: &str, revision: u32) -> Result<(), HelmError> {
        let revision = revision.to_string();
        self.run(
            &["rollback", name, revision.as_str(), "--namespace", namespace, "--wait"],
            None,
        )
        .await?;
        Ok(())
    }

    async fn uninstall(&self, name: &str, namespace: &str) -> Result<(), HelmError> {
        match self
            .run(&["uninstall", name, "--namespace", namespace, "--wait"], None)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_release_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let helm = HelmCli::new().with_binary("/nonexistent/helm-for-tests");
        let err = helm.get_release("x", "default").await.unwrap_err();
        assert!(matches!(err, HelmError::Spawn(_)));
    }
}
