//! Runtime configuration
//!
//! Retry, wait and rollback settings shared by every stage. Values come from
//! command-line flags with `EKS_PROVISIONER_*` environment fallbacks.

use crate::backoff::RetryConfig;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

/// Settings every stage reads; never mutated during a run
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    pub retry: RetryConfig,
    /// Interval between AWS describe calls while waiting for `ACTIVE`
    pub aws_poll_interval: Duration,
    pub cluster_timeout: Duration,
    /// Fargate profile and node group creation
    pub capacity_timeout: Duration,
    /// Interval between Kubernetes readiness checks
    pub kube_poll_interval: Duration,
    pub rollout_timeout: Duration,
    pub ingress_timeout: Duration,
    /// Consecutive healthy polls before the controller counts as ready
    pub health_polls: u32,
    pub health_interval: Duration,
    pub health_timeout: Duration,
    /// Passed to `helm upgrade --wait --timeout`
    pub helm_timeout: Duration,
    /// Undo a failed Kubernetes batch
    pub rollback_on_failure: bool,
    /// `helm rollback` after an upgrade that never became healthy
    pub rollback_release: bool,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            aws_poll_interval: Duration::from_secs(15),
            cluster_timeout: Duration::from_secs(30 * 60),
            capacity_timeout: Duration::from_secs(15 * 60),
            kube_poll_interval: Duration::from_secs(5),
            rollout_timeout: Duration::from_secs(5 * 60),
            ingress_timeout: Duration::from_secs(10 * 60),
            health_polls: 3,
            health_interval: Duration::from_secs(5),
            health_timeout: Duration::from_secs(5 * 60),
            helm_timeout: Duration::from_secs(5 * 60),
            rollback_on_failure: false,
            rollback_release: true,
        }
    }
}

/// Flags shared by every subcommand
#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    /// Attempts per external call before a transient error is reported
    #[arg(long, env = "EKS_PROVISIONER_MAX_ATTEMPTS", default_value_t = 5, global = true)]
    pub max_attempts: u32,

    /// First backoff delay in milliseconds (doubles per attempt, with jitter)
    #[arg(long, env = "EKS_PROVISIONER_INITIAL_BACKOFF_MS", default_value_t = 500, global = true)]
    pub initial_backoff_ms: u64,

    #[arg(long, env = "EKS_PROVISIONER_MAX_BACKOFF_SECS", default_value_t = 30, global = true)]
    pub max_backoff_secs: u64,

    /// Seconds to wait for the EKS control plane to become ACTIVE
    #[arg(long, env = "EKS_PROVISIONER_CLUSTER_TIMEOUT_SECS", default_value_t = 1800, global = true)]
    pub cluster_timeout_secs: u64,

    /// Seconds to wait for Fargate profiles and node groups
    #[arg(long, env = "EKS_PROVISIONER_CAPACITY_TIMEOUT_SECS", default_value_t = 900, global = true)]
    pub capacity_timeout_secs: u64,

    #[arg(long, env = "EKS_PROVISIONER_AWS_POLL_SECS", default_value_t = 15, global = true)]
    pub aws_poll_secs: u64,

    /// Seconds to wait for Deployments to become available
    #[arg(long, env = "EKS_PROVISIONER_ROLLOUT_TIMEOUT_SECS", default_value_t = 300, global = true)]
    pub rollout_timeout_secs: u64,

    /// Seconds to wait for an Ingress to get its load balancer address
    #[arg(long, env = "EKS_PROVISIONER_INGRESS_TIMEOUT_SECS", default_value_t = 600, global = true)]
    pub ingress_timeout_secs: u64,

    #[arg(long, env = "EKS_PROVISIONER_KUBE_POLL_SECS", default_value_t = 5, global = true)]
    pub kube_poll_secs: u64,

    /// Consecutive healthy polls required before the controller is Ready
    #[arg(long, env = "EKS_PROVISIONER_HEALTH_POLLS", default_value_t = 3, global = true)]
    pub health_polls: u32,

    #[arg(long, env = "EKS_PROVISIONER_HEALTH_INTERVAL_SECS", default_value_t = 5, global = true)]
    pub health_interval_secs: u64,

    #[arg(long, env = "EKS_PROVISIONER_HEALTH_TIMEOUT_SECS", default_value_t = 300, global = true)]
    pub health_timeout_secs: u64,

    /// `helm upgrade --wait --timeout` in seconds
    #[arg(long, env = "EKS_PROVISIONER_HELM_TIMEOUT_SECS", default_value_t = 300, global = true)]
    pub helm_timeout_secs: u64,

    /// Undo created/updated Kubernetes resources when a batch fails
    #[arg(long, env = "EKS_PROVISIONER_ROLLBACK_ON_FAILURE", global = true)]
    pub rollback_on_failure: bool,

    /// Keep a controller upgrade that never became healthy instead of rolling it back
    #[arg(long, env = "EKS_PROVISIONER_NO_RELEASE_ROLLBACK", global = true)]
    pub no_release_rollback: bool,

    /// AWS CLI profile
    #[arg(long, env = "AWS_PROFILE", global = true)]
    pub aws_profile: Option<String>,

    /// Kubeconfig written by `aws eks update-kubeconfig` (default `~/.kube/config`)
    #[arg(long, env = "KUBECONFIG", global = true)]
    pub kubeconfig: Option<PathBuf>,

    #[arg(long, env = "EKS_PROVISIONER_AWS_BINARY", default_value = "aws", global = true)]
    pub aws_binary: String,

    #[arg(long, env = "EKS_PROVISIONER_HELM_BINARY", default_value = "helm", global = true)]
    pub helm_binary: String,
}

impl RuntimeArgs {
    pub fn provisioner_config(&self) -> ProvisionerConfig {
        ProvisionerConfig {
            retry: RetryConfig {
                max_attempts: self.max_attempts.max(1),
                initial_delay: Duration::from_millis(self.initial_backoff_ms),
                max_delay: Duration::from_secs(self.max_backoff_secs),
                ..RetryConfig::default()
            },
            aws_poll_interval: Duration::from_secs(self.aws_poll_secs),
            cluster_timeout: Duration::from_secs(self.cluster_timeout_secs),
            capacity_timeout: Duration::from_secs(self.capacity_timeout_secs),
            kube_poll_interval: Duration::from_secs(self.kube_poll_secs),
            rollout_timeout: Duration::from_secs(self.rollout_timeout_secs),
            ingress_timeout: Duration::from_secs(self.ingress_timeout_secs),
            health_polls: self.health_polls.max(1),
            health_interval: Duration::from_secs(self.health_interval_secs),
            health_timeout: Duration::from_secs(self.health_timeout_secs),
            helm_timeout: Duration::from_secs(self.helm_timeout_secs),
            rollback_on_failure: self.rollback_on_failure,
            rollback_release: !self.no_release_rollback,
        }
    }

    /// Kubeconfig path, falling back to `$HOME/.kube/config`.
    ///
    /// A `KUBECONFIG` list resolves to its first entry, the file
    /// `aws eks update-kubeconfig` writes to.
    pub fn kubeconfig_path(&self) -> PathBuf {
        self.kubeconfig
            .as_ref()
            .and_then(|list| std::env::split_paths(list).find(|p| !p.as_os_str().is_empty()))
            .unwrap_or_else(|| {
                let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
                home.join(".kube").join("config")
            })
    }
}
