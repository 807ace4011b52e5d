//! EKS Provisioner
//!
//! Idempotent replacement for the manual EKS procedure:
//! - Cluster: control plane, IAM roles, OIDC provider, Fargate profiles or a node group
//! - Workload: Deployments, Services and raw manifests
//! - Controller: AWS Load Balancer Controller with its IAM policy and service account
//! - Ingress: Ingress objects and their load balancer address
//!
//! Every command can be re-run; a converged cluster produces no changes.

mod backoff;
mod config;
mod connector;
mod context;
mod driver;
mod error;
mod installer;
mod reconcile_helpers;
mod reconciler;
mod report;

#[cfg(test)]
mod test_utils;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use cluster_model::DesiredState;
use config::RuntimeArgs;
use connector::EksConnector;
use context::RunContext;
use driver::{Driver, Plan};
use reconcile_helpers::ReconcileMode;
use report::RunReport;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "eks-provisioner", version, about = "Provision EKS clusters and expose workloads through an ALB ingress")]
struct Cli {
    #[arg(long, value_enum, env = "EKS_PROVISIONER_LOG_FORMAT", default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Write the run report(s) as JSON to this file
    #[arg(long, global = true)]
    report_file: Option<PathBuf>,

    #[command(flatten)]
    runtime: RuntimeArgs,

    #[command(subcommand)]
    command: Command,
}

/// Which cluster a single-cluster command targets
#[derive(Debug, Clone, Args)]
struct ClusterArgs {
    /// Cluster name; must match the spec file when both are given
    #[arg(long)]
    name: Option<String>,

    /// AWS region; must match the spec file when both are given
    #[arg(long)]
    region: Option<String>,

    #[arg(long, short = 'f')]
    spec_file: PathBuf,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// EKS control plane, IAM and capacity
    #[command(subcommand)]
    Cluster(ClusterCommand),

    /// Core workload manifests
    #[command(subcommand)]
    Workload(ApplyCommand),

    /// Ingress objects
    #[command(subcommand)]
    Ingress(ApplyCommand),

    /// AWS Load Balancer Controller
    #[command(subcommand)]
    Controller(ControllerCommand),

    /// Every stage for one or more clusters, in parallel
    Converge {
        #[arg(long = "spec-file", short = 'f', required = true, num_args = 1..)]
        spec_files: Vec<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
enum ClusterCommand {
    /// Create or converge the cluster
    Create(ClusterArgs),
    /// Report drift without changing anything
    Verify(ClusterArgs),
}

#[derive(Debug, Subcommand)]
enum ApplyCommand {
    Apply(ClusterArgs),
}

#[derive(Debug, Subcommand)]
enum ControllerCommand {
    /// Install or upgrade the controller
    Install(ClusterArgs),
    /// Print how far the installation got
    Status(ClusterArgs),
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().with_current_span(true).init(),
    }
}

fn load_desired(path: &Path, name: Option<&str>, region: Option<&str>) -> anyhow::Result<DesiredState> {
    DesiredState::load(path)
        .and_then(|desired| desired.with_cluster_identity(name, region))
        .with_context(|| format!("failed to load spec file {}", path.display()))
}

fn write_reports(path: &Path, reports: &[RunReport]) -> anyhow::Result<()> {
    let json = match reports {
        [single] => serde_json::to_string_pretty(single)?,
        many => serde_json::to_string_pretty(many)?,
    };
    std::fs::write(path, json).with_context(|| format!("failed to write report to {}", path.display()))
}

/// Exit code of the first run that did not converge
fn exit_code(reports: &[RunReport]) -> u8 {
    reports
        .iter()
        .map(RunReport::exit_code)
        .find(|code| *code != 0)
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    // kube-rs needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping after the current step");
                cancel.cancel();
            }
        });
    }

    let config = cli.runtime.provisioner_config();
    let connector = EksConnector {
        aws_profile: cli.runtime.aws_profile.clone(),
        aws_binary: cli.runtime.aws_binary.clone(),
        helm_binary: cli.runtime.helm_binary.clone(),
        kubeconfig: cli.runtime.kubeconfig_path(),
        call_timeout: Duration::from_secs(120),
    };
    let ctx = RunContext::new(Arc::new(config), cancel);
    let driver = Arc::new(Driver::new(Arc::new(connector), ctx));

    let (args, plan) = match cli.command {
        Command::Converge { spec_files } => {
            let mut desired = Vec::with_capacity(spec_files.len());
            for path in &spec_files {
                match load_desired(path, None, None) {
                    Ok(state) => desired.push(state),
                    Err(e) => {
                        error!("{:#}", e);
                        return ExitCode::from(2);
                    }
                }
            }
            info!("Converging {} cluster(s)", desired.len());
            let reports = driver.run_all(desired, Plan::converge()).await;
            return finish(cli.report_file.as_deref(), &reports);
        }
        Command::Controller(ControllerCommand::Status(args)) => {
            return controller_status(&driver, &args).await;
        }
        Command::Cluster(ClusterCommand::Create(args)) => (args, Plan::cluster(ReconcileMode::Apply)),
        Command::Cluster(ClusterCommand::Verify(args)) => (args, Plan::cluster(ReconcileMode::Verify)),
        Command::Workload(ApplyCommand::Apply(args)) => (args, Plan::workload()),
        Command::Ingress(ApplyCommand::Apply(args)) => (args, Plan::ingress()),
        Command::Controller(ControllerCommand::Install(args)) => (args, Plan::controller()),
    };

    let desired = match load_desired(&args.spec_file, args.name.as_deref(), args.region.as_deref()) {
        Ok(desired) => desired,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(2);
        }
    };
    let report = driver.run(&desired, &plan).await;
    finish(cli.report_file.as_deref(), std::slice::from_ref(&report))
}

async fn controller_status(driver: &Driver, args: &ClusterArgs) -> ExitCode {
    let desired = match load_desired(&args.spec_file, args.name.as_deref(), args.region.as_deref()) {
        Ok(desired) => desired,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(2);
        }
    };
    match driver.controller_state(&desired).await {
        Ok(state) => {
            info!("Controller for cluster {} is {}", desired.cluster.name, state);
            println!("{}", state);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to observe the controller: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn finish(report_file: Option<&Path>, reports: &[RunReport]) -> ExitCode {
    if let Some(path) = report_file {
        if let Err(e) = write_reports(path, reports) {
            error!("{:#}", e);
        }
    }
    for report in reports {
        let summary = serde_json::json!({
            "cluster": report.cluster,
            "region": report.region,
            "converged": report.converged(),
            "mutations": report.mutation_count(),
            "error": report.error.as_ref().map(|e| &e.message),
        });
        println!("{}", summary);
    }
    ExitCode::from(exit_code(reports))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_every_command() {
        let cli = Cli::parse_from(["eks-provisioner", "cluster", "create", "--name", "demo-cluster", "-f", "demo.yaml"]);
        assert!(matches!(cli.command, Command::Cluster(ClusterCommand::Create(_))));

        let cli = Cli::parse_from(["eks-provisioner", "converge", "-f", "a.yaml", "b.yaml", "--log-format", "json"]);
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Command::Converge { spec_files } => assert_eq!(spec_files.len(), 2),
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::parse_from(["eks-provisioner", "controller", "status", "-f", "demo.yaml"]);
        assert!(matches!(cli.command, Command::Controller(ControllerCommand::Status(_))));
    }

    #[test]
    fn test_exit_code_is_first_failure() {
        use crate::error::ProvisionerError;
        use crate::report::Stage;

        let ok = RunReport::new(uuid::Uuid::nil(), "a", "us-east-1");
        let mut conflict = RunReport::new(uuid::Uuid::nil(), "b", "us-east-1");
        conflict.fail(Stage::AwsReconcile, &ProvisionerError::Conflict("version".to_string()));
        let mut timeout = RunReport::new(uuid::Uuid::nil(), "c", "us-east-1");
        timeout.fail(Stage::Ingress, &ProvisionerError::Timeout("address".to_string()));

        assert_eq!(exit_code(&[ok.clone()]), 0);
        assert_eq!(exit_code(&[ok, conflict, timeout]), 3);
    }
}
