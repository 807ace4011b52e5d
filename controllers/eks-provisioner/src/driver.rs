//! Orchestration driver
//!
//! Runs the stages for one cluster in order:
//!
//! 1. validate the desired state
//! 2. AWS reconcile (control plane, IAM, OIDC, capacity)
//! 3. core workload (Deployments, Services, raw manifests)
//! 4. controller install
//! 5. ingress, reporting the load balancer address
//!
//! The first failing stage stops the run and later stages are reported as
//! skipped. Nothing already done is unwound. Runs against the same cluster
//! are serialized; different clusters run in parallel tasks.

use crate::connector::{ClusterConnector, ClusterSession};
use crate::context::RunContext;
use crate::error::ProvisionerError;
use crate::installer::{ControllerInstaller, InstallerState};
use crate::reconcile_helpers::ReconcileMode;
use crate::reconciler::aws::{AwsReconciler, ClusterState};
use crate::reconciler::kubernetes::{KubeReconciler, key_name};
use crate::report::{RunReport, Stage, StageRecorder, StageReport, StageStatus};
use chrono::{DateTime, Utc};
use cluster_model::DesiredState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

/// Which stages a command runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    /// `None` skips the AWS stage entirely
    pub aws: Option<ReconcileMode>,
    pub core_workload: bool,
    pub controller: bool,
    pub ingress: bool,
}

impl Plan {
    /// Every stage, applying changes
    pub fn converge() -> Self {
        Self {
            aws: Some(ReconcileMode::Apply),
            core_workload: true,
            controller: true,
            ingress: true,
        }
    }

    pub fn cluster(mode: ReconcileMode) -> Self {
        Self {
            aws: Some(mode),
            core_workload: false,
            controller: false,
            ingress: false,
        }
    }

    pub fn workload() -> Self {
        Self {
            aws: None,
            core_workload: true,
            controller: false,
            ingress: false,
        }
    }

    /// The installer needs the VPC and OIDC provider, so the cluster is verified first
    pub fn controller() -> Self {
        Self {
            aws: Some(ReconcileMode::Verify),
            core_workload: false,
            controller: true,
            ingress: false,
        }
    }

    pub fn ingress() -> Self {
        Self {
            aws: None,
            core_workload: false,
            controller: false,
            ingress: true,
        }
    }

    /// Stages in execution order
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = vec![Stage::Validate];
        if self.aws.is_some() {
            stages.push(Stage::AwsReconcile);
        }
        if self.core_workload {
            stages.push(Stage::CoreWorkload);
        }
        if self.controller {
            stages.push(Stage::ControllerInstall);
        }
        if self.ingress {
            stages.push(Stage::Ingress);
        }
        stages
    }
}

/// Start time of a stage, turned into a `StageReport` when it ends
struct StageClock {
    stage: Stage,
    started_at: DateTime<Utc>,
    timer: Instant,
}

impl StageClock {
    fn start(stage: Stage) -> Self {
        info!("Stage {} started", stage);
        Self {
            stage,
            started_at: Utc::now(),
            timer: Instant::now(),
        }
    }

    /// Record the stage outcome; `None` means the run stops here
    fn finish<T>(
        self,
        report: &mut RunReport,
        recorder: StageRecorder,
        result: Result<T, ProvisionerError>,
    ) -> Option<T> {
        let duration_ms = u64::try_from(self.timer.elapsed().as_millis()).unwrap_or(u64::MAX);
        let (status, value) = match result {
            Ok(value) => {
                info!("Stage {} succeeded in {}ms", self.stage, duration_ms);
                (StageStatus::Succeeded, Some(value))
            }
            Err(e) => {
                error!(class = %e.class(), "Stage {} failed: {}", self.stage, e);
                report.fail(self.stage, &e);
                (StageStatus::Failed, None)
            }
        };
        report.stages.push(StageReport {
            stage: self.stage,
            status,
            started_at: self.started_at,
            duration_ms,
            resources: recorder.resources,
            warnings: recorder.warnings,
        });
        value
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs plans against clusters
pub struct Driver {
    connector: Arc<dyn ClusterConnector>,
    ctx: RunContext,
    // One lock per `region/name`
    cluster_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver").field("ctx", &self.ctx).finish_non_exhaustive()
    }
}

impl Driver {
    pub fn new(connector: Arc<dyn ClusterConnector>, ctx: RunContext) -> Self {
        Self {
            connector,
            ctx,
            cluster_locks: Mutex::new(HashMap::new()),
        }
    }

    fn cluster_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(lock(&self.cluster_locks).entry(key.to_string()).or_default())
    }

    /// Run `plan` against the cluster `desired` describes
    pub async fn run(&self, desired: &DesiredState, plan: &Plan) -> RunReport {
        let run_id = Uuid::new_v4();
        let spec = &desired.cluster;
        let span = info_span!("run", cluster = %spec.name, region = %spec.region, %run_id);

        async {
            let cluster_lock = self.cluster_lock(&spec.key());
            let _guard = cluster_lock.lock().await;

            let mut report = RunReport::new(run_id, &spec.name, &spec.region);
            self.execute(desired, plan, &mut report).await;

            for stage in plan.stages() {
                if report.stage(stage).is_none() {
                    report.stages.push(StageReport {
                        stage,
                        status: StageStatus::Skipped,
                        started_at: Utc::now(),
                        duration_ms: 0,
                        resources: Vec::new(),
                        warnings: Vec::new(),
                    });
                }
            }
            report.finished_at = Utc::now();

            if report.converged() {
                info!(mutations = report.mutation_count(), "Cluster {} converged", spec.name);
            } else {
                error!(exit_code = report.exit_code(), "Cluster {} did not converge", spec.name);
            }
            report
        }
        .instrument(span)
        .await
    }

    /// Run several clusters in parallel; reports come back in input order
    pub async fn run_all(self: Arc<Self>, desired: Vec<DesiredState>, plan: Plan) -> Vec<RunReport> {
        let handles: Vec<_> = desired
            .into_iter()
            .map(|desired| {
                let driver = Arc::clone(&self);
                let identity = (desired.cluster.name.clone(), desired.cluster.region.clone());
                let handle = tokio::spawn(async move { driver.run(&desired, &plan).await });
                (identity, handle)
            })
            .collect();

        let (identities, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        futures::future::join_all(handles)
            .await
            .into_iter()
            .zip(identities)
            .map(|(joined, (name, region))| {
                joined.unwrap_or_else(|e| {
                    error!("Run for cluster {} aborted: {}", name, e);
                    let mut report = RunReport::new(Uuid::new_v4(), &name, &region);
                    report.fail(Stage::Validate, &ProvisionerError::Internal(e.to_string()));
                    report
                })
            })
            .collect()
    }

    /// Furthest controller installer state already reached. Changes nothing.
    pub async fn controller_state(&self, desired: &DesiredState) -> Result<InstallerState, ProvisionerError> {
        desired.validate()?;
        let spec = &desired.cluster;
        let aws = self.connector.aws(&spec.region);
        let cluster = AwsReconciler::new(Arc::clone(&aws), self.ctx.clone(), ReconcileMode::Verify)
            .reconcile(spec, &mut StageRecorder::default())
            .await?;
        let release = desired.controller_release().ok_or_else(|| {
            ProvisionerError::InvalidConfig(format!("cluster {} declares no controller", spec.name))
        })?;
        let session = self.connector.connect(spec).await?;
        ControllerInstaller::new(aws, session.kube, session.helm, self.ctx.clone())?
            .observe(spec, &cluster, &release)
            .await
    }

    async fn execute(&self, desired: &DesiredState, plan: &Plan, report: &mut RunReport) {
        let spec = &desired.cluster;

        let clock = StageClock::start(Stage::Validate);
        let result = self
            .ctx
            .checkpoint()
            .and_then(|()| desired.validate().map_err(ProvisionerError::from));
        if clock.finish(report, StageRecorder::default(), result).is_none() {
            return;
        }

        let mut cluster: Option<ClusterState> = None;
        if let Some(mode) = plan.aws {
            let clock = StageClock::start(Stage::AwsReconcile);
            let mut recorder = StageRecorder::default();
            let reconciler = AwsReconciler::new(self.connector.aws(&spec.region), self.ctx.clone(), mode);
            let result = reconciler.reconcile(spec, &mut recorder).await;
            match clock.finish(report, recorder, result) {
                Some(state) => cluster = Some(state),
                None => return,
            }
        }

        let mut session: Option<ClusterSession> = None;

        if plan.core_workload {
            let clock = StageClock::start(Stage::CoreWorkload);
            let mut recorder = StageRecorder::default();
            let result = self.apply_core_workload(desired, &mut session, &mut recorder).await;
            if clock.finish(report, recorder, result).is_none() {
                return;
            }
        }

        if plan.controller {
            let clock = StageClock::start(Stage::ControllerInstall);
            let mut recorder = StageRecorder::default();
            let result = self
                .install_controller(desired, cluster.as_ref(), &mut session, &mut recorder)
                .await;
            if clock.finish(report, recorder, result).is_none() {
                return;
            }
        }

        if plan.ingress {
            let clock = StageClock::start(Stage::Ingress);
            let mut recorder = StageRecorder::default();
            let result = self.apply_ingress(desired, &mut session, &mut recorder).await;
            clock.finish(report, recorder, result);
        }
    }

    /// Connect on first use; later stages reuse the session
    async fn session(
        &self,
        cached: &mut Option<ClusterSession>,
        desired: &DesiredState,
    ) -> Result<ClusterSession, ProvisionerError> {
        if let Some(session) = cached {
            return Ok(session.clone());
        }
        self.ctx.checkpoint()?;
        let session = self.connector.connect(&desired.cluster).await?;
        *cached = Some(session.clone());
        Ok(session)
    }

    async fn apply_core_workload(
        &self,
        desired: &DesiredState,
        session: &mut Option<ClusterSession>,
        recorder: &mut StageRecorder,
    ) -> Result<(), ProvisionerError> {
        let manifests = desired.core_manifests()?;
        let session = self.session(session, desired).await?;
        KubeReconciler::new(session.kube, self.ctx.clone())
            .apply_batch(&manifests, recorder)
            .await?;
        Ok(())
    }

    async fn install_controller(
        &self,
        desired: &DesiredState,
        cluster: Option<&ClusterState>,
        session: &mut Option<ClusterSession>,
        recorder: &mut StageRecorder,
    ) -> Result<(), ProvisionerError> {
        let cluster = cluster.ok_or_else(|| {
            ProvisionerError::InvalidConfig("controller install needs the AWS stage to run first".to_string())
        })?;
        let Some(release) = desired.controller_release() else {
            info!("No controller declared for cluster {}", desired.cluster.name);
            return Ok(());
        };
        let session = self.session(session, desired).await?;
        let installer = ControllerInstaller::new(
            self.connector.aws(&desired.cluster.region),
            session.kube,
            session.helm,
            self.ctx.clone(),
        )?;
        installer
            .install(&desired.cluster, cluster, &release, &desired.base_dir, recorder)
            .await?;
        Ok(())
    }

    async fn apply_ingress(
        &self,
        desired: &DesiredState,
        session: &mut Option<ClusterSession>,
        recorder: &mut StageRecorder,
    ) -> Result<(), ProvisionerError> {
        let manifests = desired.ingress_manifests()?;
        if manifests.is_empty() {
            info!("No ingresses declared");
            return Ok(());
        }
        let session = self.session(session, desired).await?;
        let reconciler = KubeReconciler::new(session.kube, self.ctx.clone());
        let applied = reconciler.apply_batch(&manifests, recorder).await?;

        for object in applied.iter().filter(|o| o.key.kind == "Ingress") {
            let address = reconciler.wait_for_ingress_address(&object.key).await?;
            recorder.set_message("Ingress", &key_name(&object.key), format!("address {}", address));
        }
        Ok(())
    }
}
