//! Bootstrap-then-pivot provisioning pipeline.
//!
//! The pipeline walks a fixed sequence of phases, each moving the run one
//! state forward:
//!
//! ```text
//! Idle -> PreflightChecked -> BootstrapCreated -> ControlPlaneInstalled
//!      -> PermanentCreated -> ControlPlanePivoted -> [AddonsInstalled] -> Complete
//! ```
//!
//! A phase that fails stops the run. Its error is wrapped in
//! [`Error::Phase`] and nothing after it executes or emits events. Every
//! phase that succeeds sends exactly one checkpoint event.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use capv_common::{
    ClusterDir, CommandInvocation, CommandRunner, CommandRunnerExt, EventSender, LogSink,
    ProvisioningSpec, RetryPoller, CLUSTERCTL, KUBECTL,
};
use tracing::{error, info};

use crate::addons::{default_installers, install_addons, AddonInstaller};
use crate::config::PipelineConfig;
use crate::phases;
use crate::{Error, Result};

// =============================================================================
// Phases and states
// =============================================================================

/// A unit of work in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Check tools and the cluster directory
    Preflight,
    /// Create the kind bootstrap cluster
    CreateBootstrap,
    /// Install Cluster API and CAPV on the bootstrap cluster
    InstallControlPlane,
    /// Build the permanent cluster from the bootstrap one
    CreatePermanent,
    /// Move the management objects onto the permanent cluster
    PivotControlPlane,
    /// Run the enabled addon installers
    InstallAddons,
}

impl Phase {
    /// State reached once this phase succeeds
    pub fn completes(&self) -> PipelineState {
        match self {
            Self::Preflight => PipelineState::PreflightChecked,
            Self::CreateBootstrap => PipelineState::BootstrapCreated,
            Self::InstallControlPlane => PipelineState::ControlPlaneInstalled,
            Self::CreatePermanent => PipelineState::PermanentCreated,
            Self::PivotControlPlane => PipelineState::ControlPlanePivoted,
            Self::InstallAddons => PipelineState::AddonsInstalled,
        }
    }

    /// Message carried by the checkpoint event
    pub fn checkpoint(&self) -> &'static str {
        match self {
            Self::Preflight => "Preflight checks passed",
            Self::CreateBootstrap => "Bootstrap cluster created",
            Self::InstallControlPlane => "CAPv installed successfully",
            Self::CreatePermanent => "Permanent management cluster created",
            Self::PivotControlPlane => "Move to Permanent management cluster complete",
            Self::InstallAddons => "Addon installation complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preflight => "Preflight",
            Self::CreateBootstrap => "CreateBootstrap",
            Self::InstallControlPlane => "InstallControlPlane",
            Self::CreatePermanent => "CreatePermanent",
            Self::PivotControlPlane => "PivotControlPlane",
            Self::InstallAddons => "InstallAddons",
        };
        f.write_str(name)
    }
}

/// Where a run is. Ordered: a run only ever moves to a greater state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    /// Nothing has run
    #[default]
    Idle,
    /// Tools and directory verified
    PreflightChecked,
    /// kind cluster is up
    BootstrapCreated,
    /// Providers are running on the bootstrap cluster
    ControlPlaneInstalled,
    /// Permanent cluster is reachable
    PermanentCreated,
    /// Management objects live on the permanent cluster
    ControlPlanePivoted,
    /// Addons are installed
    AddonsInstalled,
    /// Run finished
    Complete,
}

// =============================================================================
// Shared phase context
// =============================================================================

/// Everything a phase needs: the provisioning config, a command runner and a work directory
#[derive(Clone)]
pub struct PhaseContext {
    /// Provisioning config for the run
    pub spec: Arc<ProvisioningSpec>,
    /// Runs every external command
    pub runner: Arc<dyn CommandRunner>,
    /// Readiness polling
    pub poller: RetryPoller,
    /// Progress and checkpoint events
    pub events: EventSender,
    /// Per-cluster work directory
    pub dir: ClusterDir,
    /// Timeouts and paths
    pub config: PipelineConfig,
}

impl PhaseContext {
    /// Context for one run; the work directory is derived from `config.base_dir`
    pub fn new(
        spec: Arc<ProvisioningSpec>,
        runner: Arc<dyn CommandRunner>,
        sink: LogSink,
        events: EventSender,
        config: PipelineConfig,
    ) -> Self {
        let dir = ClusterDir::new(&config.base_dir, &spec.cluster_name);
        let poller = RetryPoller::new(runner.clone(), sink).with_interval(config.poll_interval);
        Self {
            spec,
            runner,
            poller,
            events,
            dir,
            config,
        }
    }

    /// Name of the throwaway kind cluster
    pub fn bootstrap_cluster_name(&self) -> String {
        format!("{}-bootstrap", self.spec.cluster_name)
    }

    /// `kubectl` against the cluster behind `kubeconfig`
    pub fn kubectl(&self, kubeconfig: &Path) -> CommandInvocation {
        CommandInvocation::new(KUBECTL).kubeconfig(kubeconfig)
    }

    /// `clusterctl` with the vSphere provider variables set
    pub fn clusterctl(&self, kubeconfig: &Path) -> CommandInvocation {
        let spec = &self.spec;
        let vsphere = &spec.vsphere;
        CommandInvocation::new(CLUSTERCTL)
            .envs([
                ("VSPHERE_PASSWORD", vsphere.vsphere_password.as_str()),
                ("VSPHERE_USERNAME", vsphere.vsphere_username.as_str()),
                ("VSPHERE_SERVER", vsphere.vcenter_server.as_str()),
                ("VSPHERE_DATACENTER", vsphere.datacenter.as_str()),
                ("VSPHERE_DATASTORE", vsphere.datastore.as_str()),
                ("VSPHERE_NETWORK", vsphere.management_network.as_str()),
                ("VSPHERE_RESOURCE_POOL", vsphere.resource_pool.as_str()),
                ("VSPHERE_FOLDER", vsphere.folder.as_str()),
                ("VSPHERE_TEMPLATE", spec.node_template.as_str()),
                ("VSPHERE_HAPROXY_TEMPLATE", spec.load_balancer_template.as_str()),
                ("VSPHERE_SSH_AUTHORIZED_KEY", spec.ssh_authorized_key.as_str()),
            ])
            .kubeconfig(kubeconfig)
    }

    /// SolidFire with a dedicated storage network needs the kustomized manifest
    pub fn uses_storage_network(&self) -> bool {
        self.spec.addons.solidfire.enable && !self.spec.vsphere.storage_network.is_empty()
    }

    /// The cluster manifest applied to the bootstrap cluster
    pub fn cluster_manifest(&self) -> PathBuf {
        if self.uses_storage_network() {
            self.dir.final_config(&self.spec.cluster_name)
        } else {
            self.dir.capi_config(&self.spec.cluster_name)
        }
    }

    /// Run a command, discarding its output
    pub async fn run(&self, invocation: CommandInvocation) -> Result<()> {
        Ok(self.runner.run(&invocation).await?)
    }

    /// Run a command and return its stdout
    pub async fn output(&self, invocation: CommandInvocation) -> Result<String> {
        Ok(self.runner.output(&invocation).await?)
    }

    /// `kubectl apply --filename=<source>`; `source` may be a path or URL
    pub async fn apply(&self, kubeconfig: &Path, source: &str) -> Result<()> {
        self.run(
            self.kubectl(kubeconfig)
                .arg("apply")
                .arg(format!("--filename={}", source)),
        )
        .await
    }

    /// Poll until `expected` occurrences of `match_text` show up
    pub async fn wait_for(
        &self,
        invocation: CommandInvocation,
        timeout: Duration,
        match_text: &str,
        expected: usize,
    ) -> Result<()> {
        Ok(self
            .poller
            .poll_until(&invocation, timeout, match_text, expected, &self.events)
            .await?)
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives one cluster from nothing to a pivoted management cluster
pub struct ProvisioningPipeline {
    ctx: PhaseContext,
    addons: Vec<Arc<dyn AddonInstaller>>,
    state: PipelineState,
}

impl ProvisioningPipeline {
    /// A pipeline with the built-in addon installers
    pub fn new(ctx: PhaseContext) -> Self {
        Self {
            ctx,
            addons: default_installers(),
            state: PipelineState::Idle,
        }
    }

    /// Replace the addon installers
    pub fn with_addons(mut self, addons: Vec<Arc<dyn AddonInstaller>>) -> Self {
        self.addons = addons;
        self
    }

    /// Last state reached
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Context shared by the phases
    pub fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    /// Phases this run will execute, in order
    pub fn phases(&self) -> Vec<Phase> {
        let mut phases = vec![
            Phase::Preflight,
            Phase::CreateBootstrap,
            Phase::InstallControlPlane,
            Phase::CreatePermanent,
            Phase::PivotControlPlane,
        ];
        if self.addons.iter().any(|a| a.enabled(&self.ctx.spec)) {
            phases.push(Phase::InstallAddons);
        }
        phases
    }

    /// Run every phase in order.
    ///
    /// Returns [`PipelineState::Complete`] on success. A run can only be
    /// driven once; later calls fail validation.
    pub async fn run(&mut self) -> Result<PipelineState> {
        if self.state != PipelineState::Idle {
            return Err(capv_common::Error::validation("pipeline has already been run").into());
        }

        let cluster = self.ctx.spec.cluster_name.clone();
        for phase in self.phases() {
            info!(cluster = %cluster, phase = %phase, "starting phase");
            if let Err(e) = self.run_phase(phase).await {
                error!(cluster = %cluster, phase = %phase, error = %e, "phase failed");
                return Err(Error::phase(phase, e));
            }
            self.advance(phase.completes());
            self.ctx.events.checkpoint(phase.checkpoint());
            info!(cluster = %cluster, phase = %phase, "phase complete");
        }

        self.advance(PipelineState::Complete);
        Ok(self.state)
    }

    async fn run_phase(&self, phase: Phase) -> Result<()> {
        let ctx = &self.ctx;
        match phase {
            Phase::Preflight => phases::preflight::run(ctx).await,
            Phase::CreateBootstrap => phases::bootstrap::run(ctx).await,
            Phase::InstallControlPlane => phases::install::run(ctx).await,
            Phase::CreatePermanent => phases::permanent::run(ctx).await,
            Phase::PivotControlPlane => phases::pivot::run(ctx).await,
            Phase::InstallAddons => install_addons(&self.addons, ctx).await,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert!(next > self.state, "pipeline state must move forward");
        self.state = next;
    }
}
