//! Pipeline tuning: readiness timeouts, poll cadence and working directory

use std::path::PathBuf;
use std::time::Duration;

use capv_common::retry::POLL_INTERVAL;
use capv_common::workdir::default_base_dir;

use crate::manifests::CALICO_MANIFEST;
use crate::Result;

/// Wait for the kind node to report Ready
pub const DEFAULT_BOOTSTRAP_READY_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Wait for the CAPI and CAPV controllers after `clusterctl init`
pub const DEFAULT_PROVIDER_READY_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Wait for every machine to reach Running
pub const DEFAULT_MACHINES_TIMEOUT: Duration = Duration::from_secs(15 * 60);
/// Wait for every permanent node to report Ready
pub const DEFAULT_NODES_TIMEOUT: Duration = Duration::from_secs(15 * 60);
/// Wait for the KubeadmControlPlane before moving
pub const DEFAULT_CONTROL_PLANE_READY_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Runtime knobs for [`crate::ProvisioningPipeline`]
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Parent of the per-cluster directories
    pub base_dir: PathBuf,
    /// Interval between readiness checks
    pub poll_interval: Duration,
    /// Wait for the kind cluster API server
    pub bootstrap_ready_timeout: Duration,
    /// Wait for the Cluster API providers
    pub provider_ready_timeout: Duration,
    /// Wait for every machine to be provisioned
    pub machines_timeout: Duration,
    /// Wait for every node to be Ready
    pub nodes_timeout: Duration,
    /// Wait for the KubeadmControlPlane to be ready
    pub control_plane_ready_timeout: Duration,
    /// Pod network manifest applied to the permanent cluster
    pub cni_manifest: String,
}

impl PipelineConfig {
    /// Defaults rooted at `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            poll_interval: POLL_INTERVAL,
            bootstrap_ready_timeout: DEFAULT_BOOTSTRAP_READY_TIMEOUT,
            provider_ready_timeout: DEFAULT_PROVIDER_READY_TIMEOUT,
            machines_timeout: DEFAULT_MACHINES_TIMEOUT,
            nodes_timeout: DEFAULT_NODES_TIMEOUT,
            control_plane_ready_timeout: DEFAULT_CONTROL_PLANE_READY_TIMEOUT,
            cni_manifest: CALICO_MANIFEST.to_string(),
        }
    }

    /// Defaults rooted at `~/.capv-bootstrap`
    pub fn in_home() -> Result<Self> {
        Ok(Self::new(default_base_dir()?))
    }

    /// Override the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Apply one timeout to every readiness wait
    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_ready_timeout = timeout;
        self.provider_ready_timeout = timeout;
        self.machines_timeout = timeout;
        self.nodes_timeout = timeout;
        self.control_plane_ready_timeout = timeout;
        self
    }
}
