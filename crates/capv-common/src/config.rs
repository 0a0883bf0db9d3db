//! Provisioning configuration.
//!
//! [`ProvisioningSpec`] is read once (YAML, PascalCase keys as written by
//! `genconfig`) and shared read-only for the rest of the run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default cluster name when the config leaves it empty
pub const DEFAULT_CLUSTER_NAME: &str = "capv-mgmt-cluster";
/// Default number of control plane machines
pub const DEFAULT_CONTROL_PLANE_COUNT: u32 = 1;
/// Default number of worker machines
pub const DEFAULT_WORKER_COUNT: u32 = 2;
/// Default Kubernetes version for the permanent cluster
pub const DEFAULT_KUBERNETES_VERSION: &str = "v1.17.3";
/// Default namespace for the workload cluster objects
pub const DEFAULT_NAMESPACE: &str = "default";

/// Everything one bootstrap run needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ProvisioningSpec {
    /// Name of the permanent management cluster
    pub cluster_name: String,
    /// Control plane machine count
    pub control_plane_machine_count: u32,
    /// Worker machine count
    pub worker_machine_count: u32,
    /// Kubernetes version, e.g. `v1.17.3`
    pub kubernetes_version: String,
    /// Namespace created on the permanent cluster before the move
    pub namespace: String,
    /// Public key injected into every node
    #[serde(rename = "SSHAuthorizedKey")]
    pub ssh_authorized_key: String,
    /// VM template used for Kubernetes nodes
    pub node_template: String,
    /// VM template used for the HAProxy load balancer
    pub load_balancer_template: String,
    /// Audit log of all command output; discarded when unset
    pub log_file: Option<PathBuf>,
    /// vCenter endpoint and inventory selection
    #[serde(flatten)]
    pub vsphere: VsphereSpec,
    /// Optional post-pivot addons
    pub addons: Addons,
}

impl Default for ProvisioningSpec {
    fn default() -> Self {
        Self {
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            control_plane_machine_count: DEFAULT_CONTROL_PLANE_COUNT,
            worker_machine_count: DEFAULT_WORKER_COUNT,
            kubernetes_version: DEFAULT_KUBERNETES_VERSION.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            ssh_authorized_key: String::new(),
            node_template: String::new(),
            load_balancer_template: String::new(),
            log_file: None,
            vsphere: VsphereSpec::default(),
            addons: Addons::default(),
        }
    }
}

/// vCenter credentials and the inventory objects to provision into
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VsphereSpec {
    /// vCenter address (host or URL)
    pub vcenter_server: String,
    /// vCenter user
    pub vsphere_username: String,
    /// vCenter password
    pub vsphere_password: String,
    /// Skip TLS verification when talking to vCenter
    pub insecure: bool,
    /// Datacenter name
    pub datacenter: String,
    /// Datastore name
    pub datastore: String,
    /// VM folder path, slash separated
    pub folder: String,
    /// Resource pool name or path
    pub resource_pool: String,
    /// Network for node management traffic
    pub management_network: String,
    /// Network for workload traffic
    pub workload_network: String,
    /// Network for iSCSI storage traffic
    pub storage_network: String,
    /// Resolved datacenter id, when known
    #[serde(rename = "DatacenterID", skip_serializing_if = "Option::is_none")]
    pub datacenter_id: Option<String>,
    /// Resolved datastore id, when known
    #[serde(rename = "DatastoreID", skip_serializing_if = "Option::is_none")]
    pub datastore_id: Option<String>,
    /// Resolved resource pool id, when known
    #[serde(rename = "ResourcePoolID", skip_serializing_if = "Option::is_none")]
    pub resource_pool_id: Option<String>,
    /// Resolved management network id, when known
    #[serde(rename = "ManagementNetworkID", skip_serializing_if = "Option::is_none")]
    pub management_network_id: Option<String>,
    /// Resolved workload network id, when known
    #[serde(rename = "WorkloadNetworkID", skip_serializing_if = "Option::is_none")]
    pub workload_network_id: Option<String>,
    /// Resolved storage network id, when known
    #[serde(rename = "StorageNetworkID", skip_serializing_if = "Option::is_none")]
    pub storage_network_id: Option<String>,
}

/// Optional addons installed after the pivot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Addons {
    /// NetApp Trident against an Element (SolidFire) cluster
    pub solidfire: Solidfire,
    /// Observability stack from an archive
    pub observability: Observability,
}

impl Addons {
    /// Whether any addon is enabled
    pub fn any_enabled(&self) -> bool {
        self.solidfire.enable || self.observability.enable
    }
}

/// Element storage backend settings
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Solidfire {
    /// Install Trident and the SolidFire backend
    pub enable: bool,
    /// Management virtual IP
    #[serde(rename = "MVIP")]
    pub mvip: String,
    /// Storage virtual IP
    #[serde(rename = "SVIP")]
    pub svip: String,
    /// Element admin user
    pub user: String,
    /// Element admin password
    pub password: String,
}

impl std::fmt::Debug for Solidfire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Solidfire")
            .field("enable", &self.enable)
            .field("mvip", &self.mvip)
            .field("svip", &self.svip)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Observability archive settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Observability {
    /// Install the observability stack
    #[serde(alias = "Enabled")]
    pub enable: bool,
    /// Local path or http(s) URL of the `.tgz` archive
    pub archive_location: String,
}

impl ProvisioningSpec {
    /// Read a YAML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse YAML config contents
    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Serialize back to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Control plane plus worker machines
    pub fn total_machines(&self) -> usize {
        self.control_plane_machine_count as usize + self.worker_machine_count as usize
    }

    /// Check the fields every run needs
    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.is_empty() {
            return Err(Error::validation_for_field("ClusterName", "must not be empty"));
        }
        if !self
            .cluster_name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::validation_for_field(
                "ClusterName",
                format!(
                    "'{}' must contain only lowercase letters, digits and '-'",
                    self.cluster_name
                ),
            ));
        }
        if self.control_plane_machine_count == 0 {
            return Err(Error::validation_for_field(
                "ControlPlaneMachineCount",
                "at least one control plane machine is required",
            ));
        }
        if self.kubernetes_version.is_empty() {
            return Err(Error::validation_for_field("KubernetesVersion", "must not be empty"));
        }
        if self.vsphere.vcenter_server.is_empty() {
            return Err(Error::validation_for_field("VcenterServer", "must not be empty"));
        }

        let sf = &self.addons.solidfire;
        if sf.enable {
            for (field, value) in [
                ("Solidfire.MVIP", &sf.mvip),
                ("Solidfire.SVIP", &sf.svip),
                ("Solidfire.User", &sf.user),
                ("Solidfire.Password", &sf.password),
            ] {
                if value.is_empty() {
                    return Err(Error::validation_for_field(
                        field,
                        "required when Solidfire is enabled",
                    ));
                }
            }
        }
        if self.addons.observability.enable && self.addons.observability.archive_location.is_empty()
        {
            return Err(Error::validation_for_field(
                "Observability.ArchiveLocation",
                "required when Observability is enabled",
            ));
        }
        Ok(())
    }
}
