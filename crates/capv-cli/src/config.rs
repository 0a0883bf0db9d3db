//! Loading the provisioning config and applying command-line and
//! environment overrides

use std::path::{Path, PathBuf};

use capv_common::ProvisioningSpec;
use tracing::debug;

use crate::{Error, Result};

/// Config file name under the home directory
pub const DEFAULT_CONFIG_FILE: &str = ".capv-bootstrap.yaml";

pub const VSPHERE_USERNAME_ENV: &str = "VSPHERE_USERNAME";
pub const VSPHERE_PASSWORD_ENV: &str = "VSPHERE_PASSWORD";

/// `~/.capv-bootstrap.yaml`
pub fn default_config_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_CONFIG_FILE))
        .ok_or_else(|| Error::validation("unable to determine home directory"))
}

/// Values given on the command line win over the file
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub controllers: Option<u32>,
    pub workers: Option<u32>,
}

/// Read `path` and apply overrides from the command line and environment
pub fn load_spec(path: &Path, overrides: Overrides) -> Result<ProvisioningSpec> {
    if !path.exists() {
        return Err(Error::config(
            path,
            "not found; run `capv-bootstrap genconfig` to create one",
        ));
    }
    let mut spec = ProvisioningSpec::from_file(path).map_err(|e| Error::config(path, e.to_string()))?;
    apply_overrides(&mut spec, overrides, |key| std::env::var(key).ok());
    debug!(config = %path.display(), cluster = %spec.cluster_name, "loaded config");
    Ok(spec)
}

/// Counts from the command line; vCenter credentials from the environment
/// when the file leaves them empty
pub fn apply_overrides(
    spec: &mut ProvisioningSpec,
    overrides: Overrides,
    env: impl Fn(&str) -> Option<String>,
) {
    if let Some(controllers) = overrides.controllers {
        spec.control_plane_machine_count = controllers;
    }
    if let Some(workers) = overrides.workers {
        spec.worker_machine_count = workers;
    }

    let vsphere = &mut spec.vsphere;
    if vsphere.vsphere_username.is_empty() {
        if let Some(username) = env(VSPHERE_USERNAME_ENV) {
            vsphere.vsphere_username = username;
        }
    }
    if vsphere.vsphere_password.is_empty() {
        if let Some(password) = env(VSPHERE_PASSWORD_ENV) {
            vsphere.vsphere_password = password;
        }
    }
}
