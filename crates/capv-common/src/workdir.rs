//! Per-cluster working directory under `~/.capv-bootstrap/<cluster>/`.
//!
//! Files are written completely before anything consumes them.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Error, Result};

/// Directory under the home directory holding every cluster's files
pub const APP_DIR: &str = ".capv-bootstrap";
/// Kubeconfig of the kind bootstrap cluster
pub const BOOTSTRAP_KUBECONFIG: &str = "bootstrap-kubeconfig";
/// Kubeconfig of the permanent management cluster
pub const PERMANENT_KUBECONFIG: &str = "kubeconfig";
/// Namespace + Secret with vCenter credentials for CAPV
pub const VSPHERE_CREDS_FILE: &str = "vsphere-creds.yaml";

/// Files belonging to one cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDir {
    root: PathBuf,
}

impl ClusterDir {
    /// `<base>/<cluster>`
    pub fn new(base: impl AsRef<Path>, cluster: &str) -> Self {
        Self {
            root: base.as_ref().join(cluster),
        }
    }

    /// `~/.capv-bootstrap/<cluster>`
    pub fn in_home(cluster: &str) -> Result<Self> {
        Ok(Self::new(default_base_dir()?, cluster))
    }

    /// Directory path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a file inside the directory
    pub fn path(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }

    /// Bootstrap cluster kubeconfig path
    pub fn bootstrap_kubeconfig(&self) -> PathBuf {
        self.path(BOOTSTRAP_KUBECONFIG)
    }

    /// Permanent cluster kubeconfig path
    pub fn permanent_kubeconfig(&self) -> PathBuf {
        self.path(PERMANENT_KUBECONFIG)
    }

    /// Credentials secret manifest path
    pub fn creds_secret(&self) -> PathBuf {
        self.path(VSPHERE_CREDS_FILE)
    }

    /// Generated Cluster API manifest path
    pub fn capi_config(&self, cluster: &str) -> PathBuf {
        self.path(&format!("{}-capi-config.yaml", cluster))
    }

    /// Kustomized Cluster API manifest path
    pub fn final_config(&self, cluster: &str) -> PathBuf {
        self.path(&format!("{}-final.yaml", cluster))
    }

    /// Write `contents` to `file`, creating the directory first
    pub async fn write(&self, file: &str, contents: impl AsRef<[u8]>) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path(file);
        tokio::fs::write(&path, contents.as_ref()).await?;
        debug!(path = %path.display(), "wrote file");
        Ok(path)
    }

    /// Read a file back
    pub async fn read(&self, file: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.path(file)).await?)
    }
}

/// `~/.capv-bootstrap`
pub fn default_base_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(APP_DIR))
        .ok_or_else(|| Error::validation("unable to determine home directory"))
}
