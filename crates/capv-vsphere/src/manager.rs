//! Hypervisor resource manager: discovery and the resolved placement.
//!
//! Folder, template, clone and teardown operations live in their own modules
//! as further `impl HypervisorResourceManager` blocks.

use std::sync::Arc;
use std::time::Duration;

use capv_common::config::VsphereSpec;
use tracing::info;

use crate::api::{VsphereApi, VsphereConnector};
use crate::inventory::{select, ResourcePicker};
use crate::session::{Endpoint, SessionManager};
use crate::types::{InventoryKind, InventoryObject, NETWORK_TYPES};
use crate::{Error, Result};

/// Deadline for finding or creating one folder level
pub const FOLDER_LEVEL_TIMEOUT: Duration = Duration::from_secs(120);
/// Upload chunk size for template imports
pub const UPLOAD_CHUNK_SIZE: u64 = 1024 * 1024;
/// Checks for an in-flight creation to disappear after its task is cancelled
pub const CREATION_CANCEL_ATTEMPTS: u32 = 10;
/// Delay between those checks
pub const CREATION_CANCEL_INTERVAL: Duration = Duration::from_secs(2);

/// Where new VMs and templates go
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    /// Datacenter everything lives in
    pub datacenter: Option<InventoryObject>,
    /// Datastore for disks
    pub datastore: Option<InventoryObject>,
    /// Resource pool for new VMs
    pub resource_pool: Option<InventoryObject>,
    /// Folder new VMs go into
    pub folder: Option<InventoryObject>,
    /// Network the first NIC is bound to
    pub network: Option<InventoryObject>,
}

fn required<'a>(value: &'a Option<InventoryObject>, kind: InventoryKind) -> Result<&'a InventoryObject> {
    value
        .as_ref()
        .ok_or_else(|| Error::not_found(kind.as_str(), "<unresolved>"))
}

impl Placement {
    /// The datacenter, or not-found while unresolved
    pub fn datacenter(&self) -> Result<&InventoryObject> {
        required(&self.datacenter, InventoryKind::Datacenter)
    }

    /// The datastore, or not-found while unresolved
    pub fn datastore(&self) -> Result<&InventoryObject> {
        required(&self.datastore, InventoryKind::Datastore)
    }

    /// The resource pool, or not-found while unresolved
    pub fn resource_pool(&self) -> Result<&InventoryObject> {
        required(&self.resource_pool, InventoryKind::ResourcePool)
    }

    /// The VM folder, or not-found while unresolved
    pub fn folder(&self) -> Result<&InventoryObject> {
        required(&self.folder, InventoryKind::Folder)
    }

    /// The network, or not-found while unresolved
    pub fn network(&self) -> Result<&InventoryObject> {
        required(&self.network, InventoryKind::Network)
    }
}

/// Session plus resolved placement
pub struct HypervisorResourceManager {
    session: SessionManager,
    placement: Placement,
    pub(crate) folder_timeout: Duration,
    pub(crate) chunk_size: u64,
    pub(crate) cancel_attempts: u32,
    pub(crate) cancel_interval: Duration,
}

impl HypervisorResourceManager {
    /// Manager with nothing resolved yet
    pub fn new(connector: Arc<dyn VsphereConnector>, endpoint: Endpoint) -> Self {
        Self {
            session: SessionManager::new(connector, endpoint),
            placement: Placement::default(),
            folder_timeout: FOLDER_LEVEL_TIMEOUT,
            chunk_size: UPLOAD_CHUNK_SIZE,
            cancel_attempts: CREATION_CANCEL_ATTEMPTS,
            cancel_interval: CREATION_CANCEL_INTERVAL,
        }
    }

    /// Use an already resolved placement
    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    /// Upload chunk size in bytes, at least 1
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Resolved placement
    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    /// Session shared by every operation
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub(crate) async fn client(&self) -> Result<Arc<dyn VsphereApi>> {
        self.session.client().await
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// All datacenters
    pub async fn datacenters(&self) -> Result<Vec<InventoryObject>> {
        self.client().await?.list(InventoryKind::Datacenter, "", "*").await
    }

    /// Datastores in `datacenter`
    pub async fn datastores(&self, datacenter: &InventoryObject) -> Result<Vec<InventoryObject>> {
        self.client()
            .await?
            .list(InventoryKind::Datastore, &datacenter.inventory_path, "*")
            .await
    }

    /// Port groups and standard networks; other network kinds are dropped
    pub async fn networks(&self, datacenter: &InventoryObject) -> Result<Vec<InventoryObject>> {
        let all = self
            .client()
            .await?
            .list(InventoryKind::Network, &datacenter.inventory_path, "*")
            .await?;
        Ok(all
            .into_iter()
            .filter(|n| NETWORK_TYPES.contains(&n.moref.kind.as_str()))
            .collect())
    }

    /// VM folders in `datacenter`
    pub async fn folders(&self, datacenter: &InventoryObject) -> Result<Vec<InventoryObject>> {
        self.client()
            .await?
            .list(InventoryKind::Folder, &datacenter.inventory_path, "*")
            .await
    }

    /// Resource pools in `datacenter`
    pub async fn resource_pools(&self, datacenter: &InventoryObject) -> Result<Vec<InventoryObject>> {
        self.client()
            .await?
            .list(InventoryKind::ResourcePool, &datacenter.inventory_path, "*")
            .await
    }

    /// Discovery for a kind chosen at runtime
    pub async fn list(&self, kind: InventoryKind) -> Result<Vec<InventoryObject>> {
        if kind == InventoryKind::Datacenter {
            return self.datacenters().await;
        }
        let dc = self.placement.datacenter()?.clone();
        match kind {
            InventoryKind::Datastore => self.datastores(&dc).await,
            InventoryKind::Network => self.networks(&dc).await,
            InventoryKind::Folder => self.folders(&dc).await,
            InventoryKind::ResourcePool => self.resource_pools(&dc).await,
            _ => {
                self.client()
                    .await?
                    .list(kind, &dc.inventory_path, "*")
                    .await
            }
        }
    }

    /// Resolve the whole placement from configuration.
    ///
    /// Ids win over names when both are set. The folder is created when
    /// missing; an empty folder means the datacenter's root VM folder.
    pub async fn resolve(&mut self, spec: &VsphereSpec, picker: Option<&dyn ResourcePicker>) -> Result<()> {
        let preset = |id: &Option<String>, name: &str| -> Option<String> {
            id.clone().filter(|i| !i.is_empty()).or_else(|| Some(name.to_string()))
        };

        let dc = select(
            InventoryKind::Datacenter,
            self.datacenters().await?,
            preset(&spec.datacenter_id, &spec.datacenter).as_deref(),
            picker,
        )
        .await?;
        self.placement.datacenter = Some(dc.clone());

        let datastore = select(
            InventoryKind::Datastore,
            self.datastores(&dc).await?,
            preset(&spec.datastore_id, &spec.datastore).as_deref(),
            picker,
        )
        .await?;
        let pool = select(
            InventoryKind::ResourcePool,
            self.resource_pools(&dc).await?,
            preset(&spec.resource_pool_id, &spec.resource_pool).as_deref(),
            picker,
        )
        .await?;
        let network = select(
            InventoryKind::Network,
            self.networks(&dc).await?,
            preset(&spec.management_network_id, &spec.management_network).as_deref(),
            picker,
        )
        .await?;

        self.placement.datastore = Some(datastore);
        self.placement.resource_pool = Some(pool);
        self.placement.network = Some(network);

        let folder = if spec.folder.trim_matches('/').is_empty() {
            let root = format!("{}/vm", dc.inventory_path);
            self.client()
                .await?
                .find_folder(&root)
                .await?
                .ok_or_else(|| Error::not_found(InventoryKind::Folder.as_str(), root))?
        } else {
            self.create_vm_folder(&spec.folder)
                .await?
                .pop()
                .ok_or_else(|| Error::not_found(InventoryKind::Folder.as_str(), spec.folder.as_str()))?
        };
        self.placement.folder = Some(folder);

        info!(
            datacenter = %dc.name,
            datastore = ?self.placement.datastore.as_ref().map(|d| &d.name),
            folder = ?self.placement.folder.as_ref().map(|f| &f.inventory_path),
            "resolved vSphere placement"
        );
        Ok(())
    }
}
