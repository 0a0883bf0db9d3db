//! Remote vSphere primitives.
//!
//! Everything the manager does against vCenter goes through [`VsphereApi`];
//! the manager logic (folder walking, import, teardown) is written against
//! the trait so it can run against the `govc` backend or an in-memory fake.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)]
use mockall::automock;

use crate::session::Endpoint;
use crate::types::{
    CloneSpec, ConfigSpec, ImportSpec, ImportSpecParams, InventoryKind, InventoryObject, LeaseItem,
    PowerState, TaskInfo, VirtualDevice, VirtualMachine,
};
use crate::Result;

/// An authenticated vCenter session
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VsphereApi: Send + Sync {
    /// Whether the session is still logged in
    async fn session_is_active(&self) -> Result<bool>;

    /// Objects of `kind` below `root` whose name matches `pattern`.
    ///
    /// `root` is a datacenter path, or empty to list datacenters.
    async fn list(&self, kind: InventoryKind, root: &str, pattern: &str) -> Result<Vec<InventoryObject>>;

    /// Folder at an absolute inventory path
    async fn find_folder(&self, path: &str) -> Result<Option<InventoryObject>>;

    /// Create `name` under `parent`, returning the new folder
    async fn create_folder(&self, parent: &InventoryObject, name: &str) -> Result<InventoryObject>;

    /// Delete an empty folder
    async fn destroy_folder(&self, folder: &InventoryObject) -> Result<()>;

    /// VM or template at an absolute inventory path
    async fn find_vm(&self, path: &str) -> Result<Option<VirtualMachine>>;

    /// VM or template anywhere in a datacenter
    async fn find_vm_by_name(&self, datacenter: &InventoryObject, name: &str) -> Result<Option<VirtualMachine>>;

    /// Validate an OVF descriptor against placement
    async fn create_import_spec(
        &self,
        descriptor: &str,
        pool: &InventoryObject,
        datastore: &InventoryObject,
        params: &ImportSpecParams,
    ) -> Result<ImportSpec>;

    /// Start importing into `folder`
    async fn import_vapp(&self, spec: &ImportSpec, folder: &InventoryObject) -> Result<Box<dyn ImportLease>>;

    /// Devices attached to `vm`
    async fn devices(&self, vm: &VirtualMachine) -> Result<Vec<VirtualDevice>>;

    /// Apply device and extra-config edits in one call
    async fn reconfigure(&self, vm: &VirtualMachine, spec: &ConfigSpec) -> Result<()>;

    /// Convert `vm` into a template
    async fn mark_as_template(&self, vm: &VirtualMachine) -> Result<()>;

    /// Clone `template` into `folder` as `name`, waiting for the task
    async fn clone_vm(
        &self,
        template: &VirtualMachine,
        folder: &InventoryObject,
        name: &str,
        spec: &CloneSpec,
    ) -> Result<()>;

    /// Current power state of `vm`
    async fn power_state(&self, vm: &VirtualMachine) -> Result<PowerState>;

    /// Power on `vm`
    async fn power_on(&self, vm: &VirtualMachine) -> Result<()>;

    /// Power off `vm`
    async fn power_off(&self, vm: &VirtualMachine) -> Result<()>;

    /// Delete `vm` from inventory and disk
    async fn destroy_vm(&self, vm: &VirtualMachine) -> Result<()>;

    /// Recent tasks whose entity is `vm`
    async fn recent_tasks(&self, vm: &VirtualMachine) -> Result<Vec<TaskInfo>>;

    /// Cancel a queued or running task
    async fn cancel_task(&self, task: &TaskInfo) -> Result<()>;
}

/// An in-progress OVF import
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImportLease: Send + Sync {
    /// Wait until the lease is ready and return where each file goes
    async fn wait(&self) -> Result<Vec<LeaseItem>>;

    /// Append the next chunk of `item`
    async fn upload(&self, item: &LeaseItem, chunk: Bytes) -> Result<()>;

    /// Report overall upload progress (0-100)
    async fn progress(&self, percent: u8) -> Result<()>;

    /// Finish the import and return the created VM
    async fn complete(&self) -> Result<VirtualMachine>;

    /// Abort the lease with `reason`
    async fn abort(&self, reason: &str) -> Result<()>;
}

/// Creates authenticated sessions
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VsphereConnector: Send + Sync {
    /// Open a session against `endpoint`
    async fn login(&self, endpoint: &Endpoint) -> Result<Arc<dyn VsphereApi>>;
}
