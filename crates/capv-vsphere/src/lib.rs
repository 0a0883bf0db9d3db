//! vSphere resource management for capv-bootstrap
//!
//! Session handling, inventory discovery and placement, VM folders, OVA
//! template import, template cloning with cloud-init, and VM teardown. All
//! remote work goes through [`VsphereApi`]; [`govc::GovcConnector`] is the
//! production backend.

#![deny(missing_docs)]

pub mod api;
pub mod clone;
pub mod cloudinit;
pub mod error;
pub mod folder;
pub mod govc;
pub mod inventory;
pub mod manager;
pub mod ova;
pub mod session;
pub mod teardown;
pub mod template;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ImportLease, VsphereApi, VsphereConnector};
pub use clone::CloneRequest;
pub use cloudinit::{Metadata, NetworkConfig, UserData};
pub use error::{Error, Result};
pub use govc::{GovcApi, GovcConnector};
pub use inventory::{select, ResourcePicker};
pub use manager::{HypervisorResourceManager, Placement};
pub use ova::OvaArchive;
pub use session::{Endpoint, SessionManager};
pub use types::{InventoryKind, InventoryObject, ManagedObjectRef, PowerState, VirtualMachine};
