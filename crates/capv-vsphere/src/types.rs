//! Inventory handles and the request/response shapes of [`VsphereApi`](crate::VsphereApi).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Managed object reference, e.g. `Datastore:datastore-12`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagedObjectRef {
    /// vSphere type name
    #[serde(rename = "Type", alias = "type")]
    pub kind: String,
    /// Object id
    #[serde(rename = "Value", alias = "value")]
    pub value: String,
}

impl ManagedObjectRef {
    /// Reference of type `kind`
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for ManagedObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Inventory object kinds the manager discovers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InventoryKind {
    /// Datacenter
    Datacenter,
    /// Datastore
    Datastore,
    /// Port group or standard network
    Network,
    /// VM folder
    Folder,
    /// Resource pool
    ResourcePool,
    /// VM or template
    VirtualMachine,
}

impl InventoryKind {
    /// Human readable name used in messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Datacenter => "datacenter",
            Self::Datastore => "datastore",
            Self::Network => "network",
            Self::Folder => "folder",
            Self::ResourcePool => "resource pool",
            Self::VirtualMachine => "virtual machine",
        }
    }

    /// Managed object types that belong to this kind
    pub fn managed_types(&self) -> &'static [&'static str] {
        match self {
            Self::Datacenter => &["Datacenter"],
            Self::Datastore => &["Datastore"],
            Self::Network => NETWORK_TYPES,
            Self::Folder => &["Folder"],
            Self::ResourcePool => &["ResourcePool"],
            Self::VirtualMachine => &["VirtualMachine"],
        }
    }
}

impl fmt::Display for InventoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network object types a VM NIC can be bound to. Opaque networks and
/// switches are listed by vCenter too but are not selectable.
pub const NETWORK_TYPES: &[&str] = &["DistributedVirtualPortgroup", "Network"];

/// A resolved inventory object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryObject {
    /// Object kind
    pub kind: InventoryKind,
    /// Last path segment
    pub name: String,
    /// Absolute path, e.g. `/dc1/datastore/ds1`
    pub inventory_path: String,
    /// Managed object reference
    pub moref: ManagedObjectRef,
}

impl InventoryObject {
    /// The name is derived from the path
    pub fn new(
        kind: InventoryKind,
        inventory_path: impl Into<String>,
        moref: ManagedObjectRef,
    ) -> Self {
        let inventory_path = inventory_path.into();
        let name = basename(&inventory_path).to_string();
        Self {
            kind,
            name,
            inventory_path,
            moref,
        }
    }

    /// Whether a user supplied name, path or id refers to this object
    pub fn matches(&self, preset: &str) -> bool {
        self.name == preset || self.inventory_path == preset || self.moref.value == preset
    }
}

/// A virtual machine or template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachine {
    /// Display name
    pub name: String,
    /// Absolute inventory path
    pub inventory_path: String,
    /// Managed object reference
    pub moref: ManagedObjectRef,
}

impl VirtualMachine {
    /// Name taken from the last path segment
    pub fn new(inventory_path: impl Into<String>, moref: ManagedObjectRef) -> Self {
        let inventory_path = inventory_path.into();
        Self {
            name: basename(&inventory_path).to_string(),
            inventory_path,
            moref,
        }
    }
}

/// Last path segment
pub fn basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// VM power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerState {
    /// Running
    PoweredOn,
    /// Stopped
    PoweredOff,
    /// Suspended
    Suspended,
}

// =============================================================================
// Tasks
// =============================================================================

/// vSphere task state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting to start
    Queued,
    /// In progress
    Running,
    /// Finished successfully
    Success,
    /// Finished with an error
    Error,
}

impl TaskState {
    /// Queued or running
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

/// Task descriptions that create a VM
pub const CREATION_TASKS: &[&str] = &["ImportVAppLRO", "VirtualMachine.clone"];

/// A recent task on an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    /// Task reference, used to cancel it
    pub task: ManagedObjectRef,
    /// e.g. `VirtualMachine.clone`
    pub description_id: String,
    /// Name of the entity the task runs on
    pub entity_name: String,
    /// Current state
    pub state: TaskState,
}

impl TaskInfo {
    /// An upload or clone that is still queued or running
    pub fn is_active_creation(&self) -> bool {
        self.state.is_active() && CREATION_TASKS.iter().any(|id| self.description_id.contains(id))
    }
}

// =============================================================================
// Devices and reconfiguration
// =============================================================================

/// Device types that are network adapters
pub const ETHERNET_CARD_TYPES: &[&str] = &[
    "VirtualE1000",
    "VirtualE1000e",
    "VirtualPCNet32",
    "VirtualSriovEthernetCard",
    "VirtualVmxnet",
    "VirtualVmxnet2",
    "VirtualVmxnet3",
    "VirtualVmxnet3Vrdma",
];

/// Device key for a NIC being added; vCenter assigns the real one
pub const NEW_DEVICE_KEY: i32 = -100;

/// A device attached to a VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDevice {
    /// Device key, unique within the VM
    pub key: i32,
    /// Device name as the API addresses it, e.g. `ethernet-0`
    pub name: String,
    /// vSphere type name, e.g. `VirtualVmxnet3`
    pub device_type: String,
    /// Label shown in the vSphere client
    pub summary: String,
}

impl VirtualDevice {
    /// Whether this is a network adapter
    pub fn is_ethernet_card(&self) -> bool {
        ETHERNET_CARD_TYPES.contains(&self.device_type.as_str())
    }
}

/// One device edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceChange {
    /// Detach and destroy a device
    Remove(VirtualDevice),
    /// Add a VMXNET3 adapter on `network`
    AddVmxnet3 {
        /// Temporary key, see [`NEW_DEVICE_KEY`]
        key: i32,
        /// Network to bind
        network: InventoryObject,
    },
}

/// `key=value` pair in a VM's extra config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionValue {
    /// Option name
    pub key: String,
    /// Option value
    pub value: String,
}

impl OptionValue {
    /// `key=value`
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Device and extra-config edits applied in one reconfigure call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSpec {
    /// Devices to add or remove
    pub device_change: Vec<DeviceChange>,
    /// Extra-config keys to set
    pub extra_config: Vec<OptionValue>,
}

impl ConfigSpec {
    /// No edits at all
    pub fn is_empty(&self) -> bool {
        self.device_change.is_empty() && self.extra_config.is_empty()
    }
}

/// How a clone lays out its disks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiskMoveType {
    /// Full copy with the disk chain collapsed
    #[default]
    MoveAllDiskBackingsAndConsolidate,
    /// Linked clone
    CreateNewChildDiskBacking,
}

impl DiskMoveType {
    /// Name vSphere expects
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MoveAllDiskBackingsAndConsolidate => "moveAllDiskBackingsAndConsolidate",
            Self::CreateNewChildDiskBacking => "createNewChildDiskBacking",
        }
    }
}

/// Placement and configuration for a clone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneSpec {
    /// Target datastore
    pub datastore: InventoryObject,
    /// Target resource pool
    pub pool: InventoryObject,
    /// Power on once cloned
    pub power_on: bool,
    /// Full or linked clone
    pub disk_move_type: DiskMoveType,
    /// Edits applied as part of the clone
    pub config: ConfigSpec,
}

// =============================================================================
// OVF import
// =============================================================================

/// Maps an OVF network name onto an inventory network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMapping {
    /// Network name in the OVF descriptor
    pub name: String,
    /// Inventory network it maps to
    pub network: InventoryObject,
}

/// Parameters for turning an OVF descriptor into an import spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpecParams {
    /// Name of the imported VM
    pub entity_name: String,
    /// e.g. `thin`
    pub disk_provisioning: String,
    /// e.g. `dhcpPolicy`
    pub ip_allocation_policy: String,
    /// e.g. `IPv4`
    pub ip_protocol: String,
    /// OVF locale
    pub locale: String,
    /// OVF network bindings
    pub network_mapping: Vec<NetworkMapping>,
}

impl ImportSpecParams {
    /// Thin disks, DHCP, IPv4, `nic0` on `network`
    pub fn for_template(entity_name: impl Into<String>, network: InventoryObject) -> Self {
        Self {
            entity_name: entity_name.into(),
            disk_provisioning: "thin".to_string(),
            ip_allocation_policy: "dhcpPolicy".to_string(),
            ip_protocol: "IPv4".to_string(),
            locale: "US".to_string(),
            network_mapping: vec![NetworkMapping {
                name: "nic0".to_string(),
                network,
            }],
        }
    }
}

/// A file the import expects to be uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileItem {
    /// Device the file backs
    pub device_id: String,
    /// Path relative to the descriptor, matched against archive entries
    pub path: String,
    /// Size from the descriptor, when given
    pub size: Option<u64>,
}

/// Result of validating a descriptor against placement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpec {
    /// Parameters this import spec was created with
    pub params: ImportSpecParams,
    /// OVF descriptor
    pub descriptor: String,
    /// Datastore for disks
    pub datastore: InventoryObject,
    /// Target resource pool
    pub pool: InventoryObject,
    /// Files to upload
    pub file_items: Vec<FileItem>,
    /// OVF environment section; cleared before import so no environment is injected
    pub ovf_section: Option<String>,
    /// Fatal problems; any entry fails the import
    pub errors: Vec<String>,
    /// Non-fatal problems, logged
    pub warnings: Vec<String>,
}

/// Where a lease expects one file to be uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseItem {
    /// File being uploaded
    pub item: FileItem,
    /// Upload URL
    pub target: String,
}
