//! In-memory vCenter and command fakes shared by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use capv_common::{CommandInvocation, CommandOutput, CommandRunner};

use crate::api::{ImportLease, VsphereApi, VsphereConnector};
use crate::govc::import_spec_from_descriptor;
use crate::manager::{HypervisorResourceManager, Placement};
use crate::ova::glob_pattern;
use crate::session::Endpoint;
use crate::types::{
    basename, CloneSpec, ConfigSpec, DeviceChange, ImportSpec, ImportSpecParams, InventoryKind, InventoryObject,
    LeaseItem, ManagedObjectRef, OptionValue, PowerState, TaskInfo, TaskState, VirtualDevice, VirtualMachine,
};
use crate::{Error, Result};

/// Observable state of one fake VM
#[derive(Debug, Clone)]
pub struct FakeVm {
    pub moref: ManagedObjectRef,
    pub template: bool,
    pub devices: Vec<VirtualDevice>,
    pub power: PowerState,
    pub extra_config: Vec<OptionValue>,
}

#[derive(Default)]
struct State {
    objects: Vec<InventoryObject>,
    vms: BTreeMap<String, FakeVm>,
    tasks: Vec<TaskInfo>,
    calls: Vec<String>,
    next_id: u32,
    uploaded: u64,
    last_progress: Option<u8>,
    last_import_spec: Option<ImportSpec>,
    last_clone_spec: Option<CloneSpec>,
    import_errors: Vec<String>,
    fail_uploads: bool,
    remove_vm_on_cancel: bool,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn record(&mut self, call: impl Into<String>) {
        self.calls.push(call.into());
    }
}

/// A vCenter that lives in a mutex
#[derive(Clone, Default)]
pub struct FakeVsphere {
    state: Arc<Mutex<State>>,
}

fn object(kind: InventoryKind, path: &str, moref_kind: &str, id: &str) -> InventoryObject {
    InventoryObject::new(kind, path, ManagedObjectRef::new(moref_kind, id))
}

fn default_devices(network: &str) -> Vec<VirtualDevice> {
    vec![
        VirtualDevice {
            key: 4000,
            name: "ethernet-0".into(),
            device_type: "VirtualE1000e".into(),
            summary: network.into(),
        },
        VirtualDevice {
            key: 2000,
            name: "disk-1000-0".into(),
            device_type: "VirtualDisk".into(),
            summary: "20,971,520 KB".into(),
        },
    ]
}

impl FakeVsphere {
    /// One datacenter with two datastores, three networks (one opaque), the
    /// root VM folder and a single resource pool
    pub fn seeded() -> Self {
        let fake = Self::default();
        {
            let mut state = fake.lock();
            state.objects = vec![
                object(InventoryKind::Datacenter, "/dc1", "Datacenter", "datacenter-1"),
                object(InventoryKind::Datastore, "/dc1/datastore/ds-fast", "Datastore", "datastore-1"),
                object(InventoryKind::Datastore, "/dc1/datastore/ds-slow", "Datastore", "datastore-2"),
                object(InventoryKind::Network, "/dc1/network/VM Network", "Network", "network-1"),
                object(
                    InventoryKind::Network,
                    "/dc1/network/mgmt-pg",
                    "DistributedVirtualPortgroup",
                    "dvportgroup-1",
                ),
                object(InventoryKind::Network, "/dc1/network/nsx-seg", "OpaqueNetwork", "network-o1"),
                object(InventoryKind::Folder, "/dc1/vm", "Folder", "group-v1"),
                object(
                    InventoryKind::ResourcePool,
                    "/dc1/host/cluster1/Resources",
                    "ResourcePool",
                    "resgroup-1",
                ),
            ];
        }
        fake
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: impl Into<String>) {
        self.lock().record(call);
    }

    /// Number of calls whose name starts with `prefix`
    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn folder(&self, path: &str) -> Option<InventoryObject> {
        self.lock()
            .objects
            .iter()
            .find(|o| o.kind == InventoryKind::Folder && o.inventory_path == path)
            .cloned()
    }

    pub fn vm(&self, path: &str) -> Option<FakeVm> {
        self.lock().vms.get(path).cloned()
    }

    /// Powered off VM with an e1000e NIC and a disk
    pub fn add_vm(&self, path: &str, template: bool) -> VirtualMachine {
        let mut state = self.lock();
        let moref = ManagedObjectRef::new("VirtualMachine", state.id("vm"));
        state.vms.insert(
            path.to_string(),
            FakeVm {
                moref: moref.clone(),
                template,
                devices: default_devices("VM Network"),
                power: PowerState::PoweredOff,
                extra_config: Vec::new(),
            },
        );
        VirtualMachine::new(path, moref)
    }

    pub fn set_power(&self, path: &str, power: PowerState) {
        if let Some(vm) = self.lock().vms.get_mut(path) {
            vm.power = power;
        }
    }

    pub fn add_task(&self, entity_name: &str, description_id: &str, state: TaskState) {
        let mut guard = self.lock();
        let task = ManagedObjectRef::new("Task", guard.id("task"));
        guard.tasks.push(TaskInfo {
            task,
            description_id: description_id.into(),
            entity_name: entity_name.into(),
            state,
        });
    }

    /// Cancelling a task deletes the VM it was creating
    pub fn remove_vm_on_cancel(&self) {
        self.lock().remove_vm_on_cancel = true;
    }

    pub fn set_import_errors(&self, errors: Vec<String>) {
        self.lock().import_errors = errors;
    }

    pub fn fail_uploads(&self) {
        self.lock().fail_uploads = true;
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.lock().uploaded
    }

    pub fn last_progress(&self) -> Option<u8> {
        self.lock().last_progress
    }

    pub fn last_import_spec(&self) -> Option<ImportSpec> {
        self.lock().last_import_spec.clone()
    }

    pub fn last_clone_spec(&self) -> Option<CloneSpec> {
        self.lock().last_clone_spec.clone()
    }

    fn apply(vm: &mut FakeVm, spec: &ConfigSpec) {
        for change in &spec.device_change {
            match change {
                DeviceChange::Remove(device) => vm.devices.retain(|d| d.name != device.name),
                DeviceChange::AddVmxnet3 { network, .. } => {
                    let index = vm.devices.iter().filter(|d| d.is_ethernet_card()).count();
                    vm.devices.push(VirtualDevice {
                        key: 4000 + index as i32,
                        name: format!("ethernet-{}", index),
                        device_type: "VirtualVmxnet3".into(),
                        summary: network.name.clone(),
                    });
                }
            }
        }
        vm.extra_config.extend(spec.extra_config.iter().cloned());
    }
}

#[async_trait]
impl VsphereConnector for FakeVsphere {
    async fn login(&self, _endpoint: &Endpoint) -> Result<Arc<dyn VsphereApi>> {
        self.record("login");
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl VsphereApi for FakeVsphere {
    async fn session_is_active(&self) -> Result<bool> {
        Ok(true)
    }

    async fn list(&self, kind: InventoryKind, root: &str, pattern: &str) -> Result<Vec<InventoryObject>> {
        self.record(format!("list {}", kind));
        let glob = glob_pattern(pattern)?;
        let prefix = format!("{}/", root.trim_end_matches('/'));
        Ok(self
            .lock()
            .objects
            .iter()
            .filter(|o| o.kind == kind)
            .filter(|o| root.is_empty() || o.inventory_path.starts_with(&prefix))
            .filter(|o| glob.matches(&o.name))
            .cloned()
            .collect())
    }

    async fn find_folder(&self, path: &str) -> Result<Option<InventoryObject>> {
        self.record("find_folder");
        Ok(self.folder(path))
    }

    async fn create_folder(&self, parent: &InventoryObject, name: &str) -> Result<InventoryObject> {
        let path = format!("{}/{}", parent.inventory_path, name);
        let mut state = self.lock();
        state.record(format!("create_folder {}", path));
        if state.objects.iter().any(|o| o.inventory_path == path) {
            return Err(Error::api("folder.create", format!("DuplicateName: {}", path)));
        }
        let moref = ManagedObjectRef::new("Folder", state.id("group-v"));
        state
            .objects
            .push(InventoryObject::new(InventoryKind::Folder, path, moref.clone()));
        // vCenter hands back a bare reference
        Ok(InventoryObject {
            kind: InventoryKind::Folder,
            name: String::new(),
            inventory_path: String::new(),
            moref,
        })
    }

    async fn destroy_folder(&self, folder: &InventoryObject) -> Result<()> {
        let mut state = self.lock();
        state.record(format!("destroy_folder {}", folder.inventory_path));
        state.objects.retain(|o| o.moref != folder.moref);
        Ok(())
    }

    async fn find_vm(&self, path: &str) -> Result<Option<VirtualMachine>> {
        Ok(self
            .lock()
            .vms
            .get(path)
            .map(|vm| VirtualMachine::new(path, vm.moref.clone())))
    }

    async fn find_vm_by_name(&self, datacenter: &InventoryObject, name: &str) -> Result<Option<VirtualMachine>> {
        let prefix = format!("{}/", datacenter.inventory_path);
        Ok(self
            .lock()
            .vms
            .iter()
            .find(|(path, _)| path.starts_with(&prefix) && basename(path) == name)
            .map(|(path, vm)| VirtualMachine::new(path.as_str(), vm.moref.clone())))
    }

    async fn create_import_spec(
        &self,
        descriptor: &str,
        pool: &InventoryObject,
        datastore: &InventoryObject,
        params: &ImportSpecParams,
    ) -> Result<ImportSpec> {
        self.record("create_import_spec");
        let mut spec = import_spec_from_descriptor(descriptor, pool, datastore, params);
        spec.errors.extend(self.lock().import_errors.iter().cloned());
        Ok(spec)
    }

    async fn import_vapp(&self, spec: &ImportSpec, folder: &InventoryObject) -> Result<Box<dyn ImportLease>> {
        let mut state = self.lock();
        state.record("import_vapp");
        state.last_import_spec = Some(spec.clone());
        Ok(Box::new(FakeLease {
            fake: self.clone(),
            spec: spec.clone(),
            folder: folder.clone(),
        }))
    }

    async fn devices(&self, vm: &VirtualMachine) -> Result<Vec<VirtualDevice>> {
        self.lock()
            .vms
            .get(&vm.inventory_path)
            .map(|v| v.devices.clone())
            .ok_or_else(|| Error::not_found("virtual machine", vm.inventory_path.as_str()))
    }

    async fn reconfigure(&self, vm: &VirtualMachine, spec: &ConfigSpec) -> Result<()> {
        let mut state = self.lock();
        state.record("reconfigure");
        let target = state
            .vms
            .get_mut(&vm.inventory_path)
            .ok_or_else(|| Error::not_found("virtual machine", vm.inventory_path.as_str()))?;
        Self::apply(target, spec);
        Ok(())
    }

    async fn mark_as_template(&self, vm: &VirtualMachine) -> Result<()> {
        let mut state = self.lock();
        state.record("mark_as_template");
        if let Some(v) = state.vms.get_mut(&vm.inventory_path) {
            v.template = true;
        }
        Ok(())
    }

    async fn clone_vm(
        &self,
        template: &VirtualMachine,
        folder: &InventoryObject,
        name: &str,
        spec: &CloneSpec,
    ) -> Result<()> {
        let mut state = self.lock();
        state.record(format!("clone_vm {}", name));
        state.last_clone_spec = Some(spec.clone());
        let source = state
            .vms
            .get(&template.inventory_path)
            .cloned()
            .ok_or_else(|| Error::not_found("virtual machine", template.inventory_path.as_str()))?;
        let mut vm = FakeVm {
            moref: ManagedObjectRef::new("VirtualMachine", state.id("vm")),
            template: false,
            devices: source.devices,
            power: PowerState::PoweredOff,
            extra_config: source.extra_config,
        };
        Self::apply(&mut vm, &spec.config);
        if spec.power_on {
            vm.power = PowerState::PoweredOn;
        }
        state.vms.insert(format!("{}/{}", folder.inventory_path, name), vm);
        Ok(())
    }

    async fn power_state(&self, vm: &VirtualMachine) -> Result<PowerState> {
        self.lock()
            .vms
            .get(&vm.inventory_path)
            .map(|v| v.power)
            .ok_or_else(|| Error::not_found("virtual machine", vm.inventory_path.as_str()))
    }

    async fn power_on(&self, vm: &VirtualMachine) -> Result<()> {
        self.record("power_on");
        self.set_power(&vm.inventory_path, PowerState::PoweredOn);
        Ok(())
    }

    async fn power_off(&self, vm: &VirtualMachine) -> Result<()> {
        self.record("power_off");
        self.set_power(&vm.inventory_path, PowerState::PoweredOff);
        Ok(())
    }

    async fn destroy_vm(&self, vm: &VirtualMachine) -> Result<()> {
        let mut state = self.lock();
        state.record("destroy_vm");
        state.vms.remove(&vm.inventory_path);
        Ok(())
    }

    async fn recent_tasks(&self, vm: &VirtualMachine) -> Result<Vec<TaskInfo>> {
        let mut state = self.lock();
        state.record("recent_tasks");
        Ok(state
            .tasks
            .iter()
            .filter(|t| t.entity_name == vm.name)
            .cloned()
            .collect())
    }

    async fn cancel_task(&self, task: &TaskInfo) -> Result<()> {
        let mut state = self.lock();
        state.record("cancel_task");
        if let Some(t) = state.tasks.iter_mut().find(|t| t.task == task.task) {
            t.state = TaskState::Error;
        }
        if state.remove_vm_on_cancel && task.is_active_creation() {
            state.vms.retain(|path, _| basename(path) != task.entity_name);
        }
        Ok(())
    }
}

struct FakeLease {
    fake: FakeVsphere,
    spec: ImportSpec,
    folder: InventoryObject,
}

#[async_trait]
impl ImportLease for FakeLease {
    async fn wait(&self) -> Result<Vec<LeaseItem>> {
        self.fake.record("wait");
        Ok(self
            .spec
            .file_items
            .iter()
            .map(|item| LeaseItem {
                item: item.clone(),
                target: format!("https://esx1.lab/nfc/{}", item.device_id),
            })
            .collect())
    }

    async fn upload(&self, _item: &LeaseItem, chunk: Bytes) -> Result<()> {
        let mut state = self.fake.lock();
        state.record("upload");
        if state.fail_uploads {
            return Err(Error::api("upload", "connection reset by peer"));
        }
        state.uploaded += chunk.len() as u64;
        Ok(())
    }

    async fn progress(&self, percent: u8) -> Result<()> {
        self.fake.lock().last_progress = Some(percent);
        Ok(())
    }

    async fn complete(&self) -> Result<VirtualMachine> {
        let mut state = self.fake.lock();
        state.record("complete");
        let path = format!("{}/{}", self.folder.inventory_path, self.spec.params.entity_name);
        let moref = ManagedObjectRef::new("VirtualMachine", state.id("vm"));
        let network = self
            .spec
            .params
            .network_mapping
            .first()
            .map(|m| m.network.name.clone())
            .unwrap_or_default();
        state.vms.insert(
            path.clone(),
            FakeVm {
                moref: moref.clone(),
                template: false,
                devices: default_devices(&network),
                power: PowerState::PoweredOff,
                extra_config: Vec::new(),
            },
        );
        Ok(VirtualMachine::new(path, moref))
    }

    async fn abort(&self, _reason: &str) -> Result<()> {
        self.fake.record("abort");
        Ok(())
    }
}

// =============================================================================
// Managers
// =============================================================================

pub fn dc1() -> InventoryObject {
    object(InventoryKind::Datacenter, "/dc1", "Datacenter", "datacenter-1")
}

fn endpoint() -> Endpoint {
    Endpoint::new("vc.lab", "administrator@vsphere.local", "secret", true).unwrap()
}

/// Manager with nothing resolved
pub fn manager_with(fake: &FakeVsphere) -> HypervisorResourceManager {
    HypervisorResourceManager::new(Arc::new(fake.clone()), endpoint())
}

/// Manager placed on dc1, ds-fast, the cluster pool, the root VM folder and
/// "VM Network"
pub fn resolved_manager(fake: &FakeVsphere) -> HypervisorResourceManager {
    let placement = Placement {
        datacenter: Some(dc1()),
        datastore: Some(object(
            InventoryKind::Datastore,
            "/dc1/datastore/ds-fast",
            "Datastore",
            "datastore-1",
        )),
        resource_pool: Some(object(
            InventoryKind::ResourcePool,
            "/dc1/host/cluster1/Resources",
            "ResourcePool",
            "resgroup-1",
        )),
        folder: Some(object(InventoryKind::Folder, "/dc1/vm", "Folder", "group-v1")),
        network: Some(object(InventoryKind::Network, "/dc1/network/VM Network", "Network", "network-1")),
    };
    manager_with(fake).with_placement(placement)
}

/// OVA with a descriptor and one disk of `disk_size` bytes
pub fn build_ova(dir: &Path, disk_size: usize) -> PathBuf {
    let descriptor = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Envelope xmlns="http://schemas.dmtf.org/ovf/envelope/1" xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1">
  <References>
    <File ovf:href="ubuntu-disk1.vmdk" ovf:id="file1" ovf:size="{}"/>
  </References>
  <NetworkSection>
    <Network ovf:name="nic0"/>
  </NetworkSection>
  <VirtualSystem ovf:id="ubuntu">
    <ProductSection ovf:required="false"/>
  </VirtualSystem>
</Envelope>
"#,
        disk_size
    );
    let disk: Vec<u8> = (0..disk_size).map(|i| (i % 251) as u8).collect();

    let path = dir.join("ubuntu.ova");
    let mut builder = tar::Builder::new(std::fs::File::create(&path).unwrap());
    for (name, data) in [("ubuntu.ovf", descriptor.into_bytes()), ("ubuntu-disk1.vmdk", disk)] {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_slice()).unwrap();
    }
    builder.finish().unwrap();
    path
}

// =============================================================================
// Commands
// =============================================================================

/// Replies to invocations keyed by their joined arguments; anything
/// unscripted succeeds with no output
#[derive(Default)]
pub struct ScriptedRunner {
    replies: Mutex<HashMap<String, CommandOutput>>,
    invocations: Mutex<Vec<CommandInvocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, args: &str, stdout: &str) {
        self.replies.lock().unwrap().insert(
            args.to_string(),
            CommandOutput {
                stdout: stdout.as_bytes().to_vec(),
                stderr: Vec::new(),
                status: Some(0),
            },
        );
    }

    pub fn fail(&self, args: &str, stderr: &str) {
        self.replies.lock().unwrap().insert(
            args.to_string(),
            CommandOutput {
                stdout: Vec::new(),
                stderr: stderr.as_bytes().to_vec(),
                status: Some(1),
            },
        );
    }

    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    fn exists(&self, _invocation: &CommandInvocation) -> bool {
        true
    }

    async fn execute(&self, invocation: &CommandInvocation) -> capv_common::Result<CommandOutput> {
        self.invocations.lock().unwrap().push(invocation.clone());
        let key = invocation.args.join(" ");
        Ok(self.replies.lock().unwrap().get(&key).cloned().unwrap_or(CommandOutput {
            status: Some(0),
            ..Default::default()
        }))
    }
}
