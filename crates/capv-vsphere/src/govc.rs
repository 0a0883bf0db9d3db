//! [`VsphereApi`] implemented by driving the `govc` CLI.
//!
//! Credentials travel in `GOVC_*` environment variables, never on the
//! command line. Objects are addressed by inventory path; the managed object
//! reference behind each path comes from `govc find -i` on that exact path.
//!
//! Import leases are emulated: the lease is a local staging directory that
//! receives the descriptor and the uploaded files, and completing it hands the
//! staged OVF to `govc import.ovf`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use capv_common::{CommandInvocation, CommandRunner, GOVC};
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::api::{ImportLease, VsphereApi, VsphereConnector};
use crate::session::Endpoint;
use crate::types::{
    basename, CloneSpec, ConfigSpec, DeviceChange, DiskMoveType, FileItem, ImportSpec, ImportSpecParams,
    InventoryKind, InventoryObject, LeaseItem, ManagedObjectRef, PowerState, TaskInfo, TaskState,
    VirtualDevice, VirtualMachine,
};
use crate::{Error, Result};

/// Deadline for `govc import.ovf` once files are staged
const IMPORT_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);
/// Reference lookups in flight while listing
const LOOKUP_CONCURRENCY: usize = 8;
/// Deadline for a full clone
const CLONE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Logs in by checking `govc about` with the endpoint's credentials
pub struct GovcConnector {
    runner: Arc<dyn CommandRunner>,
    staging_root: PathBuf,
}

impl GovcConnector {
    /// `staging_root` holds import staging directories
    pub fn new(runner: Arc<dyn CommandRunner>, staging_root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            staging_root: staging_root.into(),
        }
    }
}

#[async_trait]
impl VsphereConnector for GovcConnector {
    async fn login(&self, endpoint: &Endpoint) -> Result<Arc<dyn VsphereApi>> {
        let api = GovcApi::new(Arc::clone(&self.runner), endpoint, self.staging_root.clone());
        api.output("about", ["about"]).await?;
        Ok(Arc::new(api))
    }
}

/// [`VsphereApi`](crate::VsphereApi) over the `govc` CLI
#[derive(Clone)]
pub struct GovcApi {
    runner: Arc<dyn CommandRunner>,
    env: Vec<(String, String)>,
    staging_root: PathBuf,
}

impl GovcApi {
    /// Objects for `endpoint`; import staging goes under `staging_root`
    pub fn new(runner: Arc<dyn CommandRunner>, endpoint: &Endpoint, staging_root: PathBuf) -> Self {
        let env = vec![
            ("GOVC_URL".to_string(), endpoint.url.to_string()),
            ("GOVC_USERNAME".to_string(), endpoint.username.clone()),
            ("GOVC_PASSWORD".to_string(), endpoint.password.clone()),
            ("GOVC_INSECURE".to_string(), endpoint.insecure.to_string()),
        ];
        Self {
            runner,
            env,
            staging_root,
        }
    }

    fn govc<I, S>(&self, args: I) -> CommandInvocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandInvocation::new(GOVC).envs(self.env.clone()).args(args)
    }

    async fn run(&self, operation: &str, invocation: CommandInvocation) -> Result<String> {
        let output = self.runner.execute(&invocation).await?;
        if !output.success() {
            return Err(Error::api(operation, output.stderr_str().trim()));
        }
        Ok(output.stdout_str())
    }

    async fn output<I, S>(&self, operation: &str, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run(operation, self.govc(args)).await
    }

    /// Objects below `root`. Each reference is looked up by its own path, so
    /// a path is never paired with another object's reference.
    async fn find(&self, kind: InventoryKind, root: &str, extra: &[&str]) -> Result<Vec<InventoryObject>> {
        let root = if root.is_empty() { "/" } else { root };
        let mut args: Vec<String> = vec!["find".into(), "-type".into(), type_flag(kind).into()];
        args.extend(extra.iter().map(|s| s.to_string()));
        args.push(root.to_string());

        let paths = match self.output("find", args).await {
            Ok(out) => out,
            Err(e) if is_not_found(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let found: Vec<Option<InventoryObject>> = stream::iter(lines(&paths).map(str::to_owned))
            .map(|path| async move { self.lookup(kind, &path).await })
            .buffered(LOOKUP_CONCURRENCY)
            .try_collect()
            .await?;
        Ok(found.into_iter().flatten().collect())
    }

    /// The object at exactly `path`; `None` once it is gone
    async fn lookup(&self, kind: InventoryKind, path: &str) -> Result<Option<InventoryObject>> {
        let args = ["find", "-i", "-type", type_flag(kind), "-maxdepth", "0", path];
        let out = match self.output("find", args).await {
            Ok(out) => out,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e),
        };
        let found = match lines(&out).next() {
            Some(reference) => Ok(Some(InventoryObject::new(kind, path, parse_reference(reference)?))),
            None => Ok(None),
        };
        found
    }

    async fn vm_info(&self, vm: &VirtualMachine) -> Result<VmInfo> {
        let out = self.output("vm.info", ["vm.info", "-json", &vm.inventory_path]).await?;
        let info: VmInfoOutput = serde_json::from_str(&out)?;
        info.virtual_machines
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(InventoryKind::VirtualMachine.as_str(), vm.inventory_path.as_str()))
    }
}

fn type_flag(kind: InventoryKind) -> &'static str {
    match kind {
        InventoryKind::Datacenter => "d",
        InventoryKind::Datastore => "s",
        InventoryKind::Network => "n",
        InventoryKind::Folder => "f",
        InventoryKind::ResourcePool => "p",
        InventoryKind::VirtualMachine => "m",
    }
}

fn lines(out: &str) -> impl Iterator<Item = &str> {
    out.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// `Datastore:datastore-12`
fn parse_reference(reference: &str) -> Result<ManagedObjectRef> {
    reference
        .split_once(':')
        .map(|(kind, value)| ManagedObjectRef::new(kind, value))
        .ok_or_else(|| Error::api("find", format!("malformed reference {:?}", reference)))
}

fn is_not_found(err: &Error) -> bool {
    match err {
        Error::Api { message, .. } => message.contains("not found"),
        other => other.is_not_found(),
    }
}

/// `govc device.ls` rows: name, type, summary
fn parse_device_list(out: &str) -> Vec<VirtualDevice> {
    lines(out)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?.to_string();
            let device_type = fields.next()?.to_string();
            let summary = fields.collect::<Vec<_>>().join(" ");
            Some(VirtualDevice {
                key: 0,
                name,
                device_type,
                summary,
            })
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct VmInfoOutput {
    #[serde(rename = "VirtualMachines", alias = "virtualMachines", default)]
    virtual_machines: Vec<VmInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct VmInfo {
    #[serde(rename = "Runtime", alias = "runtime", default)]
    runtime: VmRuntime,
}

#[derive(Debug, Default, Deserialize)]
struct VmRuntime {
    #[serde(rename = "PowerState", alias = "powerState", default)]
    power_state: Option<PowerState>,
}

#[derive(Debug, Deserialize)]
struct TaskJson {
    #[serde(rename = "Task", alias = "task")]
    task: ManagedObjectRef,
    #[serde(rename = "DescriptionId", alias = "descriptionId", default)]
    description_id: String,
    #[serde(rename = "EntityName", alias = "entityName", default)]
    entity_name: String,
    #[serde(rename = "State", alias = "state")]
    state: TaskState,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TasksOutput {
    List(Vec<TaskJson>),
    Wrapped {
        #[serde(alias = "Info", alias = "info", alias = "Tasks")]
        tasks: Vec<TaskJson>,
    },
}

#[async_trait]
impl VsphereApi for GovcApi {
    async fn session_is_active(&self) -> Result<bool> {
        Ok(self.output("about", ["about"]).await.is_ok())
    }

    async fn list(&self, kind: InventoryKind, root: &str, pattern: &str) -> Result<Vec<InventoryObject>> {
        self.find(kind, root, &["-name", pattern]).await
    }

    async fn find_folder(&self, path: &str) -> Result<Option<InventoryObject>> {
        self.lookup(InventoryKind::Folder, path).await
    }

    async fn create_folder(&self, parent: &InventoryObject, name: &str) -> Result<InventoryObject> {
        let path = format!("{}/{}", parent.inventory_path, name);
        self.output("folder.create", ["folder.create", path.as_str()]).await?;
        self.lookup(InventoryKind::Folder, &path)
            .await?
            .ok_or_else(|| Error::not_found(InventoryKind::Folder.as_str(), path))
    }

    async fn destroy_folder(&self, folder: &InventoryObject) -> Result<()> {
        self.output("object.destroy", ["object.destroy", folder.inventory_path.as_str()])
            .await
            .map(|_| ())
    }

    async fn find_vm(&self, path: &str) -> Result<Option<VirtualMachine>> {
        Ok(self
            .lookup(InventoryKind::VirtualMachine, path)
            .await?
            .map(|o| VirtualMachine::new(o.inventory_path, o.moref)))
    }

    async fn find_vm_by_name(&self, datacenter: &InventoryObject, name: &str) -> Result<Option<VirtualMachine>> {
        let found = self
            .find(InventoryKind::VirtualMachine, &datacenter.inventory_path, &["-name", name])
            .await?;
        Ok(found
            .into_iter()
            .next()
            .map(|o| VirtualMachine::new(o.inventory_path, o.moref)))
    }

    async fn create_import_spec(
        &self,
        descriptor: &str,
        pool: &InventoryObject,
        datastore: &InventoryObject,
        params: &ImportSpecParams,
    ) -> Result<ImportSpec> {
        Ok(import_spec_from_descriptor(descriptor, pool, datastore, params))
    }

    async fn import_vapp(&self, spec: &ImportSpec, folder: &InventoryObject) -> Result<Box<dyn ImportLease>> {
        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let staging = self
            .staging_root
            .join(format!("{}-{}", spec.params.entity_name, stamp));
        Ok(Box::new(GovcLease {
            api: self.clone(),
            spec: spec.clone(),
            folder: folder.clone(),
            staging,
        }))
    }

    async fn devices(&self, vm: &VirtualMachine) -> Result<Vec<VirtualDevice>> {
        let out = self
            .output("device.ls", ["device.ls", "-vm", vm.inventory_path.as_str()])
            .await?;
        Ok(parse_device_list(&out))
    }

    async fn reconfigure(&self, vm: &VirtualMachine, spec: &ConfigSpec) -> Result<()> {
        let path = vm.inventory_path.as_str();

        let removals: Vec<&str> = spec
            .device_change
            .iter()
            .filter_map(|c| match c {
                DeviceChange::Remove(device) => Some(device.name.as_str()),
                _ => None,
            })
            .collect();
        if !removals.is_empty() {
            let mut args = vec!["device.remove", "-vm", path];
            args.extend(removals);
            self.output("device.remove", args).await?;
        }

        for change in &spec.device_change {
            if let DeviceChange::AddVmxnet3 { network, .. } = change {
                self.output(
                    "vm.network.add",
                    [
                        "vm.network.add",
                        "-vm",
                        path,
                        "-net",
                        network.inventory_path.as_str(),
                        "-net.adapter",
                        "vmxnet3",
                    ],
                )
                .await?;
            }
        }

        if !spec.extra_config.is_empty() {
            let mut args: Vec<String> = vec!["vm.change".into(), "-vm".into(), path.to_string()];
            for option in &spec.extra_config {
                args.push("-e".into());
                args.push(format!("{}={}", option.key, option.value));
            }
            self.output("vm.change", args).await?;
        }
        Ok(())
    }

    async fn mark_as_template(&self, vm: &VirtualMachine) -> Result<()> {
        self.output("vm.markastemplate", ["vm.markastemplate", vm.inventory_path.as_str()])
            .await
            .map(|_| ())
    }

    async fn clone_vm(
        &self,
        template: &VirtualMachine,
        folder: &InventoryObject,
        name: &str,
        spec: &CloneSpec,
    ) -> Result<()> {
        let linked = spec.disk_move_type == DiskMoveType::CreateNewChildDiskBacking;
        let args = [
            "vm.clone".to_string(),
            "-vm".into(),
            template.inventory_path.clone(),
            "-folder".into(),
            folder.inventory_path.clone(),
            "-ds".into(),
            spec.datastore.inventory_path.clone(),
            "-pool".into(),
            spec.pool.inventory_path.clone(),
            "-on=false".into(),
            format!("-link={}", linked),
            name.to_string(),
        ];
        self.run("vm.clone", self.govc(args).timeout(CLONE_TIMEOUT)).await?;

        let path = format!("{}/{}", folder.inventory_path, name);
        let vm = self
            .find_vm(&path)
            .await?
            .ok_or_else(|| Error::not_found(InventoryKind::VirtualMachine.as_str(), path))?;
        if !spec.config.is_empty() {
            self.reconfigure(&vm, &spec.config).await?;
        }
        if spec.power_on {
            self.power_on(&vm).await?;
        }
        Ok(())
    }

    async fn power_state(&self, vm: &VirtualMachine) -> Result<PowerState> {
        let info = self.vm_info(vm).await?;
        info.runtime
            .power_state
            .ok_or_else(|| Error::api("vm.info", format!("no power state for {}", vm.inventory_path)))
    }

    async fn power_on(&self, vm: &VirtualMachine) -> Result<()> {
        self.output("vm.power", ["vm.power", "-on", vm.inventory_path.as_str()])
            .await
            .map(|_| ())
    }

    async fn power_off(&self, vm: &VirtualMachine) -> Result<()> {
        self.output("vm.power", ["vm.power", "-off", "-force", vm.inventory_path.as_str()])
            .await
            .map(|_| ())
    }

    async fn destroy_vm(&self, vm: &VirtualMachine) -> Result<()> {
        self.output("vm.destroy", ["vm.destroy", vm.inventory_path.as_str()])
            .await
            .map(|_| ())
    }

    async fn recent_tasks(&self, vm: &VirtualMachine) -> Result<Vec<TaskInfo>> {
        let out = self
            .output("tasks", ["tasks", "-json", vm.inventory_path.as_str()])
            .await?;
        if out.trim().is_empty() {
            return Ok(Vec::new());
        }
        let tasks = match serde_json::from_str::<TasksOutput>(&out)? {
            TasksOutput::List(tasks) | TasksOutput::Wrapped { tasks } => tasks,
        };
        Ok(tasks
            .into_iter()
            .map(|t| TaskInfo {
                task: t.task,
                description_id: t.description_id,
                entity_name: t.entity_name,
                state: t.state,
            })
            .collect())
    }

    async fn cancel_task(&self, task: &TaskInfo) -> Result<()> {
        self.output("task.cancel", ["task.cancel", task.task.value.as_str()])
            .await
            .map(|_| ())
    }
}

// =============================================================================
// Import spec
// =============================================================================

/// Validate a descriptor locally and list the files it references
pub fn import_spec_from_descriptor(
    descriptor: &str,
    pool: &InventoryObject,
    datastore: &InventoryObject,
    params: &ImportSpecParams,
) -> ImportSpec {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !descriptor.contains("<Envelope") && !descriptor.contains(":Envelope") {
        errors.push("descriptor is not an OVF envelope".to_string());
    }

    let file_items: Vec<FileItem> = tags(descriptor, "File")
        .filter_map(|tag| {
            let path = attr(tag, "href")?;
            Some(FileItem {
                device_id: attr(tag, "id").unwrap_or_default(),
                size: attr(tag, "size").and_then(|s| s.parse().ok()),
                path,
            })
        })
        .collect();
    if errors.is_empty() && file_items.is_empty() {
        errors.push("descriptor references no files".to_string());
    }

    let mapped: Vec<&str> = params.network_mapping.iter().map(|m| m.name.as_str()).collect();
    for network in tags(descriptor, "Network").filter_map(|tag| attr(tag, "name")) {
        if !mapped.contains(&network.as_str()) {
            warnings.push(format!("OVF network {:?} is not mapped", network));
        }
    }

    let ovf_section = descriptor
        .contains("ProductSection")
        .then(|| "ProductSection".to_string());

    ImportSpec {
        params: params.clone(),
        descriptor: descriptor.to_string(),
        datastore: datastore.clone(),
        pool: pool.clone(),
        file_items,
        ovf_section,
        errors,
        warnings,
    }
}

/// Opening tags `<name ...>` or `<ns:name ...>`
fn tags<'a>(xml: &'a str, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    xml.split('<').skip(1).filter_map(move |chunk| {
        let tag = chunk.split('>').next()?;
        let element = tag.split_whitespace().next()?;
        let local = element.rsplit(':').next()?;
        (local == name).then_some(tag)
    })
}

/// Attribute value by local name, ignoring any namespace prefix
fn attr(tag: &str, name: &str) -> Option<String> {
    let mut rest = tag;
    while let Some(eq) = rest.find("=\"") {
        let key = rest[..eq].split_whitespace().last().unwrap_or_default();
        let after = &rest[eq + 2..];
        let end = after.find('"')?;
        if key.rsplit(':').next() == Some(name) {
            return Some(after[..end].to_string());
        }
        rest = &after[end + 1..];
    }
    None
}

// =============================================================================
// Lease
// =============================================================================

/// Staging directory standing in for an NFC lease
pub struct GovcLease {
    api: GovcApi,
    spec: ImportSpec,
    folder: InventoryObject,
    staging: PathBuf,
}

impl GovcLease {
    fn descriptor_path(&self) -> PathBuf {
        self.staging.join(format!("{}.ovf", self.spec.params.entity_name))
    }

    fn options(&self) -> serde_json::Value {
        let params = &self.spec.params;
        let mappings: Vec<_> = params
            .network_mapping
            .iter()
            .map(|m| json!({ "Name": m.name, "Network": m.network.name }))
            .collect();
        json!({
            "DiskProvisioning": params.disk_provisioning,
            "IPAllocationPolicy": params.ip_allocation_policy,
            "IPProtocol": params.ip_protocol,
            "NetworkMapping": mappings,
            "MarkAsTemplate": false,
            "PowerOn": false,
            "InjectOvfEnv": self.spec.ovf_section.is_some(),
            "WaitForIP": false,
            "Name": params.entity_name,
        })
    }

    async fn remove_staging(&self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.staging.display(), error = %e, "failed to remove staging directory");
            }
        }
    }
}

fn staged_path(staging: &Path, item: &FileItem) -> PathBuf {
    let relative = item.path.trim_start_matches('/');
    if relative.split('/').any(|segment| segment == "..") {
        staging.join(basename(relative))
    } else {
        staging.join(relative)
    }
}

#[async_trait]
impl ImportLease for GovcLease {
    async fn wait(&self) -> Result<Vec<LeaseItem>> {
        tokio::fs::create_dir_all(&self.staging).await?;
        tokio::fs::write(self.descriptor_path(), &self.spec.descriptor).await?;

        let mut items = Vec::with_capacity(self.spec.file_items.len());
        for item in &self.spec.file_items {
            let target = staged_path(&self.staging, item);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::File::create(&target).await?;
            items.push(LeaseItem {
                item: item.clone(),
                target: target.to_string_lossy().into_owned(),
            });
        }
        debug!(staging = %self.staging.display(), files = items.len(), "import lease ready");
        Ok(items)
    }

    async fn upload(&self, item: &LeaseItem, chunk: Bytes) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&item.target)
            .await?;
        file.write_all(&chunk).await?;
        file.flush().await?;
        Ok(())
    }

    async fn progress(&self, percent: u8) -> Result<()> {
        debug!(template = %self.spec.params.entity_name, percent, "upload progress");
        Ok(())
    }

    async fn complete(&self) -> Result<VirtualMachine> {
        let options = self.staging.join("options.json");
        tokio::fs::write(&options, serde_json::to_vec_pretty(&self.options())?).await?;

        let args = [
            "import.ovf".to_string(),
            format!("-options={}", options.display()),
            "-ds".into(),
            self.spec.datastore.inventory_path.clone(),
            "-pool".into(),
            self.spec.pool.inventory_path.clone(),
            "-folder".into(),
            self.folder.inventory_path.clone(),
            "-name".into(),
            self.spec.params.entity_name.clone(),
            self.descriptor_path().to_string_lossy().into_owned(),
        ];
        let imported = self
            .api
            .run("import.ovf", self.api.govc(args).timeout(IMPORT_TIMEOUT))
            .await;
        self.remove_staging().await;
        imported?;

        let path = format!("{}/{}", self.folder.inventory_path, self.spec.params.entity_name);
        let vm = self
            .api
            .find_vm(&path)
            .await?
            .ok_or_else(|| Error::not_found(InventoryKind::VirtualMachine.as_str(), path))?;
        info!(vm = %vm.inventory_path, "import complete");
        Ok(vm)
    }

    async fn abort(&self, reason: &str) -> Result<()> {
        warn!(template = %self.spec.params.entity_name, %reason, "aborting import");
        self.remove_staging().await;
        Ok(())
    }
}
