//! Vsphere command - inventory and template helpers
//!
//! Talks to vCenter through govc using the credentials and placement from
//! the config file. Ambiguous placement is settled interactively.

use std::path::Path;
use std::sync::Arc;

use clap::{Args, Subcommand, ValueEnum};
use tracing::info;

use capv_common::{LogSink, ProcessRunner, ProvisioningSpec};
use capv_vsphere::{
    select, Endpoint, GovcConnector, HypervisorResourceManager, InventoryKind, Placement,
    ResourcePicker,
};

use crate::commands::picker::PromptPicker;
use crate::config::{load_spec, Overrides};
use crate::{Error, Result};

/// Directory under the cluster work dir used for OVA staging
const STAGING_DIR: &str = "govc-staging";

#[derive(Args, Debug)]
pub struct VsphereArgs {
    #[command(subcommand)]
    pub command: VsphereCommand,
}

#[derive(Subcommand, Debug)]
pub enum VsphereCommand {
    /// List inventory objects in the configured datacenter
    List {
        #[arg(value_enum)]
        kind: ListKind,
    },
    /// Import an OVA as a VM template
    DeployTemplate {
        /// Template name
        #[arg(long)]
        name: String,
        /// Local path or http(s) URL of the OVA
        #[arg(long)]
        ova: String,
    },
    /// Power off and destroy a VM or template
    DeleteVm {
        #[arg(long)]
        name: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ListKind {
    Datacenters,
    Datastores,
    Networks,
    Folders,
    #[value(alias = "pools")]
    ResourcePools,
    Vms,
}

impl From<ListKind> for InventoryKind {
    fn from(kind: ListKind) -> Self {
        match kind {
            ListKind::Datacenters => InventoryKind::Datacenter,
            ListKind::Datastores => InventoryKind::Datastore,
            ListKind::Networks => InventoryKind::Network,
            ListKind::Folders => InventoryKind::Folder,
            ListKind::ResourcePools => InventoryKind::ResourcePool,
            ListKind::Vms => InventoryKind::VirtualMachine,
        }
    }
}

pub async fn run(args: VsphereArgs, config: &Path, overrides: Overrides) -> Result<()> {
    let spec = load_spec(config, overrides)?;
    let picker = PromptPicker::stdin();

    match args.command {
        VsphereCommand::List { kind } => {
            let manager = with_datacenter(manager(&spec)?, &spec, &picker).await?;
            let kind = InventoryKind::from(kind);
            for object in manager.list(kind).await? {
                println!("{}\t{}\t{}", object.name, object.inventory_path, object.moref);
            }
        }
        VsphereCommand::DeployTemplate { name, ova } => {
            if name.trim().is_empty() {
                return Err(Error::validation("--name must not be empty"));
            }
            let mut manager = manager(&spec)?;
            manager.resolve(&spec.vsphere, Some(&picker as &dyn ResourcePicker)).await?;
            let template = manager.deploy_ova_template(&name, &ova).await?;
            info!(template = %template.inventory_path, "template deployed");
            println!("{}", template.inventory_path);
        }
        VsphereCommand::DeleteVm { name } => {
            let manager = with_datacenter(manager(&spec)?, &spec, &picker).await?;
            match manager.find_vm(&name).await? {
                Some(vm) => {
                    manager.delete_vm(&vm).await?;
                    println!("deleted {}", vm.inventory_path);
                }
                None => return Err(Error::validation(format!("no VM named '{}'", name))),
            }
        }
    }
    Ok(())
}

fn manager(spec: &ProvisioningSpec) -> Result<HypervisorResourceManager> {
    let endpoint = Endpoint::from_spec(&spec.vsphere)?;
    let sink = match &spec.log_file {
        Some(path) => LogSink::file(path)?,
        None => LogSink::discard(),
    };
    let staging = capv_common::workdir::default_base_dir()?
        .join(&spec.cluster_name)
        .join(STAGING_DIR);
    let connector = GovcConnector::new(Arc::new(ProcessRunner::new(sink)), staging);
    Ok(HypervisorResourceManager::new(Arc::new(connector), endpoint))
}

/// Pin only the datacenter; enough for listing and lookups
async fn with_datacenter(
    manager: HypervisorResourceManager,
    spec: &ProvisioningSpec,
    picker: &dyn ResourcePicker,
) -> Result<HypervisorResourceManager> {
    let preset = spec
        .vsphere
        .datacenter_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| spec.vsphere.datacenter.clone());
    let datacenter = select(
        InventoryKind::Datacenter,
        manager.datacenters().await?,
        Some(preset.as_str()),
        Some(picker),
    )
    .await?;
    Ok(manager.with_placement(Placement {
        datacenter: Some(datacenter),
        ..Placement::default()
    }))
}
