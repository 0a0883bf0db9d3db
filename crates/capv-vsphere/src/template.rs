//! OVA template import.

use tracing::{debug, info, warn};

use crate::api::{ImportLease, VsphereApi};
use crate::manager::HypervisorResourceManager;
use crate::ova::OvaArchive;
use crate::types::{ConfigSpec, DeviceChange, ImportSpecParams, VirtualMachine};
use crate::{Error, Result};

impl HypervisorResourceManager {
    /// Import `location` (local path or URL) as template `name`.
    ///
    /// An existing VM or template with that name is returned untouched.
    pub async fn deploy_ova_template(&self, name: &str, location: &str) -> Result<VirtualMachine> {
        let placement = self.placement();
        let dc = placement.datacenter()?;
        let api = self.client().await?;

        if let Some(existing) = api.find_vm_by_name(dc, name).await? {
            info!(template = %name, path = %existing.inventory_path, "template already present");
            return Ok(existing);
        }

        let archive = OvaArchive::open(location)?;
        self.import(api.as_ref(), name, &archive).await
    }

    async fn import(&self, api: &dyn VsphereApi, name: &str, archive: &OvaArchive) -> Result<VirtualMachine> {
        let placement = self.placement();
        let ovf = archive.find("*.ovf").await?;
        let descriptor = String::from_utf8(archive.read_entry(&ovf).await?.to_vec())
            .map_err(|e| Error::archive(archive.location(), format!("{} is not UTF-8: {}", ovf.name, e)))?;

        // nic0 only has to map somewhere valid; NICs are replaced at clone time
        let params = ImportSpecParams::for_template(name, placement.network()?.clone());
        let mut spec = api
            .create_import_spec(&descriptor, placement.resource_pool()?, placement.datastore()?, &params)
            .await?;
        if !spec.errors.is_empty() {
            return Err(Error::ImportSpecInvalid {
                template: name.to_string(),
                errors: spec.errors,
            });
        }
        for warning in &spec.warnings {
            warn!(template = %name, %warning, "import spec warning");
        }
        spec.ovf_section = None;

        let lease = api.import_vapp(&spec, placement.folder()?).await?;
        if let Err(e) = self.upload(lease.as_ref(), name, archive).await {
            if let Err(abort) = lease.abort(&e.to_string()).await {
                warn!(template = %name, error = %abort, "failed to abort import lease");
            }
            return Err(e);
        }
        let vm = lease.complete().await?;
        info!(template = %name, path = %vm.inventory_path, "imported OVA");

        remove_nics(api, &vm).await?;
        api.mark_as_template(&vm).await?;
        info!(template = %name, "marked as template");
        Ok(vm)
    }

    async fn upload(&self, lease: &dyn ImportLease, name: &str, archive: &OvaArchive) -> Result<()> {
        let lease_error = |message: String| Error::Lease {
            template: name.to_string(),
            message,
        };

        let items = lease.wait().await?;
        let mut plan = Vec::with_capacity(items.len());
        for item in items {
            let entry = archive
                .entry(&item.item.path)
                .await
                .map_err(|e| lease_error(e.to_string()))?;
            plan.push((item, entry));
        }
        let total: u64 = plan.iter().map(|(_, e)| e.size).sum::<u64>().max(1);

        let mut sent = 0u64;
        let mut reported = 0u8;
        for (item, entry) in &plan {
            debug!(template = %name, file = %entry.name, size = entry.size, "uploading");
            let mut offset = 0u64;
            while offset < entry.size {
                let len = self.chunk_size.min(entry.size - offset);
                let chunk = archive.read_range(entry, offset, len).await?;
                lease
                    .upload(item, chunk)
                    .await
                    .map_err(|e| lease_error(e.to_string()))?;
                offset += len;
                sent += len;

                let percent = (sent * 100 / total) as u8;
                if percent != reported {
                    lease.progress(percent).await?;
                    reported = percent;
                }
            }
        }
        Ok(())
    }
}

/// Remove every network adapter
pub(crate) async fn remove_nics(api: &dyn VsphereApi, vm: &VirtualMachine) -> Result<()> {
    let removals: Vec<DeviceChange> = api
        .devices(vm)
        .await?
        .into_iter()
        .filter(|d| d.is_ethernet_card())
        .map(DeviceChange::Remove)
        .collect();
    if removals.is_empty() {
        debug!(vm = %vm.inventory_path, "no NICs to remove");
        return Ok(());
    }
    debug!(vm = %vm.inventory_path, count = removals.len(), "removing NICs");
    api.reconfigure(
        vm,
        &ConfigSpec {
            device_change: removals,
            ..Default::default()
        },
    )
    .await
}
