//! VM teardown that copes with in-flight creation.

use tracing::{debug, info, warn};

use crate::api::VsphereApi;
use crate::manager::HypervisorResourceManager;
use crate::types::{PowerState, VirtualMachine};
use crate::Result;

impl HypervisorResourceManager {
    /// Whether `vm` still exists. A different VM now at the same path counts
    /// as absent.
    pub async fn vm_exists(&self, vm: &VirtualMachine) -> Result<bool> {
        let api = self.client().await?;
        vm_exists(api.as_ref(), vm).await
    }

    /// Look up a VM by name in the placement datacenter
    pub async fn find_vm(&self, name: &str) -> Result<Option<VirtualMachine>> {
        let dc = self.placement().datacenter()?;
        self.client().await?.find_vm_by_name(dc, name).await
    }

    /// Destroy `vm`, cancelling its running tasks first. Deleting a VM that
    /// is already gone succeeds.
    pub async fn delete_vm(&self, vm: &VirtualMachine) -> Result<()> {
        let api = self.client().await?;
        let api = api.as_ref();

        if !vm_exists(api, vm).await? {
            debug!(vm = %vm.inventory_path, "VM not found, nothing to delete");
            return Ok(());
        }

        let tasks = api.recent_tasks(vm).await?;
        if !tasks.is_empty() {
            debug!(vm = %vm.inventory_path, count = tasks.len(), "found tasks");
            for task in tasks.iter().filter(|t| t.state.is_active()) {
                debug!(vm = %vm.inventory_path, task = %task.task, description = %task.description_id, "cancelling task");
                api.cancel_task(task).await?;
            }

            // A cancelled upload or clone removes the VM by itself
            if tasks.iter().any(|t| t.is_active_creation()) {
                for attempt in 1..=self.cancel_attempts {
                    match vm_exists(api, vm).await {
                        Ok(false) => {
                            info!(vm = %vm.inventory_path, "VM removed after cancelling its creation");
                            return Ok(());
                        }
                        Ok(true) => {}
                        Err(e) => warn!(vm = %vm.inventory_path, attempt, error = %e, "existence check failed"),
                    }
                    tokio::time::sleep(self.cancel_interval).await;
                }
                debug!(vm = %vm.inventory_path, "VM still present after cancelling creation");
            }
        }

        if !vm_exists(api, vm).await? {
            debug!(vm = %vm.inventory_path, "VM not found, nothing to delete");
            return Ok(());
        }

        if api.power_state(vm).await? != PowerState::PoweredOff {
            debug!(vm = %vm.inventory_path, "powering off");
            api.power_off(vm).await?;
        }
        api.destroy_vm(vm).await?;
        info!(vm = %vm.inventory_path, "deleted VM");
        Ok(())
    }
}

async fn vm_exists(api: &dyn VsphereApi, vm: &VirtualMachine) -> Result<bool> {
    match api.find_vm(&vm.inventory_path).await {
        Ok(Some(found)) if found.moref == vm.moref => Ok(true),
        Ok(Some(found)) => {
            debug!(
                vm = %vm.inventory_path,
                want = %vm.moref,
                found = %found.moref,
                "another VM now occupies this path"
            );
            Ok(false)
        }
        Ok(None) => Ok(false),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}
