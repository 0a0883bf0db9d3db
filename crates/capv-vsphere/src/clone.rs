//! Cloning templates into VMs with cloud-init first-boot configuration.

use tracing::info;

use crate::cloudinit::{self, Metadata};
use crate::manager::HypervisorResourceManager;
use crate::types::{
    CloneSpec, ConfigSpec, DeviceChange, DiskMoveType, InventoryKind, VirtualMachine, NEW_DEVICE_KEY,
};
use crate::{Error, Result};

/// What to clone and how the guest boots
#[derive(Debug, Clone, Default)]
pub struct CloneRequest {
    /// Template name
    pub template: String,
    /// New VM name
    pub name: String,
    /// Script the guest runs on first boot
    pub boot_script: String,
    /// Authorized key for `os_user`; empty for none
    pub public_key: String,
    /// Guest user created by cloud-init
    pub os_user: String,
    /// Injected as `guestinfo.metadata` when set
    pub metadata: Option<Metadata>,
}

impl CloneRequest {
    /// A request with no metadata
    pub fn new(
        template: impl Into<String>,
        name: impl Into<String>,
        boot_script: impl Into<String>,
        public_key: impl Into<String>,
        os_user: impl Into<String>,
    ) -> Self {
        Self {
            template: template.into(),
            name: name.into(),
            boot_script: boot_script.into(),
            public_key: public_key.into(),
            os_user: os_user.into(),
            metadata: None,
        }
    }

    /// Inject `metadata` as guest metadata
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl HypervisorResourceManager {
    /// Clone a template powered off, swap its NICs for a single vmxnet3 on
    /// the placement network, attach cloud-init data, then power it on.
    pub async fn clone_template(&self, request: &CloneRequest) -> Result<VirtualMachine> {
        let placement = self.placement();
        let dc = placement.datacenter()?;
        let folder = placement.folder()?;
        let network = placement.network()?;
        let api = self.client().await?;

        let template = api
            .find_vm_by_name(dc, &request.template)
            .await?
            .ok_or_else(|| Error::not_found(InventoryKind::VirtualMachine.as_str(), request.template.as_str()))?;

        let mut extra_config =
            cloudinit::generate_user_data(&request.boot_script, &request.public_key, &request.os_user)?;
        if let Some(metadata) = &request.metadata {
            extra_config.extend(cloudinit::metadata_options(&metadata.render()?));
        }

        let mut device_change: Vec<DeviceChange> = api
            .devices(&template)
            .await?
            .into_iter()
            .filter(|d| d.is_ethernet_card())
            .map(DeviceChange::Remove)
            .collect();
        device_change.push(DeviceChange::AddVmxnet3 {
            key: NEW_DEVICE_KEY,
            network: network.clone(),
        });

        let spec = CloneSpec {
            datastore: placement.datastore()?.clone(),
            pool: placement.resource_pool()?.clone(),
            power_on: false,
            disk_move_type: DiskMoveType::MoveAllDiskBackingsAndConsolidate,
            config: ConfigSpec {
                device_change,
                extra_config,
            },
        };
        api.clone_vm(&template, folder, &request.name, &spec).await?;

        let path = format!("{}/{}", folder.inventory_path, request.name);
        let vm = api
            .find_vm(&path)
            .await?
            .ok_or_else(|| Error::not_found(InventoryKind::VirtualMachine.as_str(), path.as_str()))?;
        api.power_on(&vm).await?;

        info!(vm = %vm.inventory_path, template = %request.template, "cloned and powered on");
        Ok(vm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudinit::NetworkConfig;
    use crate::testing::{resolved_manager, FakeVsphere};
    use crate::types::PowerState;

    #[tokio::test]
    async fn clone_replaces_nics_and_injects_userdata() {
        let fake = FakeVsphere::seeded();
        fake.add_vm("/dc1/vm/ubuntu-tmpl", true);
        let manager = resolved_manager(&fake);

        let vm = manager
            .clone_template(&CloneRequest::new("ubuntu-tmpl", "node-0", "#!/bin/sh\ntrue\n", "ssh-rsa AAAA", "capv"))
            .await
            .unwrap();

        assert_eq!(vm.inventory_path, "/dc1/vm/node-0");
        let state = fake.vm("/dc1/vm/node-0").unwrap();
        assert_eq!(state.power, PowerState::PoweredOn);
        let nics: Vec<_> = state.devices.iter().filter(|d| d.is_ethernet_card()).collect();
        assert_eq!(nics.len(), 1);
        assert_eq!(nics[0].device_type, "VirtualVmxnet3");
        assert_eq!(nics[0].summary, "VM Network");
        assert!(state.extra_config.iter().any(|o| o.key == "guestinfo.userdata"));
        assert!(state
            .extra_config
            .iter()
            .any(|o| o.key == "guestinfo.userdata.encoding" && o.value == "base64"));
        assert!(!state.extra_config.iter().any(|o| o.key == "guestinfo.metadata"));

        let spec = fake.last_clone_spec().unwrap();
        assert!(!spec.power_on);
        assert_eq!(spec.disk_move_type, DiskMoveType::MoveAllDiskBackingsAndConsolidate);
        assert!(spec
            .config
            .device_change
            .iter()
            .any(|c| matches!(c, DeviceChange::AddVmxnet3 { key: -100, .. })));
    }

    #[tokio::test]
    async fn metadata_is_optional_extra_config() {
        let fake = FakeVsphere::seeded();
        fake.add_vm("/dc1/vm/ubuntu-tmpl", true);
        let manager = resolved_manager(&fake);
        let request = CloneRequest::new("ubuntu-tmpl", "node-1", "true", "", "capv").with_metadata(Metadata {
            hostname: "node-1".into(),
            networks: vec![NetworkConfig {
                mac_address: "00:50:56:00:00:01".into(),
                dhcp4: true,
                ..Default::default()
            }],
        });

        manager.clone_template(&request).await.unwrap();

        let state = fake.vm("/dc1/vm/node-1").unwrap();
        assert!(state.extra_config.iter().any(|o| o.key == "guestinfo.metadata"));
    }

    #[tokio::test]
    async fn missing_template_is_not_found() {
        let fake = FakeVsphere::seeded();
        let manager = resolved_manager(&fake);

        let err = manager
            .clone_template(&CloneRequest::new("absent", "node-0", "true", "", "capv"))
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(fake.calls_matching("clone_vm"), 0);
    }
}
