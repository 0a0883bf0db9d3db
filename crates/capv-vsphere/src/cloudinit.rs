//! Cloud-init user data and metadata delivered through VMware guestinfo.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use minijinja::{context, Environment};
use serde::Serialize;

use crate::types::OptionValue;
use crate::Result;

const USERDATA_TEMPLATE: &str = include_str!("../templates/userdata.yaml");
const METADATA_TEMPLATE: &str = include_str!("../templates/metadata.yaml");

/// Resolved by cloud-init's own jinja pass on first boot
const HOSTNAME_LOOKUP: &str = "{{ ds.meta_data.hostname }}";

/// Where the boot script is written on the guest
pub const BOOT_SCRIPT_PATH: &str = "/tmp/netapp-boot.sh";

/// Extra-config key carrying the user data
pub const USERDATA_KEY: &str = "guestinfo.userdata";
/// Extra-config key carrying the metadata
pub const METADATA_KEY: &str = "guestinfo.metadata";

/// First-boot user, keys and script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserData {
    /// Guest user name
    pub user: String,
    /// Public keys installed for `user`
    pub ssh_authorized_keys: Vec<String>,
    /// Script run once on first boot
    pub boot_script: String,
}

impl UserData {
    /// An empty `public_key` adds no authorized key
    pub fn new(boot_script: impl Into<String>, public_key: &str, os_user: impl Into<String>) -> Self {
        let ssh_authorized_keys = if public_key.trim().is_empty() {
            Vec::new()
        } else {
            vec![public_key.trim().to_string()]
        };
        Self {
            user: os_user.into(),
            ssh_authorized_keys,
            boot_script: boot_script.into(),
        }
    }

    /// Cloud-config document
    pub fn render(&self) -> Result<String> {
        render(
            "userdata",
            USERDATA_TEMPLATE,
            context! {
                user => &self.user,
                ssh_authorized_keys => &self.ssh_authorized_keys,
                boot_script => STANDARD.encode(&self.boot_script),
                boot_script_path => BOOT_SCRIPT_PATH,
                hostname_lookup => HOSTNAME_LOOKUP,
            },
        )
    }
}

/// Instance identity and NIC addressing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    /// Guest hostname
    pub hostname: String,
    /// One entry per NIC
    pub networks: Vec<NetworkConfig>,
}

/// Addressing for one NIC. Static fields are ignored when `dhcp4` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkConfig {
    /// Adapter MAC address
    pub mac_address: String,
    /// Use DHCP instead of the static fields
    pub dhcp4: bool,
    /// Static address
    pub ip_address: String,
    /// Static netmask
    pub netmask: String,
    /// Default gateway
    pub gateway: String,
    /// DNS servers
    pub name_servers: Vec<String>,
    /// DNS search domains
    pub dns_search: Vec<String>,
}

impl Metadata {
    /// Netplan style metadata document
    pub fn render(&self) -> Result<String> {
        render(
            "metadata",
            METADATA_TEMPLATE,
            context! {
                hostname => &self.hostname,
                networks => &self.networks,
            },
        )
    }
}

fn render(name: &str, template: &str, ctx: minijinja::Value) -> Result<String> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.add_template(name, template)?;
    Ok(env.get_template(name)?.render(ctx)?)
}

/// `guestinfo.<key>` = base64(data), plus the matching `.encoding` entry
fn encoded_options(key: &str, data: &str) -> Vec<OptionValue> {
    vec![
        OptionValue::new(key, STANDARD.encode(data)),
        OptionValue::new(format!("{}.encoding", key), "base64"),
    ]
}

/// Extra-config entries carrying rendered user data
pub fn userdata_options(user_data: &str) -> Vec<OptionValue> {
    encoded_options(USERDATA_KEY, user_data)
}

/// Extra-config entries carrying rendered metadata
pub fn metadata_options(metadata: &str) -> Vec<OptionValue> {
    encoded_options(METADATA_KEY, metadata)
}

/// Render user data for a boot script and wrap it as extra config
pub fn generate_user_data(boot_script: &str, public_key: &str, os_user: &str) -> Result<Vec<OptionValue>> {
    let rendered = UserData::new(boot_script, public_key, os_user).render()?;
    Ok(userdata_options(&rendered))
}
