//! Typed decoding of `kubectl get --output=json` results.
//!
//! Each supported kind has a fixed shape: core objects are fetched by name
//! and decode as a single object, while Cluster API custom resources are
//! listed and the first item is taken. [`KubeKind`] selects the shape and
//! [`decode`] returns a [`KubeObject`] variant for it; [`decode_as`] is the
//! statically typed form.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::{Error, Result};

/// Kinds the engine reads back from a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KubeKind {
    /// core/v1 Secret
    Secret,
    /// core/v1 ConfigMap
    ConfigMap,
    /// controlplane.cluster.x-k8s.io KubeadmControlPlane
    KubeadmControlPlane,
    /// infrastructure.cluster.x-k8s.io VSphereMachineTemplate
    VSphereMachineTemplate,
    /// infrastructure.cluster.x-k8s.io HAProxyLoadBalancer
    HAProxyLoadBalancer,
}

impl KubeKind {
    /// Resource name passed to `kubectl get`
    pub fn resource(&self) -> &'static str {
        match self {
            Self::Secret => "secret",
            Self::ConfigMap => "configmap",
            Self::KubeadmControlPlane => "kubeadmcontrolplane",
            Self::VSphereMachineTemplate => "vspheremachinetemplate",
            Self::HAProxyLoadBalancer => "haproxyloadbalancer",
        }
    }

    /// Whether `kubectl get` returns a List for this kind
    pub fn is_list(&self) -> bool {
        !matches!(self, Self::Secret | Self::ConfigMap)
    }
}

impl std::fmt::Display for KubeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.resource())
    }
}

/// A decoded object, tagged by kind
#[derive(Debug, Clone)]
pub enum KubeObject {
    /// Secret
    Secret(Secret),
    /// ConfigMap
    ConfigMap(ConfigMap),
    /// KubeadmControlPlane
    KubeadmControlPlane(KubeadmControlPlane),
    /// VSphereMachineTemplate
    VSphereMachineTemplate(VSphereMachineTemplate),
    /// HAProxyLoadBalancer
    HAProxyLoadBalancer(HAProxyLoadBalancer),
}

/// Types with a fixed [`KubeKind`]
pub trait KubeResource: DeserializeOwned {
    /// Kind used for lookup and decoding
    const KIND: KubeKind;
}

impl KubeResource for Secret {
    const KIND: KubeKind = KubeKind::Secret;
}

impl KubeResource for ConfigMap {
    const KIND: KubeKind = KubeKind::ConfigMap;
}

#[derive(Deserialize)]
struct List<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// Decode `kubectl get` JSON output as `T`
pub fn decode_as<T: KubeResource>(json: &[u8]) -> Result<T> {
    if T::KIND.is_list() {
        let list: List<T> = serde_json::from_slice(json)
            .map_err(|e| Error::decode(T::KIND.resource(), e.to_string()))?;
        list.items
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(T::KIND.resource(), "first list item"))
    } else {
        serde_json::from_slice(json).map_err(|e| Error::decode(T::KIND.resource(), e.to_string()))
    }
}

/// Decode `kubectl get` JSON output for a kind chosen at runtime
pub fn decode(kind: KubeKind, json: &[u8]) -> Result<KubeObject> {
    Ok(match kind {
        KubeKind::Secret => KubeObject::Secret(decode_as(json)?),
        KubeKind::ConfigMap => KubeObject::ConfigMap(decode_as(json)?),
        KubeKind::KubeadmControlPlane => KubeObject::KubeadmControlPlane(decode_as(json)?),
        KubeKind::VSphereMachineTemplate => KubeObject::VSphereMachineTemplate(decode_as(json)?),
        KubeKind::HAProxyLoadBalancer => KubeObject::HAProxyLoadBalancer(decode_as(json)?),
    })
}

/// Raw bytes of one key of a Secret's `data`
pub fn secret_value(secret: &Secret, key: &str) -> Result<Vec<u8>> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|v| v.0.clone())
        .ok_or_else(|| Error::not_found("secret key", format!("{}/{}", name, key)))
}

// =============================================================================
// Cluster API resources (only the fields the engine reads)
// =============================================================================

/// KubeadmControlPlane
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeadmControlPlane {
    /// Object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Observed status
    #[serde(default)]
    pub status: Option<KubeadmControlPlaneStatus>,
}

/// KubeadmControlPlane status
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KubeadmControlPlaneStatus {
    /// Control plane can receive requests
    pub ready: bool,
    /// First control plane machine has been initialised
    pub initialized: bool,
    /// Total replicas
    pub replicas: Option<i32>,
    /// Ready replicas
    pub ready_replicas: Option<i32>,
}

impl KubeadmControlPlane {
    /// Whether the control plane reports ready
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }
}

impl KubeResource for KubeadmControlPlane {
    const KIND: KubeKind = KubeKind::KubeadmControlPlane;
}

/// VSphereMachineTemplate
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VSphereMachineTemplate {
    /// Object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Template spec
    #[serde(default)]
    pub spec: VSphereMachineTemplateSpec,
}

/// VSphereMachineTemplate spec
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VSphereMachineTemplateSpec {
    /// Machine template
    #[serde(default)]
    pub template: VSphereMachineTemplateResource,
}

/// VSphereMachineTemplate resource wrapper
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VSphereMachineTemplateResource {
    /// Machine spec
    #[serde(default)]
    pub spec: VSphereMachineSpec,
}

/// vSphere machine placement and networking
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VSphereMachineSpec {
    /// Source template
    pub template: String,
    /// Datacenter
    pub datacenter: String,
    /// Datastore
    pub datastore: String,
    /// Folder
    pub folder: String,
    /// Resource pool
    pub resource_pool: String,
    /// Network devices
    pub network: VSphereNetwork,
}

/// Network section of a vSphere machine
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VSphereNetwork {
    /// Attached devices
    pub devices: Vec<NetworkDevice>,
}

/// One NIC of a vSphere machine
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkDevice {
    /// Portgroup name
    pub network_name: String,
    /// DHCP for IPv4
    pub dhcp4: bool,
}

impl KubeResource for VSphereMachineTemplate {
    const KIND: KubeKind = KubeKind::VSphereMachineTemplate;
}

/// HAProxyLoadBalancer
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HAProxyLoadBalancer {
    /// Object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Observed status
    #[serde(default)]
    pub status: Option<HAProxyLoadBalancerStatus>,
}

/// HAProxyLoadBalancer status
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HAProxyLoadBalancerStatus {
    /// Load balancer address
    pub address: String,
    /// Load balancer is serving
    pub ready: bool,
    /// Unparsed remainder
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl KubeResource for HAProxyLoadBalancer {
    const KIND: KubeKind = KubeKind::HAProxyLoadBalancer;
}
