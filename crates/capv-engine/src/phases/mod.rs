//! Phase implementations and the readiness waits they share

pub(crate) mod bootstrap;
pub(crate) mod install;
pub(crate) mod permanent;
pub(crate) mod pivot;
pub(crate) mod preflight;

use std::path::Path;

use capv_common::kube_get::{decode_as, KubeadmControlPlane};
use capv_common::retry::wait_with_timeout;
use capv_common::CommandRunnerExt;
use k8s_openapi::api::apps::v1::Deployment;
use serde::Deserialize;
use tracing::debug;

use crate::pipeline::PhaseContext;
use crate::Result;

/// Namespace clusterctl generates the workload objects into
pub(crate) const CLUSTER_NAMESPACE: &str = "default";

/// Node status column. The leading space keeps `NotReady` from matching.
pub(crate) const NODE_READY: &str = " Ready";

/// Machine phase once the VM has joined
pub(crate) const MACHINE_RUNNING: &str = "Running";

/// Controllers `clusterctl init --infrastructure=vsphere` installs
pub(crate) const PROVIDER_DEPLOYMENTS: [&str; 4] = [
    "capi-controller-manager",
    "capi-kubeadm-bootstrap-controller-manager",
    "capi-kubeadm-control-plane-controller-manager",
    "capv-controller-manager",
];

#[derive(Debug, Default, Deserialize)]
struct DeploymentList {
    #[serde(default)]
    items: Vec<Deployment>,
}

/// Wait until every provider controller has all of its replicas available
pub(crate) async fn wait_for_providers(ctx: &PhaseContext, kubeconfig: &Path) -> Result<()> {
    ctx.events
        .progress("waiting for the Cluster API provider controllers to become available");
    let invocation = ctx
        .kubectl(kubeconfig)
        .args(["get", "deployments", "--all-namespaces", "--output=json"]);
    let invocation = &invocation;

    wait_with_timeout(
        ctx.config.provider_ready_timeout,
        ctx.config.poll_interval,
        "Cluster API provider deployments",
        move || async move {
            match ctx.runner.output(invocation).await {
                Ok(json) => Ok(providers_available(&json).then_some(())),
                Err(e) => {
                    debug!(error = %e, "provider deployments not readable yet");
                    Ok(None)
                }
            }
        },
    )
    .await?;
    Ok(())
}

fn providers_available(json: &str) -> bool {
    let list: DeploymentList = match serde_json::from_str(json) {
        Ok(list) => list,
        Err(e) => {
            debug!(error = %e, "unexpected deployment list");
            return false;
        }
    };
    PROVIDER_DEPLOYMENTS.iter().all(|name| {
        list.items
            .iter()
            .any(|d| d.metadata.name.as_deref() == Some(*name) && is_available(d))
    })
}

fn is_available(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1)
        .max(1);
    let available = deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);
    available >= desired
}

/// Wait until the workload KubeadmControlPlane reports `status.ready`
pub(crate) async fn wait_for_control_plane(ctx: &PhaseContext, kubeconfig: &Path) -> Result<()> {
    ctx.events.progress("waiting for the control plane to report ready");
    let invocation = ctx
        .kubectl(kubeconfig)
        .args(["get", "kubeadmcontrolplane"])
        .arg(format!("--namespace={}", CLUSTER_NAMESPACE))
        .arg("--output=json");
    let invocation = &invocation;

    wait_with_timeout(
        ctx.config.control_plane_ready_timeout,
        ctx.config.poll_interval,
        "KubeadmControlPlane ready",
        move || async move {
            let json = match ctx.runner.output(invocation).await {
                Ok(json) => json,
                Err(e) => {
                    debug!(error = %e, "control plane not readable yet");
                    return Ok(None);
                }
            };
            match decode_as::<KubeadmControlPlane>(json.as_bytes()) {
                Ok(kcp) if kcp.is_ready() => Ok(Some(())),
                Ok(_) => Ok(None),
                Err(e) => {
                    debug!(error = %e, "control plane not decodable yet");
                    Ok(None)
                }
            }
        },
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment(name: &str, replicas: i32, available: Option<i32>) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": name},
            "spec": {"replicas": replicas, "selector": {}, "template": {}},
            "status": {"availableReplicas": available},
        })
    }

    #[test]
    fn all_providers_must_be_available() {
        let mut items: Vec<_> = PROVIDER_DEPLOYMENTS
            .iter()
            .map(|n| deployment(n, 1, Some(1)))
            .collect();
        let ready = serde_json::json!({ "items": items }).to_string();
        assert!(providers_available(&ready));

        items[3] = deployment("capv-controller-manager", 1, None);
        let pending = serde_json::json!({ "items": items }).to_string();
        assert!(!providers_available(&pending));
    }

    #[test]
    fn missing_provider_is_not_available() {
        let items: Vec<_> = PROVIDER_DEPLOYMENTS[..3]
            .iter()
            .map(|n| deployment(n, 1, Some(1)))
            .collect();
        let json = serde_json::json!({ "items": items }).to_string();
        assert!(!providers_available(&json));
        assert!(!providers_available("not json"));
    }

    #[test]
    fn ready_marker_skips_not_ready_nodes() {
        let nodes = "NAME     STATUS     ROLES    AGE   VERSION\n\
                     cp-0     Ready      master   5m    v1.17.3\n\
                     md-0     NotReady   <none>   1m    v1.17.3\n";
        assert_eq!(nodes.matches(NODE_READY).count(), 1);
    }
}
