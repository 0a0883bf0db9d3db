use capv_common::kube_get::{decode_as, secret_value};
use capv_common::workdir::PERMANENT_KUBECONFIG;
use k8s_openapi::api::core::v1::Secret;
use tracing::info;

use super::{CLUSTER_NAMESPACE, MACHINE_RUNNING, NODE_READY};
use crate::pipeline::PhaseContext;
use crate::Result;

/// Have CAPV build the permanent cluster, fetch its kubeconfig, and bring
/// its nodes to Ready
pub(crate) async fn run(ctx: &PhaseContext) -> Result<()> {
    let bootstrap = ctx.dir.bootstrap_kubeconfig();
    let manifest = ctx.cluster_manifest();
    let total = ctx.spec.total_machines();

    ctx.events.progress("creating permanent management cluster");
    ctx.apply(&bootstrap, &manifest.display().to_string()).await?;
    ctx.wait_for(
        ctx.kubectl(&bootstrap).args(["get", "machine"]),
        ctx.config.machines_timeout,
        MACHINE_RUNNING,
        total,
    )
    .await?;

    ctx.events.progress("retrieving permanent cluster kubeconfig");
    let json = ctx
        .output(ctx.kubectl(&bootstrap).args([
            format!("--namespace={}", CLUSTER_NAMESPACE),
            "--output=json".to_string(),
            "get".to_string(),
            "secret".to_string(),
            format!("{}-kubeconfig", ctx.spec.cluster_name),
        ]))
        .await?;
    let secret: Secret = decode_as(json.as_bytes())?;
    let kubeconfig = secret_value(&secret, "value")?;
    let permanent = ctx.dir.write(PERMANENT_KUBECONFIG, kubeconfig).await?;
    info!(cluster = %ctx.spec.cluster_name, kubeconfig = %permanent.display(), "permanent kubeconfig written");

    ctx.events.progress("applying the pod network to the permanent cluster");
    ctx.apply(&permanent, &ctx.config.cni_manifest).await?;
    ctx.wait_for(
        ctx.kubectl(&permanent).args(["get", "nodes"]),
        ctx.config.nodes_timeout,
        NODE_READY,
        total,
    )
    .await
}
