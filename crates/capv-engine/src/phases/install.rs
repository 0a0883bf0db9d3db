use capv_common::workdir::VSPHERE_CREDS_FILE;
use capv_common::{CommandInvocation, KUBECTL};
use tracing::info;

use super::wait_for_providers;
use crate::manifests;
use crate::pipeline::PhaseContext;
use crate::Result;

/// Install CAPI and CAPV into the bootstrap cluster and generate the
/// permanent cluster's manifest
pub(crate) async fn run(ctx: &PhaseContext) -> Result<()> {
    let kubeconfig = ctx.dir.bootstrap_kubeconfig();
    let spec = &ctx.spec;

    ctx.events.progress("writing vSphere credentials secret");
    let creds = manifests::vsphere_creds(&spec.vsphere.vsphere_username, &spec.vsphere.vsphere_password)?;
    let creds_path = ctx.dir.write(VSPHERE_CREDS_FILE, creds).await?;
    ctx.apply(&kubeconfig, &creds_path.display().to_string()).await?;

    ctx.events.progress("init capi in the bootstrap cluster");
    ctx.run(ctx.clusterctl(&kubeconfig).args(["init", "--infrastructure=vsphere"]))
        .await?;
    wait_for_providers(ctx, &kubeconfig).await?;

    ctx.events.progress("writing CAPv spec file out");
    let manifest = ctx
        .output(ctx.clusterctl(&kubeconfig).args([
            "config".to_string(),
            "cluster".to_string(),
            spec.cluster_name.clone(),
            "--infrastructure=vsphere".to_string(),
            format!("--kubernetes-version={}", spec.kubernetes_version),
            format!("--control-plane-machine-count={}", spec.control_plane_machine_count),
            format!("--worker-machine-count={}", spec.worker_machine_count),
        ]))
        .await?;
    let capi_file = format!("{}-capi-config.yaml", spec.cluster_name);
    let path = ctx.dir.write(&capi_file, manifest).await?;
    info!(cluster = %spec.cluster_name, manifest = %path.display(), "cluster manifest generated");

    if ctx.uses_storage_network() {
        add_storage_network(ctx, &capi_file).await?;
    }
    Ok(())
}

/// Kustomize the storage NIC and iSCSI setup into `<name>-final.yaml`
async fn add_storage_network(ctx: &PhaseContext, capi_file: &str) -> Result<()> {
    let spec = &ctx.spec;
    ctx.events
        .progress("adding the storage network and iSCSI prerequisites to the cluster manifest");

    let files = manifests::storage_network_kustomization(
        &spec.cluster_name,
        capi_file,
        &spec.vsphere.storage_network,
    )?;
    for file in files {
        ctx.dir.write(file.name, file.contents).await?;
    }

    let rendered = ctx
        .output(
            CommandInvocation::new(KUBECTL)
                .arg("kustomize")
                .arg(ctx.dir.root().display().to_string()),
        )
        .await?;
    let path = ctx
        .dir
        .write(&format!("{}-final.yaml", spec.cluster_name), rendered)
        .await?;
    info!(cluster = %spec.cluster_name, manifest = %path.display(), "storage network added");
    Ok(())
}
