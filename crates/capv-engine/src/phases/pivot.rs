use std::path::Path;

use capv_common::command::check_output;
use capv_common::config::DEFAULT_NAMESPACE;
use capv_common::{CommandInvocation, CLUSTERCTL};
use tracing::{debug, info};

use super::{wait_for_control_plane, wait_for_providers};
use crate::pipeline::PhaseContext;
use crate::Result;

/// Make the permanent cluster manage itself: install the providers there and
/// `clusterctl move` every Cluster API object across
pub(crate) async fn run(ctx: &PhaseContext) -> Result<()> {
    let bootstrap = ctx.dir.bootstrap_kubeconfig();
    let permanent = ctx.dir.permanent_kubeconfig();

    ctx.events
        .progress("applying vSphere credentials to the permanent cluster");
    ctx.apply(&permanent, &ctx.dir.creds_secret().display().to_string())
        .await?;
    create_namespace(ctx, &permanent).await?;

    ctx.events.progress("init capi in the permanent cluster");
    ctx.run(ctx.clusterctl(&permanent).args(["init", "--infrastructure=vsphere"]))
        .await?;

    wait_for_control_plane(ctx, &bootstrap).await?;
    wait_for_providers(ctx, &permanent).await?;

    ctx.events
        .progress("moving Cluster API objects to the permanent cluster");
    ctx.run(
        CommandInvocation::new(CLUSTERCTL)
            .arg("move")
            .arg(format!("--to-kubeconfig={}", permanent.display()))
            .kubeconfig(&bootstrap),
    )
    .await?;
    info!(cluster = %ctx.spec.cluster_name, "cluster objects moved");
    Ok(())
}

/// `kubectl create ns`; `default` always exists, so AlreadyExists is fine there
async fn create_namespace(ctx: &PhaseContext, kubeconfig: &Path) -> Result<()> {
    let namespace = &ctx.spec.namespace;
    let invocation = ctx
        .kubectl(kubeconfig)
        .args(["create", "ns", namespace.as_str()]);
    let output = ctx.runner.execute(&invocation).await?;

    match check_output(&invocation, &output) {
        Ok(()) => Ok(()),
        Err(_) if namespace == DEFAULT_NAMESPACE && output.stderr_str().contains("AlreadyExists") => {
            debug!(namespace = %namespace, "namespace already exists");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
