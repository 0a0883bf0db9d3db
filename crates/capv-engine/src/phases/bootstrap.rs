use std::time::Duration;

use capv_common::workdir::BOOTSTRAP_KUBECONFIG;
use capv_common::{CommandInvocation, KIND};
use tracing::info;

use super::NODE_READY;
use crate::pipeline::PhaseContext;
use crate::Result;

/// Pulling the node image dominates on a cold host
const KIND_CREATE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Create the local kind cluster and wait for its node
pub(crate) async fn run(ctx: &PhaseContext) -> Result<()> {
    let name = ctx.bootstrap_cluster_name();

    ctx.events.progress("kind create cluster (bootstrap cluster)");
    ctx.run(
        CommandInvocation::new(KIND)
            .args(["create", "cluster", "--name", name.as_str()])
            .timeout(KIND_CREATE_TIMEOUT),
    )
    .await?;

    ctx.events
        .progress("getting and writing bootstrap cluster kubeconfig to disk");
    let kubeconfig = ctx
        .output(CommandInvocation::new(KIND).args(["get", "kubeconfig", "--name", name.as_str()]))
        .await?;
    let path = ctx.dir.write(BOOTSTRAP_KUBECONFIG, kubeconfig).await?;
    info!(cluster = %name, kubeconfig = %path.display(), "bootstrap cluster created");

    ctx.wait_for(
        ctx.kubectl(&path).args(["get", "nodes"]),
        ctx.config.bootstrap_ready_timeout,
        NODE_READY,
        1,
    )
    .await
}
