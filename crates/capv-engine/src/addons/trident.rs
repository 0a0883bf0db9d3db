//! NetApp Trident with an Element (SolidFire) backend

use async_trait::async_trait;
use capv_common::{CommandInvocation, ProvisioningSpec, TRIDENTCTL};

use super::AddonInstaller;
use crate::manifests::{self, SOLIDFIRE_BACKEND_FILE, SOLIDFIRE_STORAGE_CLASS_FILE};
use crate::pipeline::PhaseContext;
use crate::Result;

const TRIDENT_NAMESPACE: &str = "trident";

/// Installs Trident and the SolidFire backend
pub struct TridentInstaller;

#[async_trait]
impl AddonInstaller for TridentInstaller {
    fn name(&self) -> &'static str {
        "trident"
    }

    fn enabled(&self, spec: &ProvisioningSpec) -> bool {
        spec.addons.solidfire.enable
    }

    async fn install(&self, ctx: &PhaseContext) -> Result<()> {
        let kubeconfig = ctx.dir.permanent_kubeconfig();
        let namespace = format!("--namespace={}", TRIDENT_NAMESPACE);

        ctx.events.progress("installing trident");
        ctx.run(
            CommandInvocation::new(TRIDENTCTL)
                .arg("install")
                .arg(&namespace)
                .kubeconfig(&kubeconfig),
        )
        .await?;

        ctx.events.progress("creating the SolidFire backend");
        let backend = manifests::solidfire_backend(&ctx.spec.addons.solidfire, &ctx.spec.cluster_name)?;
        let backend_path = ctx.dir.write(SOLIDFIRE_BACKEND_FILE, backend).await?;
        ctx.run(
            CommandInvocation::new(TRIDENTCTL)
                .arg(&namespace)
                .args(["create", "backend"])
                .arg(format!("--filename={}", backend_path.display()))
                .kubeconfig(&kubeconfig),
        )
        .await?;

        ctx.events.progress("creating SolidFire storage classes");
        let classes = ctx
            .dir
            .write(SOLIDFIRE_STORAGE_CLASS_FILE, manifests::solidfire_storage_class())
            .await?;
        ctx.run(
            ctx.kubectl(&kubeconfig)
                .args(["--namespace=default", "--output=json", "apply"])
                .arg(format!("--filename={}", classes.display())),
        )
        .await
    }
}
