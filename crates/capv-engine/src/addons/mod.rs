//! Optional addons installed on the permanent cluster after the move.
//!
//! Enabled installers run concurrently. Every one of them is started exactly
//! once and awaited, even when another fails first, and each failure is
//! reported against the installer that produced it.

mod observability;
mod trident;

use std::sync::Arc;

use async_trait::async_trait;
use capv_common::ProvisioningSpec;
use futures::future::join_all;
#[cfg(test)]
use mockall::automock;
use tracing::{error, info};

use crate::pipeline::PhaseContext;
use crate::{Error, Result};

pub use observability::ObservabilityInstaller;
pub use trident::TridentInstaller;

/// One addon the pipeline can install
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AddonInstaller: Send + Sync {
    /// Stable name used in logs and failure reports
    fn name(&self) -> &'static str;

    /// Whether `spec` asks for this addon
    fn enabled(&self, spec: &ProvisioningSpec) -> bool;

    /// Install onto the permanent cluster
    async fn install(&self, ctx: &PhaseContext) -> Result<()>;
}

/// Trident/SolidFire and observability
pub fn default_installers() -> Vec<Arc<dyn AddonInstaller>> {
    vec![
        Arc::new(TridentInstaller),
        Arc::new(ObservabilityInstaller::default()),
    ]
}

/// Run every enabled installer concurrently and wait for all of them
pub async fn install_addons(installers: &[Arc<dyn AddonInstaller>], ctx: &PhaseContext) -> Result<()> {
    let enabled: Vec<_> = installers
        .iter()
        .filter(|installer| installer.enabled(&ctx.spec))
        .collect();
    if enabled.is_empty() {
        return Ok(());
    }

    ctx.events.progress(format!(
        "installing addons: {}",
        enabled.iter().map(|i| i.name()).collect::<Vec<_>>().join(", ")
    ));

    let results = join_all(enabled.iter().map(|installer| async move {
        let name = installer.name();
        info!(addon = name, "installing addon");
        (name, installer.install(ctx).await)
    }))
    .await;

    let mut failures = Vec::new();
    for (name, result) in results {
        match result {
            Ok(()) => {
                info!(addon = name, "addon installed");
                ctx.events.progress(format!("{} installed", name));
            }
            Err(e) => {
                error!(addon = name, error = %e, "addon failed");
                failures.push((name.to_string(), e));
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::AddonsFailed { failures })
    }
}
