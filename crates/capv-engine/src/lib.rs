//! Provisioning engine for CAPV management clusters
//!
//! [`ProvisioningPipeline`] stands up a kind bootstrap cluster, installs
//! Cluster API with the vSphere provider, lets it build the permanent
//! cluster, moves the management objects across, and finishes with the
//! enabled addons. Progress flows out through the event bus; [`status`]
//! serves it over HTTP.

#![deny(missing_docs)]

pub mod addons;
pub mod config;
pub mod error;
pub mod manifests;
mod phases;
pub mod pipeline;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use addons::{install_addons, AddonInstaller, ObservabilityInstaller, TridentInstaller};
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use pipeline::{Phase, PhaseContext, PipelineState, ProvisioningPipeline};
pub use status::{serve, status_routes, Progress, StatusBoard, DEFAULT_STATUS_ADDR};
