//! CLI commands

pub mod capv;
pub mod genconfig;
pub mod picker;
pub mod vsphere;
