//! capv-bootstrap CLI library

pub mod commands;
pub mod config;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::{default_config_path, Overrides};

/// capv-bootstrap - Cluster API management clusters on vSphere
#[derive(Parser, Debug)]
#[command(name = "capv-bootstrap")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.capv-bootstrap.yaml)
    #[arg(long, global = true, env = "CAPV_BOOTSTRAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Control plane machine count, overriding the config file
    #[arg(short = 'c', long, global = true)]
    pub controllers: Option<u32>,

    /// Worker machine count, overriding the config file
    #[arg(short = 'w', long, global = true)]
    pub workers: Option<u32>,

    /// Log filter, e.g. `debug` or `capv_engine=debug` (default: RUST_LOG or info)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision a CAPV management cluster and serve its status
    Capv(commands::capv::CapvArgs),
    /// Write a skeleton config file
    Genconfig(commands::genconfig::GenconfigArgs),
    /// Inspect and prepare the vSphere environment
    Vsphere(commands::vsphere::VsphereArgs),
}

impl Cli {
    /// Config file path: `--config`, `$CAPV_BOOTSTRAP_CONFIG`, or the default
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => default_config_path(),
        }
    }

    pub fn overrides(&self) -> Overrides {
        Overrides {
            controllers: self.controllers,
            workers: self.workers,
        }
    }

    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let path = self.config_path()?;
        let overrides = self.overrides();
        match self.command {
            Commands::Capv(args) => commands::capv::run(args, &path, overrides).await,
            Commands::Genconfig(args) => commands::genconfig::run(args, &path).await,
            Commands::Vsphere(args) => commands::vsphere::run(args, &path, overrides).await,
        }
    }
}
