//! Genconfig command - write a skeleton config file

use std::path::Path;

use clap::Args;
use tracing::info;

use capv_common::ProvisioningSpec;

use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct GenconfigArgs {
    /// Replace an existing file
    #[arg(long)]
    pub force: bool,
}

pub async fn run(args: GenconfigArgs, path: &Path) -> Result<()> {
    write_skeleton(path, args.force).await?;
    info!(config = %path.display(), "wrote skeleton config");
    println!("Edit {} and run `capv-bootstrap capv`", path.display());
    Ok(())
}

/// Default spec as YAML, refusing to clobber an existing file unless `force`
pub async fn write_skeleton(path: &Path, force: bool) -> Result<()> {
    if !force && tokio::fs::try_exists(path).await? {
        return Err(Error::config(path, "already exists; pass --force to replace it"));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let contents = ProvisioningSpec::default().to_yaml()?;
    tokio::fs::write(path, contents).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skeleton_round_trips_and_is_not_clobbered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/capv.yaml");

        write_skeleton(&path, false).await.unwrap();
        let spec = ProvisioningSpec::from_file(&path).unwrap();
        assert_eq!(spec, ProvisioningSpec::default());

        std::fs::write(&path, "ClusterName: mine\n").unwrap();
        assert!(write_skeleton(&path, false).await.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "ClusterName: mine\n");

        write_skeleton(&path, true).await.unwrap();
        assert_eq!(ProvisioningSpec::from_file(&path).unwrap(), ProvisioningSpec::default());
    }
}
