//! Observability stack shipped as a `.tgz` of manifests

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use capv_common::ProvisioningSpec;
use flate2::read::GzDecoder;
use tracing::{debug, info};

use super::AddonInstaller;
use crate::pipeline::PhaseContext;
use crate::{Error, Result};

/// Where the archive is unpacked inside the cluster directory
pub const OBSERVABILITY_DIR: &str = "observability";
/// Downloaded archives are saved under this name
pub const ARCHIVE_FILE: &str = "observability.tgz";

/// Unpacks the observability archive and applies its manifests
#[derive(Default)]
pub struct ObservabilityInstaller {
    client: reqwest::Client,
}

#[async_trait]
impl AddonInstaller for ObservabilityInstaller {
    fn name(&self) -> &'static str {
        "observability"
    }

    fn enabled(&self, spec: &ProvisioningSpec) -> bool {
        spec.addons.observability.enable
    }

    async fn install(&self, ctx: &PhaseContext) -> Result<()> {
        let location = ctx.spec.addons.observability.archive_location.as_str();
        if location.is_empty() {
            return Err(capv_common::Error::validation_for_field(
                "Observability.ArchiveLocation",
                "required when observability is enabled",
            )
            .into());
        }

        ctx.events
            .progress(format!("fetching observability archive {}", location));
        let archive = self.fetch(ctx, location).await?;

        let target = ctx.dir.path(OBSERVABILITY_DIR);
        ctx.events.progress("unpacking observability archive");
        unpack(&archive, &target).await?;
        info!(archive = %archive.display(), target = %target.display(), "observability archive unpacked");

        ctx.events.progress("applying observability manifests");
        ctx.run(
            ctx.kubectl(&ctx.dir.permanent_kubeconfig())
                .args(["apply", "--recursive"])
                .arg(format!("--filename={}", target.display())),
        )
        .await
    }
}

impl ObservabilityInstaller {
    /// Local path as-is; http(s) URLs are downloaded into the cluster directory
    async fn fetch(&self, ctx: &PhaseContext, location: &str) -> Result<PathBuf> {
        if !is_remote(location) {
            return Ok(PathBuf::from(location));
        }

        debug!(url = location, "downloading archive");
        let bytes = self
            .client
            .get(location)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(ctx.dir.write(ARCHIVE_FILE, &bytes).await?)
    }
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Unpack a gzipped tarball into `target`, replacing what was there
async fn unpack(archive: &Path, target: &Path) -> Result<()> {
    let location = archive.display().to_string();
    let archive = archive.to_path_buf();
    let target = target.to_path_buf();

    let unpacked = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        if target.exists() {
            std::fs::remove_dir_all(&target)?;
        }
        std::fs::create_dir_all(&target)?;
        let file = std::fs::File::open(&archive)?;
        let mut tarball = tar::Archive::new(GzDecoder::new(file));
        tarball.set_preserve_permissions(false);
        tarball.unpack(&target)
    })
    .await
    .map_err(|e| Error::archive(&location, e.to_string()))?;

    unpacked.map_err(|e| Error::archive(location, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, FakeCluster};
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn write_archive(path: &Path) {
        let file = std::fs::File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        let manifest = b"apiVersion: v1\nkind: Namespace\nmetadata:\n  name: monitoring\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(manifest.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "stack/namespace.yaml", &manifest[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[tokio::test]
    async fn unpacks_local_archive_and_applies_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("stack.tgz");
        write_archive(&archive);

        let cluster = FakeCluster::new();
        let (mut ctx, _rx) = context(&dir.path().join("clusters"), cluster.clone(), Default::default());
        let mut spec = (*ctx.spec).clone();
        spec.addons.observability.enable = true;
        spec.addons.observability.archive_location = archive.display().to_string();
        ctx.spec = spec.into();

        ObservabilityInstaller::default().install(&ctx).await.unwrap();

        let target = ctx.dir.path(OBSERVABILITY_DIR);
        assert!(target.join("stack/namespace.yaml").exists());
        let lines = cluster.command_lines();
        assert_eq!(
            lines,
            vec![format!("kubectl apply --recursive --filename={}", target.display())]
        );
    }

    #[tokio::test]
    async fn corrupt_archive_names_its_location() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.tgz");
        std::fs::write(&archive, b"not a tarball").unwrap();

        let err = unpack(&archive, &dir.path().join("out")).await.unwrap_err();

        assert!(matches!(err, Error::Archive { .. }));
        assert!(err.to_string().contains("broken.tgz"));
    }

    #[tokio::test]
    async fn missing_location_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new();
        let (mut ctx, _rx) = context(dir.path(), cluster.clone(), Default::default());
        let mut spec = (*ctx.spec).clone();
        spec.addons.observability.enable = true;
        ctx.spec = spec.into();

        assert!(ObservabilityInstaller::default().install(&ctx).await.is_err());
        assert!(cluster.command_lines().is_empty());
    }

    #[test]
    fn only_http_locations_are_downloaded() {
        assert!(is_remote("https://example.com/stack.tgz"));
        assert!(is_remote("http://10.0.0.1/stack.tgz"));
        assert!(!is_remote("/opt/stack.tgz"));
        assert!(!is_remote("stack.tgz"));
    }
}
