//! VM folder provisioning.

use tracing::{debug, info};

use crate::api::VsphereApi;
use crate::manager::HypervisorResourceManager;
use crate::types::{InventoryKind, InventoryObject};
use crate::{Error, Result};

impl HypervisorResourceManager {
    /// Find or create every level of `path` (e.g. `capv/mgmt`) under the
    /// datacenter's VM folder. Returns one handle per level, outermost first.
    ///
    /// Existing levels are reused, so repeated calls create nothing new.
    pub async fn create_vm_folder(&self, path: &str) -> Result<Vec<InventoryObject>> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(capv_common::Error::validation_for_field("Folder", "folder path is empty").into());
        }

        let dc = self.placement().datacenter()?;
        let api = self.client().await?;
        let root_path = format!("{}/vm", dc.inventory_path);
        let mut parent: Option<InventoryObject> = None;
        let mut folders = Vec::with_capacity(segments.len());

        for segment in segments {
            let parent_path = parent
                .as_ref()
                .map(|p| p.inventory_path.clone())
                .unwrap_or_else(|| root_path.clone());
            let level_path = format!("{}/{}", parent_path, segment);

            let level = ensure_folder(api.as_ref(), parent.as_ref(), &parent_path, segment, &level_path);
            let folder = tokio::time::timeout(self.folder_timeout, level)
                .await
                .map_err(|_| capv_common::Error::PollTimeout {
                    description: format!("folder {}", level_path),
                    timeout: self.folder_timeout,
                })??;

            folders.push(folder.clone());
            parent = Some(folder);
        }

        Ok(folders)
    }

    /// Destroy a folder if it exists. `path` is relative to the datacenter's
    /// VM folder unless absolute.
    pub async fn delete_vm_folder(&self, path: &str) -> Result<()> {
        let full = if path.starts_with('/') {
            path.to_string()
        } else {
            let dc = self.placement().datacenter()?;
            format!("{}/vm/{}", dc.inventory_path, path.trim_matches('/'))
        };

        let api = self.client().await?;
        match api.find_folder(&full).await? {
            Some(folder) => {
                api.destroy_folder(&folder).await?;
                info!(folder = %full, "deleted folder");
            }
            None => debug!(folder = %full, "folder already absent"),
        }
        Ok(())
    }
}

async fn ensure_folder(
    api: &dyn VsphereApi,
    parent: Option<&InventoryObject>,
    parent_path: &str,
    name: &str,
    path: &str,
) -> Result<InventoryObject> {
    if let Some(found) = api.find_folder(path).await? {
        return Ok(with_path(found, path));
    }

    let parent = match parent {
        Some(p) => p.clone(),
        None => api
            .find_folder(parent_path)
            .await?
            .ok_or_else(|| Error::not_found(InventoryKind::Folder.as_str(), parent_path))?,
    };

    match api.create_folder(&parent, name).await {
        Ok(created) => {
            info!(folder = %path, "created folder");
            Ok(with_path(created, path))
        }
        // Lost a race with another creator
        Err(Error::Api { message, .. }) if message.contains("DuplicateName") || message.contains("already exists") => api
            .find_folder(path)
            .await?
            .map(|f| with_path(f, path))
            .ok_or_else(|| Error::not_found(InventoryKind::Folder.as_str(), path)),
        Err(e) => Err(e),
    }
}

fn with_path(mut folder: InventoryObject, path: &str) -> InventoryObject {
    if folder.inventory_path.is_empty() {
        folder.inventory_path = path.to_string();
    }
    if folder.name.is_empty() {
        folder.name = crate::types::basename(path).to_string();
    }
    folder
}
