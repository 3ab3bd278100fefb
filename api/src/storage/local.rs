use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{BlobStore, MediaKind, StorageError, object_path};

/// Copies admitted media under a local directory.
///
/// Returned URLs point at the `/media/*` route of `media_server`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalStore {
    pub fn new(root: PathBuf, public_base_url: String) -> Self {
        Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for LocalStore {
    async fn store(
        &self,
        local_path: &Path,
        logical_name: &str,
        kind: MediaKind,
    ) -> Result<String, StorageError> {
        let data = tokio::fs::read(local_path).await?;
        let relative = object_path(local_path, logical_name, kind, &data);
        let full_path = self.root.join(&relative);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, &data).await?;

        log::info!(
            "[storage] Stored {} bytes at {}",
            data.len(),
            full_path.display()
        );
        Ok(format!("{}/media/{}", self.public_base_url, relative))
    }
}
