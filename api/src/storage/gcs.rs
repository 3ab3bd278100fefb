use async_trait::async_trait;
use bytes::Bytes;
use google_cloud_storage::client::Storage;
use std::path::Path;

use super::{BlobStore, MediaKind, StorageError, object_path};

/// Writes admitted media to a public GCS bucket.
#[derive(Clone)]
pub struct GcsStore {
    client: Storage,
    bucket: String,
}

impl GcsStore {
    pub fn new(client: Storage, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl BlobStore for GcsStore {
    async fn store(
        &self,
        local_path: &Path,
        logical_name: &str,
        kind: MediaKind,
    ) -> Result<String, StorageError> {
        let data = tokio::fs::read(local_path).await?;
        let object = object_path(local_path, logical_name, kind, &data);
        let data = Bytes::from(data);
        let size = data.len();

        let bucket = format!("projects/_/buckets/{}", self.bucket);
        self.client
            .write_object(&bucket, &object, data)
            .send_buffered()
            .await
            .map_err(|e| StorageError::Backend(format!("GCS upload failed: {}", e)))?;

        log::info!("[storage] Uploaded {} bytes to gs://{}/{}", size, self.bucket, object);
        Ok(public_url(&self.bucket, &object))
    }
}

fn public_url(bucket: &str, object: &str) -> String {
    format!("https://storage.googleapis.com/{}/{}", bucket, object)
}
