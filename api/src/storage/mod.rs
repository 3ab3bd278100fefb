//! Durable storage for admitted media.
//!
//! The pipeline only calls a [`BlobStore`] after the gate admits a
//! submission. Three backends are available, chosen by `STORAGE_BACKEND`:
//! - **Cloudinary**: signed uploads, chunked for large videos
//! - **GCS**: buffered object writes, public object URL
//! - **Local disk**: copies under `LOCAL_STORAGE_PATH`, served by `media_server`

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{Settings, StorageBackend};

mod cloudinary;
mod gcs;
mod local;

pub use cloudinary::CloudinaryStore;
pub use gcs::GcsStore;
pub use local::LocalStore;

/// Kind of media being stored; backends route images and videos differently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("reading staged file: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage rejected upload with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("storage returned no retrievable URL")]
    MissingUrl,
    #[error("{0}")]
    Backend(String),
}

/// Persists a local file and returns a URL it can be fetched from.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn store(
        &self,
        local_path: &Path,
        logical_name: &str,
        kind: MediaKind,
    ) -> Result<String, StorageError>;
}

/// Build the backend selected in `settings`.
pub async fn connect(settings: &Settings) -> anyhow::Result<Arc<dyn BlobStore>> {
    let store: Arc<dyn BlobStore> = match settings.storage_backend {
        StorageBackend::Local => {
            log::info!(
                "[storage] Local storage: {:?}",
                settings.local_storage_path
            );
            Arc::new(LocalStore::new(
                settings.local_storage_path.clone(),
                settings.public_base_url.clone(),
            ))
        }
        StorageBackend::Gcs => {
            let client = google_cloud_storage::client::Storage::builder()
                .build()
                .await
                .map_err(|e| anyhow::anyhow!("failed to create GCS client: {}", e))?;
            log::info!("[storage] GCS bucket: {}", settings.gcs_bucket);
            Arc::new(GcsStore::new(client, settings.gcs_bucket.clone()))
        }
        StorageBackend::Cloudinary => {
            let creds = settings.cloudinary.clone().ok_or_else(|| {
                anyhow::anyhow!(
                    "STORAGE_BACKEND=cloudinary requires CLOUDINARY_CLOUD_NAME, CLOUDINARY_API_KEY and CLOUDINARY_API_SECRET"
                )
            })?;
            log::info!("[storage] Cloudinary cloud: {}", creds.cloud_name);
            Arc::new(CloudinaryStore::new(creds))
        }
    };
    Ok(store)
}

/// Object key for a stored file, e.g. `video/clip_video_3fa2b1c4d5e6f708.mp4`.
///
/// The key carries a digest of the content, so two uploads under the same
/// name never share a key and a stored object never changes.
pub fn object_path(local_path: &Path, logical_name: &str, kind: MediaKind, data: &[u8]) -> String {
    let ext = local_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| "bin".to_string());
    format!(
        "{}/{}_{}.{}",
        kind.as_str(),
        logical_name,
        content_digest(data),
        ext
    )
}

/// First 16 hex digits of the SHA-256 of `data`
fn content_digest(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Logical name for an upload: file stem plus `_image` / `_video`.
pub fn logical_name(original_name: &str, kind: MediaKind) -> String {
    let stem = Path::new(original_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "upload".to_string());
    format!("{}_{}", stem, kind.as_str())
}

/// Content type from a file extension
pub fn content_type_for(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".mp4") {
        "video/mp4"
    } else if lower.ends_with(".webm") {
        "video/webm"
    } else if lower.ends_with(".mov") {
        "video/quicktime"
    } else if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_name() {
        assert_eq!(logical_name("cat.png", MediaKind::Image), "cat_image");
        assert_eq!(logical_name("holiday.clip.mp4", MediaKind::Video), "holiday.clip_video");
        assert_eq!(logical_name("", MediaKind::Video), "upload_video");
    }

    #[test]
    fn test_object_path() {
        let key = object_path(Path::new("/tmp/abc_cat.PNG"), "cat_image", MediaKind::Image, b"a");
        assert!(key.starts_with("image/cat_image_"));
        assert!(key.ends_with(".png"));
        assert_eq!(key.len(), "image/cat_image_".len() + 16 + ".png".len());

        let key = object_path(Path::new("/tmp/noext"), "x_video", MediaKind::Video, b"a");
        assert!(key.starts_with("video/x_video_") && key.ends_with(".bin"));
    }

    #[test]
    fn test_object_path_differs_by_content() {
        let path = Path::new("/tmp/abc_cat.png");
        let first = object_path(path, "cat_image", MediaKind::Image, b"first cat");
        let second = object_path(path, "cat_image", MediaKind::Image, b"second cat");
        assert_ne!(first, second);
        assert_eq!(
            first,
            object_path(path, "cat_image", MediaKind::Image, b"first cat")
        );
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("video/a.mp4"), "video/mp4");
        assert_eq!(content_type_for("image/a.JPG"), "image/jpeg");
        assert_eq!(content_type_for("a.txt"), "application/octet-stream");
    }
}
