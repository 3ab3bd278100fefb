//! Runtime configuration read from environment variables.
//!
//! Every setting has a development default so the service starts with a
//! bare environment, storing admitted media on local disk.

use std::env;
use std::path::PathBuf;

use crate::constants::STAGING_DIR_NAME;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MEDIA_ROOT: &str = "media";
const DEFAULT_MODELS_DIR: &str = "models_data";
const DEFAULT_LOCAL_STORAGE_PATH: &str = "media/uploads";
const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:3001";
const DEFAULT_GCS_BUCKET: &str = "moderated_media";

/// Where admitted media is persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    Gcs,
    Cloudinary,
}

impl StorageBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "gcs" => Some(Self::Gcs),
            "cloudinary" => Some(Self::Cloudinary),
            _ => None,
        }
    }
}

/// Cloudinary account credentials
#[derive(Debug, Clone)]
pub struct CloudinaryCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub media_root: PathBuf,
    pub models_dir: PathBuf,
    /// Hugging Face repo to fetch missing model files from
    pub model_repo: Option<String>,
    pub storage_backend: StorageBackend,
    pub local_storage_path: PathBuf,
    pub public_base_url: String,
    pub gcs_bucket: String,
    pub cloudinary: Option<CloudinaryCredentials>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let storage_backend = match non_empty("STORAGE_BACKEND") {
            Some(value) => StorageBackend::parse(&value).unwrap_or_else(|| {
                log::warn!(
                    "[config] Unknown STORAGE_BACKEND {:?}, falling back to local",
                    value
                );
                StorageBackend::Local
            }),
            None => StorageBackend::Local,
        };

        let cloudinary = match (
            non_empty("CLOUDINARY_CLOUD_NAME"),
            non_empty("CLOUDINARY_API_KEY"),
            non_empty("CLOUDINARY_API_SECRET"),
        ) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => Some(CloudinaryCredentials {
                cloud_name,
                api_key,
                api_secret,
            }),
            _ => None,
        };

        Self {
            port: non_empty("PORT")
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_PORT),
            media_root: non_empty("MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MEDIA_ROOT)),
            models_dir: non_empty("MODELS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODELS_DIR)),
            model_repo: non_empty("MODEL_REPO"),
            storage_backend,
            local_storage_path: non_empty("LOCAL_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_STORAGE_PATH)),
            public_base_url: non_empty("PUBLIC_BASE_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_PUBLIC_BASE_URL.to_string()),
            gcs_bucket: non_empty("GCS_BUCKET_NAME").unwrap_or_else(|| DEFAULT_GCS_BUCKET.to_string()),
            cloudinary,
        }
    }

    /// Directory that staged uploads are written to
    pub fn staging_dir(&self) -> PathBuf {
        self.media_root.join(STAGING_DIR_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]);
        assert_eq!(s.port, 3000);
        assert_eq!(s.storage_backend, StorageBackend::Local);
        assert_eq!(s.staging_dir(), PathBuf::from("media/temp_files"));
        assert!(s.cloudinary.is_none());
        assert!(s.model_repo.is_none());
    }

    #[test]
    fn test_cloudinary_requires_all_credentials() {
        let partial = settings(&[
            ("STORAGE_BACKEND", "cloudinary"),
            ("CLOUDINARY_CLOUD_NAME", "demo"),
            ("CLOUDINARY_API_KEY", "key"),
        ]);
        assert_eq!(partial.storage_backend, StorageBackend::Cloudinary);
        assert!(partial.cloudinary.is_none());

        let full = settings(&[
            ("CLOUDINARY_CLOUD_NAME", "demo"),
            ("CLOUDINARY_API_KEY", "key"),
            ("CLOUDINARY_API_SECRET", "secret"),
        ]);
        let creds = full.cloudinary.unwrap();
        assert_eq!(creds.cloud_name, "demo");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let s = settings(&[
            ("PORT", "not-a-port"),
            ("STORAGE_BACKEND", "ftp"),
            ("PUBLIC_BASE_URL", "https://cdn.example.com/"),
        ]);
        assert_eq!(s.port, 3000);
        assert_eq!(s.storage_backend, StorageBackend::Local);
        assert_eq!(s.public_base_url, "https://cdn.example.com");
    }
}
