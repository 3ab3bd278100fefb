//! Cloudinary upload API client.
//!
//! Uploads are signed with SHA-256 over the sorted request parameters.
//! Videos larger than [`CLOUDINARY_CHUNK_SIZE`] go up in chunks sharing one
//! `X-Unique-Upload-Id`; the response to the last chunk carries the URL.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;

use super::{BlobStore, MediaKind, StorageError};
use crate::config::CloudinaryCredentials;
use crate::constants::CLOUDINARY_CHUNK_SIZE;

const API_BASE: &str = "https://api.cloudinary.com/v1_1";
const DELIVERY_BASE: &str = "https://res.cloudinary.com";

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    url: Option<String>,
    public_id: Option<String>,
}

impl UploadResponse {
    fn into_url(self) -> Option<String> {
        self.secure_url.or(self.url).filter(|u| !u.is_empty())
    }
}

#[derive(Clone)]
pub struct CloudinaryStore {
    http: reqwest::Client,
    creds: CloudinaryCredentials,
    chunk_size: usize,
}

impl CloudinaryStore {
    pub fn new(creds: CloudinaryCredentials) -> Self {
        Self {
            http: reqwest::Client::new(),
            creds,
            chunk_size: CLOUDINARY_CHUNK_SIZE,
        }
    }

    fn endpoint(&self, kind: MediaKind) -> String {
        format!("{}/{}/{}/upload", API_BASE, self.creds.cloud_name, kind.as_str())
    }

    /// Delivery URL with automatic format and quality for a stored asset.
    pub fn optimized_url(&self, public_id: &str, kind: MediaKind) -> String {
        format!(
            "{}/{}/{}/upload/f_auto,q_auto/{}",
            DELIVERY_BASE,
            self.creds.cloud_name,
            kind.as_str(),
            public_id
        )
    }

    /// Signed form fields shared by every request of one upload.
    fn signed_fields(&self, public_id: &str, timestamp: i64) -> Vec<(&'static str, String)> {
        let params = [
            ("public_id", public_id.to_string()),
            ("timestamp", timestamp.to_string()),
        ];
        let signature = sign(&params, &self.creds.api_secret);

        let mut fields: Vec<(&'static str, String)> = params.to_vec();
        fields.push(("api_key", self.creds.api_key.clone()));
        fields.push(("signature", signature));
        fields.push(("signature_algorithm", "sha256".to_string()));
        fields
    }

    fn form(fields: &[(&'static str, String)], chunk: Vec<u8>, file_name: &str) -> Form {
        let form = fields
            .iter()
            .fold(Form::new(), |form, (key, value)| form.text(*key, value.clone()));
        form.part("file", Part::bytes(chunk).file_name(file_name.to_string()))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<UploadResponse, StorageError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<UploadResponse>().await?)
    }

    async fn upload_whole(
        &self,
        data: Vec<u8>,
        file_name: &str,
        fields: &[(&'static str, String)],
        kind: MediaKind,
    ) -> Result<UploadResponse, StorageError> {
        let request = self
            .http
            .post(self.endpoint(kind))
            .multipart(Self::form(fields, data, file_name));
        self.send(request).await
    }

    async fn upload_chunked(
        &self,
        data: Vec<u8>,
        file_name: &str,
        fields: &[(&'static str, String)],
        kind: MediaKind,
    ) -> Result<UploadResponse, StorageError> {
        let upload_id = format!("{:016x}", rand::random::<u64>());
        let total = data.len();
        let mut last = None;

        for (start, end) in chunk_ranges(total, self.chunk_size) {
            log::info!(
                "[storage] Cloudinary chunk bytes {}-{}/{} ({})",
                start,
                end - 1,
                total,
                upload_id
            );
            let request = self
                .http
                .post(self.endpoint(kind))
                .header("X-Unique-Upload-Id", upload_id.as_str())
                .header("Content-Range", content_range(start, end, total))
                .multipart(Self::form(fields, data[start..end].to_vec(), file_name));
            last = Some(self.send(request).await?);
        }

        last.ok_or(StorageError::MissingUrl)
    }
}

#[async_trait]
impl BlobStore for CloudinaryStore {
    async fn store(
        &self,
        local_path: &Path,
        logical_name: &str,
        kind: MediaKind,
    ) -> Result<String, StorageError> {
        let data = tokio::fs::read(local_path).await?;
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| logical_name.to_string());
        let fields = self.signed_fields(logical_name, chrono::Utc::now().timestamp());

        let response = if kind == MediaKind::Video && data.len() > self.chunk_size {
            self.upload_chunked(data, &file_name, &fields, kind).await?
        } else {
            self.upload_whole(data, &file_name, &fields, kind).await?
        };

        let url = self.delivery_url(response, logical_name, kind)?;
        log::info!("[storage] Uploaded {} to Cloudinary: {}", logical_name, url);
        Ok(url)
    }
}

impl CloudinaryStore {
    /// Optimized delivery URL for a finished upload.
    ///
    /// A response without any URL means the asset was not stored.
    fn delivery_url(
        &self,
        response: UploadResponse,
        logical_name: &str,
        kind: MediaKind,
    ) -> Result<String, StorageError> {
        let public_id = response
            .public_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| logical_name.to_string());
        response.into_url().ok_or(StorageError::MissingUrl)?;
        Ok(self.optimized_url(&public_id, kind))
    }
}

/// Hex SHA-256 of `k=v&k=v` (sorted by key) followed by the API secret.
fn sign(params: &[(&str, String)], api_secret: &str) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().filter(|(_, v)| !v.is_empty()).collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(api_secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Half-open byte ranges covering `total` in `chunk_size` steps.
fn chunk_ranges(total: usize, chunk_size: usize) -> Vec<(usize, usize)> {
    let chunk_size = chunk_size.max(1);
    (0..total)
        .step_by(chunk_size)
        .map(|start| (start, (start + chunk_size).min(total)))
        .collect()
}

fn content_range(start: usize, end: usize, total: usize) -> String {
    format!("bytes {}-{}/{}", start, end - 1, total)
}
