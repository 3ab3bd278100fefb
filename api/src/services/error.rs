//! Error taxonomy for moderation requests and its HTTP mapping

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::classifier::ModelKind;
use crate::moderation::Decision;
use crate::storage::StorageError;

/// Why a submission did not end in stored media
#[derive(Debug, Error)]
pub enum ModerationError {
    /// A model needed for this submission is not loaded
    #[error("moderation system not ready ({0})")]
    NotReady(ModelKind),
    /// The content itself was rejected
    #[error("{0}")]
    PolicyViolation(String),
    /// Unreadable input or an internal failure during classification
    #[error("{0}")]
    Processing(String),
    /// Content passed moderation but could not be persisted
    #[error("upload failed: {0}")]
    UploadFailed(#[from] StorageError),
    #[error("could not stage upload: {0}")]
    Staging(#[from] std::io::Error),
    #[error("{0}")]
    BadRequest(String),
}

impl ModerationError {
    pub fn status(&self) -> StatusCode {
        match self {
            ModerationError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            ModerationError::PolicyViolation(_) => StatusCode::BAD_REQUEST,
            ModerationError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ModerationError::UploadFailed(_) => StatusCode::BAD_GATEWAY,
            ModerationError::Staging(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ModerationError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl Decision {
    /// `Ok` only for admitted submissions.
    pub fn into_result(self) -> Result<(), ModerationError> {
        match self {
            Decision::Admitted => Ok(()),
            Decision::Rejected(verdict) => Err(ModerationError::PolicyViolation(verdict.reason)),
            Decision::Unavailable(model) => Err(ModerationError::NotReady(model)),
            Decision::Failed(cause) => Err(ModerationError::Processing(cause)),
        }
    }
}

impl IntoResponse for ModerationError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("[api] {}: {}", status, self);
        } else {
            log::warn!("[api] {}: {}", status, self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Extension trait for logging errors and converting to `ModerationError`
pub trait LogErr<T> {
    /// Log error with context and report it as a processing failure
    fn log_processing(self, context: &str) -> Result<T, ModerationError>;

    /// Log error with context and report it as a client error
    fn log_bad_request(self, context: &str) -> Result<T, ModerationError>;
}

impl<T, E: std::fmt::Display> LogErr<T> for Result<T, E> {
    fn log_processing(self, context: &str) -> Result<T, ModerationError> {
        self.map_err(|e| {
            log::error!("{}: {}", context, e);
            ModerationError::Processing(format!("{}: {}", context, e))
        })
    }

    fn log_bad_request(self, context: &str) -> Result<T, ModerationError> {
        self.map_err(|e| {
            log::warn!("{}: {}", context, e);
            ModerationError::BadRequest(format!("{}: {}", context, e))
        })
    }
}
