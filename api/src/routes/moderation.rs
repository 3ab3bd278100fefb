//! Moderation endpoints (/check_image, /check_video, /predict_text)

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Multipart, State},
    http::StatusCode,
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;
use crate::moderation::Decision;
use crate::services::error::{LogErr, ModerationError};
use crate::staging::StagedFile;

const UPLOAD_FIELD: &str = "file";
const IMAGE_ACCEPTED: &str = "Image is valid and uploaded successfully.";
const VIDEO_ACCEPTED: &str = "Video is valid and uploaded successfully.";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/check_image", post(check_image))
        .route("/check_video", post(check_video))
        .route("/predict_text", post(predict_text))
}

#[derive(Debug, Serialize)]
struct ImageAccepted {
    message: &'static str,
    image_url: String,
}

#[derive(Debug, Serialize)]
struct VideoAccepted {
    message: &'static str,
    video_url: String,
}

#[derive(Debug, Deserialize)]
struct PredictTextRequest {
    text: String,
}

#[derive(Debug, Serialize)]
struct PredictTextResponse {
    text: String,
    prediction: u8,
    status: i8,
    reason: String,
}

/// Stage the first `file` field of a multipart upload.
async fn stage_upload(
    state: &AppState,
    multipart: &mut Multipart,
) -> Result<StagedFile, ModerationError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .log_bad_request("[upload] Multipart field error")?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let body = field
            .bytes()
            .await
            .log_bad_request("[upload] Failed to read file bytes")?;
        return Ok(state.moderation.staging().stage(&file_name, &body).await?);
    }
    Err(ModerationError::BadRequest("No file provided.".to_string()))
}

/// POST /check_image - Screen an image and store it if admitted
async fn check_image(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<ImageAccepted>, ModerationError> {
    let staged = stage_upload(&state, &mut multipart).await?;
    let image_url = state.moderation.moderate_and_store_image(staged).await?;
    Ok(Json(ImageAccepted {
        message: IMAGE_ACCEPTED,
        image_url,
    }))
}

/// POST /check_video - Screen a video and store it if admitted
async fn check_video(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<VideoAccepted>, ModerationError> {
    let staged = stage_upload(&state, &mut multipart).await?;
    let video_url = state.moderation.moderate_and_store_video(staged).await?;
    Ok(Json(VideoAccepted {
        message: VIDEO_ACCEPTED,
        video_url,
    }))
}

/// POST /predict_text - Classify a comment
///
/// Rejected comments still answer 200; the verdict is in the body.
async fn predict_text(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<PredictTextResponse>), ModerationError> {
    let PredictTextRequest { text } = serde_json::from_slice(&body)
        .log_bad_request("[predict_text] Valid text string is required")?;

    let decision = state.moderation.classify_text(text.clone()).await?;
    let status = match decision {
        Decision::Admitted | Decision::Rejected(_) => StatusCode::OK,
        Decision::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Decision::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    Ok((
        status,
        Json(PredictTextResponse {
            text,
            prediction: u8::from(matches!(decision, Decision::Rejected(_))),
            status: decision.status_code(),
            reason: decision.reason(),
        }),
    ))
}
