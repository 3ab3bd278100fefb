//! Content moderation gate for user-submitted media and comments.
//!
//! Uploads are staged to disk, screened by the [`moderation::ModerationGate`]
//! and only handed to a [`storage::BlobStore`] once admitted.

pub mod classifier;
pub mod config;
pub mod constants;
pub mod frames;
pub mod logging;
pub mod moderation;
pub mod routes;
pub mod services;
pub mod staging;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

use axum::{Router, extract::DefaultBodyLimit};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use constants::MAX_UPLOAD_SIZE;
use services::pipeline::ModerationService;

pub struct AppState {
    pub moderation: ModerationService,
}

/// The full HTTP application over shared state
pub fn app(state: Arc<AppState>) -> Router {
    routes::build_routes()
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
