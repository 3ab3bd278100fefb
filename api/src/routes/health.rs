//! Liveness and model readiness (/health, /ready)

use axum::{Json, Router, extract::State, routing::get};
use std::sync::Arc;

use crate::AppState;
use crate::classifier::Readiness;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
}

async fn health() -> &'static str {
    "ok"
}

/// GET /ready - Which models loaded at start-up
async fn ready(State(state): State<Arc<AppState>>) -> Json<Readiness> {
    Json(state.moderation.readiness())
}
