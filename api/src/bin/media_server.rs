//! Standalone file server for media admitted to local storage.
//!
//! URLs returned by the local backend (`{PUBLIC_BASE_URL}/media/...`) resolve
//! here.
//!
//! ## Environment Variables
//! - `LOCAL_STORAGE_PATH` - directory admitted media is copied into (default: `media/uploads`)
//! - `MEDIA_SERVER_PORT` - port to listen on (default: `3001`)

use axum::{
    Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use std::path::{Component, Path as FsPath, PathBuf};
use std::sync::Arc;

use moderation_api::{config::Settings, logging, storage::content_type_for};

struct MediaState {
    root: PathBuf,
}

/// Canonical path of `relative` under `root`, if it stays inside it.
fn resolve(root: &FsPath, relative: &str) -> Option<PathBuf> {
    // Path traversal protection
    if relative.contains('\0') {
        return None;
    }
    let plain = FsPath::new(relative)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !plain {
        return None;
    }
    let canonical = root.join(relative).canonicalize().ok()?;
    let root = root.canonicalize().ok()?;
    canonical.starts_with(&root).then_some(canonical)
}

async fn serve_file(
    State(state): State<Arc<MediaState>>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let full_path = resolve(&state.root, &path).ok_or(StatusCode::NOT_FOUND)?;
    let bytes = tokio::fs::read(&full_path).await.map_err(|e| {
        log::warn!("[media-server] Could not read {}: {}", full_path.display(), e);
        StatusCode::NOT_FOUND
    })?;

    // Stored keys carry a content digest, so an object never changes
    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(&path)),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable"),
        ],
        bytes,
    ))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    let port = std::env::var("MEDIA_SERVER_PORT").unwrap_or_else(|_| "3001".to_string());
    let root = Settings::from_env().local_storage_path;

    tokio::fs::create_dir_all(&root).await?;
    log::info!("[media-server] Local storage: {:?}", root);

    let state = Arc::new(MediaState { root });
    let app = Router::new()
        .route("/media/{*path}", get(serve_file))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("[media-server] Listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
