use std::sync::Arc;

use anyhow::Context;
use moderation_api::{
    AppState, app,
    classifier::Classifiers,
    config::Settings,
    frames::FfmpegDecoder,
    logging,
    moderation::ModerationGate,
    services::pipeline::ModerationService,
    staging::StagingArea,
    storage,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let settings = Settings::from_env();

    // Model loading reads large files and may download them
    let models_dir = settings.models_dir.clone();
    let model_repo = settings.model_repo.clone();
    let classifiers =
        tokio::task::spawn_blocking(move || Classifiers::load(&models_dir, model_repo.as_deref()))
            .await
            .context("model loading task failed")?;

    let readiness = classifiers.readiness();
    if !readiness.detector || !readiness.text_classifier {
        log::warn!(
            "[startup] Running degraded (detector: {}, text classifier: {}); affected submissions will be rejected",
            readiness.detector,
            readiness.text_classifier
        );
    }

    let gate = Arc::new(ModerationGate::new(classifiers, Box::new(FfmpegDecoder::new())));
    let sink = storage::connect(&settings).await?;
    let staging = StagingArea::new(settings.staging_dir());
    log::info!("[startup] Staging uploads in {}", staging.dir().display());

    let state = Arc::new(AppState {
        moderation: ModerationService::new(gate, sink, staging),
    });

    let addr = format!("0.0.0.0:{}", settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    log::info!("Listening on http://{}", addr);
    axum::serve(listener, app(state))
        .await
        .context("server failed")?;
    Ok(())
}
