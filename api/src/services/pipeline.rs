//! Stage → moderate → store, for one submission at a time.
//!
//! Each entry point takes ownership of a [`StagedFile`], so the staged copy
//! is deleted when the call returns whatever the outcome. Gate work is
//! CPU-bound and runs on the blocking pool; the request waits for it.

use std::sync::Arc;

use crate::classifier::Readiness;
use crate::moderation::{Decision, ModerationGate};
use crate::services::error::{LogErr, ModerationError};
use crate::staging::{StagedFile, StagingArea};
use crate::storage::{BlobStore, MediaKind, logical_name};

#[derive(Clone)]
pub struct ModerationService {
    gate: Arc<ModerationGate>,
    sink: Arc<dyn BlobStore>,
    staging: StagingArea,
}

impl ModerationService {
    pub fn new(gate: Arc<ModerationGate>, sink: Arc<dyn BlobStore>, staging: StagingArea) -> Self {
        Self {
            gate,
            sink,
            staging,
        }
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn readiness(&self) -> Readiness {
        self.gate.readiness()
    }

    /// Screen a staged image and store it if admitted. Returns its URL.
    pub async fn moderate_and_store_image(
        &self,
        staged: StagedFile,
    ) -> Result<String, ModerationError> {
        self.moderate_and_store(staged, MediaKind::Image).await
    }

    /// Screen a staged video and store it if admitted. Returns its URL.
    pub async fn moderate_and_store_video(
        &self,
        staged: StagedFile,
    ) -> Result<String, ModerationError> {
        self.moderate_and_store(staged, MediaKind::Video).await
    }

    /// Classify a comment without storing anything.
    pub async fn classify_text(&self, text: String) -> Result<Decision, ModerationError> {
        let gate = self.gate.clone();
        tokio::task::spawn_blocking(move || gate.moderate_text(&text))
            .await
            .log_processing("[pipeline] Text moderation task failed")
    }

    async fn moderate_and_store(
        &self,
        staged: StagedFile,
        kind: MediaKind,
    ) -> Result<String, ModerationError> {
        log::info!(
            "[pipeline] Moderating {} {}",
            kind.as_str(),
            staged.original_name()
        );

        let gate = self.gate.clone();
        let path = staged.path().to_path_buf();
        let decision = tokio::task::spawn_blocking(move || match kind {
            MediaKind::Image => gate.moderate_image(&path),
            MediaKind::Video => gate.moderate_video(&path),
        })
        .await
        .log_processing("[pipeline] Moderation task failed")?;

        log::info!(
            "[pipeline] Moderation finished for {}: {}",
            staged.original_name(),
            if decision.is_admitted() { "admitted" } else { "rejected" }
        );
        decision.into_result()?;

        let public_id = logical_name(staged.original_name(), kind);
        let url = self.sink.store(staged.path(), &public_id, kind).await?;
        log::info!(
            "[pipeline] {} uploaded successfully. URL: {}",
            staged.original_name(),
            url
        );

        staged.discard();
        Ok(url)
    }
}
