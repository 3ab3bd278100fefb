//! Classifier adapters for the moderation gate.
//!
//! Two pluggable models sit behind traits so the gate never depends on a
//! concrete inference runtime:
//!
//! - [`ObjectDetector`]: labels regions of an image (violence detector)
//! - [`TextClassifier`]: scores a comment between 0 and 1 (abuse model)
//!
//! [`Classifiers`] is built once at start-up. A model that failed to load is
//! kept as `None` so callers can tell "unavailable" apart from "ran and found
//! nothing".

use anyhow::Result;
use hf_hub::{Repo, RepoType, api::sync::Api};
use image::DynamicImage;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::constants::{
    DETECTOR_LABELS_FILE, DETECTOR_MODEL_FILE, MAX_SEQUENCE_LENGTH, TEXT_MODEL_FILE,
    TOKENIZER_FILE,
};

mod detector;
mod text;
mod tokenizer;

pub use detector::OnnxDetector;
pub use text::OnnxTextClassifier;
pub use tokenizer::KerasTokenizer;

/// One labelled region reported by the object detector
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Object detection over a decoded image or video frame
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, frame: &DynamicImage) -> Result<Vec<Detection>>;
}

/// Scores raw text, higher meaning more likely abusive
pub trait TextClassifier: Send + Sync {
    fn score(&self, text: &str) -> Result<f32>;
}

/// Which model a moderation path depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Detector,
    Text,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Detector => write!(f, "object detector"),
            ModelKind::Text => write!(f, "text classifier"),
        }
    }
}

/// Which models loaded successfully
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub detector: bool,
    pub text_classifier: bool,
}

/// Loaded model handles, immutable after construction
#[derive(Default)]
pub struct Classifiers {
    detector: Option<Box<dyn ObjectDetector>>,
    text: Option<Box<dyn TextClassifier>>,
}

impl Classifiers {
    pub fn new(
        detector: Option<Box<dyn ObjectDetector>>,
        text: Option<Box<dyn TextClassifier>>,
    ) -> Self {
        Self { detector, text }
    }

    /// Load both models from `models_dir`.
    ///
    /// Files missing locally are fetched from `model_repo` on the Hugging
    /// Face hub when one is given. Failures are logged and leave that model
    /// unavailable.
    pub fn load(models_dir: &Path, model_repo: Option<&str>) -> Self {
        log::info!("[models] Looking for models in {}", models_dir.display());

        let detector_path = resolve_model_file(models_dir, model_repo, DETECTOR_MODEL_FILE);
        let labels_path = resolve_model_file(models_dir, model_repo, DETECTOR_LABELS_FILE);
        let detector = match OnnxDetector::load(&detector_path, &labels_path) {
            Ok(d) => {
                log::info!(
                    "[models] Object detector loaded from {}",
                    detector_path.display()
                );
                Some(Box::new(d) as Box<dyn ObjectDetector>)
            }
            Err(e) => {
                log::error!(
                    "[models] Object detector unavailable, image and video moderation will reject: {:#}",
                    e
                );
                None
            }
        };

        let text_path = resolve_model_file(models_dir, model_repo, TEXT_MODEL_FILE);
        let tokenizer_path = resolve_model_file(models_dir, model_repo, TOKENIZER_FILE);
        let text = match OnnxTextClassifier::load(&text_path, &tokenizer_path, MAX_SEQUENCE_LENGTH)
        {
            Ok(t) => {
                log::info!("[models] Text classifier loaded from {}", text_path.display());
                Some(Box::new(t) as Box<dyn TextClassifier>)
            }
            Err(e) => {
                log::error!(
                    "[models] Text classifier unavailable, comment moderation will reject: {:#}",
                    e
                );
                None
            }
        };

        Self { detector, text }
    }

    pub fn detector(&self) -> Option<&dyn ObjectDetector> {
        self.detector.as_deref()
    }

    pub fn text(&self) -> Option<&dyn TextClassifier> {
        self.text.as_deref()
    }

    pub fn readiness(&self) -> Readiness {
        Readiness {
            detector: self.detector.is_some(),
            text_classifier: self.text.is_some(),
        }
    }
}

fn resolve_model_file(models_dir: &Path, model_repo: Option<&str>, file_name: &str) -> PathBuf {
    let local = models_dir.join(file_name);
    let Some(repo) = model_repo else {
        return local;
    };
    if local.exists() {
        return local;
    }

    match fetch_from_hub(repo, file_name) {
        Ok(path) => path,
        Err(e) => {
            log::warn!("[models] Could not fetch {} from {}: {:#}", file_name, repo, e);
            local
        }
    }
}

fn fetch_from_hub(repo: &str, file_name: &str) -> Result<PathBuf> {
    let api = Api::new()?;
    let repo = api.repo(Repo::new(repo.to_string(), RepoType::Model));
    Ok(repo.get(file_name)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_models_are_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let classifiers = Classifiers::load(dir.path(), None);
        assert!(classifiers.detector().is_none());
        assert!(classifiers.text().is_none());
        assert_eq!(
            classifiers.readiness(),
            Readiness {
                detector: false,
                text_classifier: false
            }
        );
    }

    #[test]
    fn test_resolve_prefers_local_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("labels.txt"), "gun\n").unwrap();
        let path = resolve_model_file(dir.path(), Some("someone/unused"), "labels.txt");
        assert_eq!(path, dir.path().join("labels.txt"));
    }
}
