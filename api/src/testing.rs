//! Test doubles shared by the gate, pipeline and route tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::classifier::{Classifiers, Detection, ObjectDetector, TextClassifier};
use crate::frames::{DecodedFrames, VideoDecoder};
use crate::moderation::{ModerationGate, Policy};
use crate::storage::{BlobStore, MediaKind, StorageError};

/// `count` frames where frame `i` (1-based) is `i` pixels wide.
///
/// `decoded` counts how many frames were actually pulled.
pub fn numbered_frames(count: u32, decoded: Arc<AtomicUsize>) -> DecodedFrames {
    Box::new((1..=count).map(move |i| {
        decoded.fetch_add(1, Ordering::SeqCst);
        Ok(DynamicImage::new_rgb8(i, 1))
    }))
}

enum DetectorScript {
    Always(Vec<Detection>),
    /// Flags frames whose width is listed
    Frames {
        widths: Vec<u32>,
        label: String,
        confidence: f32,
    },
    Failing,
}

/// Detector that records the width of every image it was shown
pub struct RecordingDetector {
    pub evaluated: Arc<Mutex<Vec<u32>>>,
    script: DetectorScript,
}

impl RecordingDetector {
    fn scripted(script: DetectorScript) -> Self {
        Self {
            evaluated: Arc::new(Mutex::new(Vec::new())),
            script,
        }
    }

    pub fn always(detections: Vec<Detection>) -> Self {
        Self::scripted(DetectorScript::Always(detections))
    }

    pub fn flagging_frames(widths: &[u32], label: &str, confidence: f32) -> Self {
        Self::scripted(DetectorScript::Frames {
            widths: widths.to_vec(),
            label: label.to_string(),
            confidence,
        })
    }

    pub fn failing() -> Self {
        Self::scripted(DetectorScript::Failing)
    }
}

impl ObjectDetector for RecordingDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
        if let Ok(mut evaluated) = self.evaluated.lock() {
            evaluated.push(image.width());
        }
        match &self.script {
            DetectorScript::Always(detections) => Ok(detections.clone()),
            DetectorScript::Frames {
                widths,
                label,
                confidence,
            } => Ok(if widths.contains(&image.width()) {
                vec![Detection::new(label.as_str(), *confidence)]
            } else {
                Vec::new()
            }),
            DetectorScript::Failing => Err(anyhow!("inference session crashed")),
        }
    }
}

/// Text classifier returning a fixed score
pub struct ScriptedText {
    pub calls: Arc<AtomicUsize>,
    score: Option<f32>,
}

impl ScriptedText {
    pub fn new(score: f32) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            score: Some(score),
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            score: None,
        }
    }
}

impl TextClassifier for ScriptedText {
    fn score(&self, _text: &str) -> Result<f32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.score.ok_or_else(|| anyhow!("tokenizer produced no tokens"))
    }
}

/// Decodes files containing `VID <n>` into `n` numbered frames.
/// Anything else fails to open.
#[derive(Default)]
pub struct FakeDecoder;

impl VideoDecoder for FakeDecoder {
    fn open(&self, path: &Path) -> Result<DecodedFrames> {
        let content = std::fs::read_to_string(path)?;
        let count = content
            .trim()
            .strip_prefix("VID ")
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| anyhow!("invalid data found when processing input"))?;
        Ok(numbered_frames(count, Arc::new(AtomicUsize::new(0))))
    }
}

pub fn gate_with(
    detector: Option<RecordingDetector>,
    text: Option<ScriptedText>,
    policy: Policy,
) -> ModerationGate {
    let classifiers = Classifiers::new(
        detector.map(|d| Box::new(d) as Box<dyn ObjectDetector>),
        text.map(|t| Box::new(t) as Box<dyn TextClassifier>),
    );
    ModerationGate::with_policy(classifiers, Box::new(FakeDecoder), policy)
}

fn solid_image(shade: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([shade, shade, shade])))
}

pub fn write_png(dir: &Path, name: &str, shade: u8) -> PathBuf {
    let path = dir.join(name);
    solid_image(shade)
        .save_with_format(&path, ImageFormat::Png)
        .unwrap();
    path
}

pub fn png_bytes() -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    solid_image(200).write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

#[derive(Debug, Clone)]
pub struct StoreCall {
    pub path: PathBuf,
    pub logical_name: String,
    pub kind: MediaKind,
    /// Whether the staged file was still on disk during the call
    pub existed: bool,
}

/// Blob store that records calls and returns a canned result
pub struct RecordingStore {
    pub calls: Arc<Mutex<Vec<StoreCall>>>,
    url: Option<String>,
}

impl RecordingStore {
    pub fn succeeding(url: &str) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            url: Some(url.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            url: None,
        }
    }
}

#[async_trait]
impl BlobStore for RecordingStore {
    async fn store(
        &self,
        local_path: &Path,
        logical_name: &str,
        kind: MediaKind,
    ) -> Result<String, StorageError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(StoreCall {
                path: local_path.to_path_buf(),
                logical_name: logical_name.to_string(),
                kind,
                existed: local_path.exists(),
            });
        }
        self.url
            .clone()
            .ok_or_else(|| StorageError::Backend("bucket unavailable".to_string()))
    }
}
