//! Moderation gate
//!
//! Decides admit/reject for a single submission. Every path returns a
//! [`Decision`] by value; policy rejections, missing models and processing
//! failures are distinct variants, never errors to be caught.
//!
//! A missing model always rejects (fails closed).

use anyhow::Context;
use image::{DynamicImage, ImageReader};
use std::path::Path;

use crate::classifier::{Classifiers, Detection, ModelKind, ObjectDetector, Readiness};
use crate::constants::{
    DETECTOR_CONFIDENCE_THRESHOLD, FRAME_CHECK_INTERVAL, TARGET_CLASSES,
    TEXT_CONFIDENCE_THRESHOLD, TEXT_LOG_PREVIEW_CHARS,
};
use crate::frames::{SampledFrames, VideoDecoder};

pub const NOT_READY_REASON: &str = "moderation system not ready";
pub const POLICY_REASON: &str = "content violates policy";
pub const INAPPROPRIATE_TEXT_REASON: &str = "comment contains inappropriate content";

/// Label recorded on text verdicts
const TEXT_CLASS: &str = "inappropriate";

/// Thresholds and disallowed classes, fixed at start-up
#[derive(Debug, Clone)]
pub struct Policy {
    pub target_classes: Vec<String>,
    pub detector_threshold: f32,
    pub text_threshold: f32,
    pub frame_interval: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            target_classes: TARGET_CLASSES.iter().map(|c| c.to_string()).collect(),
            detector_threshold: DETECTOR_CONFIDENCE_THRESHOLD,
            text_threshold: TEXT_CONFIDENCE_THRESHOLD,
            frame_interval: FRAME_CHECK_INTERVAL,
        }
    }
}

impl Policy {
    fn is_target(&self, label: &str) -> bool {
        self.target_classes.iter().any(|c| c == label)
    }
}

/// Outcome of classifying one image, frame or comment
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub is_flagged: bool,
    pub matched_class: Option<String>,
    pub confidence: f32,
    pub reason: String,
}

impl Verdict {
    fn flagged(class: &str, confidence: f32, reason: String) -> Self {
        Self {
            is_flagged: true,
            matched_class: Some(class.to_string()),
            confidence,
            reason,
        }
    }
}

/// Final decision for a whole submission
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Admitted,
    /// Content matched policy; the verdict says what and where
    Rejected(Verdict),
    /// A required model never loaded
    Unavailable(ModelKind),
    /// Unreadable input or an internal failure while classifying
    Failed(String),
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted)
    }

    /// Why the submission was not admitted
    pub fn cause(&self) -> Option<String> {
        match self {
            Decision::Admitted => None,
            Decision::Rejected(verdict) => Some(verdict.reason.clone()),
            Decision::Unavailable(model) => Some(format!("{} ({})", NOT_READY_REASON, model)),
            Decision::Failed(cause) => Some(cause.clone()),
        }
    }

    /// Empty when admitted
    pub fn reason(&self) -> String {
        self.cause().unwrap_or_default()
    }

    /// Comment status code: 0 valid, 1 inappropriate, -1 not ready, -2 error
    pub fn status_code(&self) -> i8 {
        match self {
            Decision::Admitted => 0,
            Decision::Rejected(_) => 1,
            Decision::Unavailable(_) => -1,
            Decision::Failed(_) => -2,
        }
    }
}

/// Runs submissions through the loaded classifiers.
///
/// Holds no mutable state; one instance is shared by all requests.
pub struct ModerationGate {
    classifiers: Classifiers,
    decoder: Box<dyn VideoDecoder>,
    policy: Policy,
}

impl ModerationGate {
    pub fn new(classifiers: Classifiers, decoder: Box<dyn VideoDecoder>) -> Self {
        Self::with_policy(classifiers, decoder, Policy::default())
    }

    pub fn with_policy(
        classifiers: Classifiers,
        decoder: Box<dyn VideoDecoder>,
        policy: Policy,
    ) -> Self {
        Self {
            classifiers,
            decoder,
            policy,
        }
    }

    pub fn readiness(&self) -> Readiness {
        self.classifiers.readiness()
    }

    /// Screen a single image file.
    pub fn moderate_image(&self, path: &Path) -> Decision {
        let Some(detector) = self.classifiers.detector() else {
            log::error!("[gate] Object detector not loaded, rejecting image");
            return Decision::Unavailable(ModelKind::Detector);
        };

        let image = match read_image(path) {
            Ok(image) => image,
            Err(e) => {
                log::error!("[gate] Could not read image {}: {:#}", path.display(), e);
                return Decision::Failed(format!("could not read image file: {:#}", e));
            }
        };

        log::info!("[gate] Screening image {}", path.display());
        match detector.detect(&image) {
            Ok(detections) => match self.screen(&detections) {
                Some(verdict) => {
                    log::warn!("[gate] Image rejected: {}", verdict.reason);
                    Decision::Rejected(verdict)
                }
                None => Decision::Admitted,
            },
            Err(e) => {
                log::error!("[gate] Detector failed on {}: {:#}", path.display(), e);
                Decision::Failed(format!("image processing error: {:#}", e))
            }
        }
    }

    /// Screen a video file, sampling every Nth frame.
    pub fn moderate_video(&self, path: &Path) -> Decision {
        let Some(detector) = self.classifiers.detector() else {
            log::error!("[gate] Object detector not loaded, rejecting video");
            return Decision::Unavailable(ModelKind::Detector);
        };

        let frames = match self.decoder.open(path) {
            Ok(frames) => frames,
            Err(e) => {
                log::error!("[gate] Could not open video {}: {:#}", path.display(), e);
                return Decision::Failed(format!("could not open video file: {:#}", e));
            }
        };

        log::info!("[gate] Screening video {}", path.display());
        self.scan_frames(detector, frames)
    }

    /// Screen an already-decoded frame sequence.
    ///
    /// Stops pulling frames at the first flagged sample. A sequence with no
    /// frames is admitted.
    pub fn moderate_frames<I>(&self, frames: I) -> Decision
    where
        I: Iterator<Item = anyhow::Result<DynamicImage>>,
    {
        let Some(detector) = self.classifiers.detector() else {
            return Decision::Unavailable(ModelKind::Detector);
        };
        self.scan_frames(detector, frames)
    }

    fn scan_frames<I>(&self, detector: &dyn ObjectDetector, frames: I) -> Decision
    where
        I: Iterator<Item = anyhow::Result<DynamicImage>>,
    {
        let mut sampled = SampledFrames::new(frames, self.policy.frame_interval);

        let first_hit = sampled
            .by_ref()
            .map(|sample| -> anyhow::Result<(usize, Option<Verdict>)> {
                let (index, frame) = sample?;
                log::debug!("[gate] Processing frame {}", index);
                let detections = detector
                    .detect(&frame)
                    .with_context(|| format!("classifying frame {}", index))?;
                Ok((index, self.screen(&detections)))
            })
            .find_map(|outcome| match outcome {
                Ok((_, None)) => None,
                Ok((index, Some(verdict))) => Some(Ok((index, verdict))),
                Err(e) => Some(Err(e)),
            });

        match first_hit {
            None => {
                log::info!(
                    "[gate] Video admitted after {} decoded frames",
                    sampled.decoded()
                );
                Decision::Admitted
            }
            Some(Ok((index, verdict))) => {
                let reason = format!("frame {}: {}", index, verdict.reason);
                log::warn!("[gate] Video rejected, stopped decoding at {}", reason);
                Decision::Rejected(Verdict { reason, ..verdict })
            }
            Some(Err(e)) => {
                log::error!("[gate] Video processing error: {:#}", e);
                Decision::Failed(format!("video processing error: {:#}", e))
            }
        }
    }

    /// Screen a comment. Blank text is admitted without consulting the model.
    pub fn moderate_text(&self, text: &str) -> Decision {
        if text.trim().is_empty() {
            return Decision::Admitted;
        }

        let Some(classifier) = self.classifiers.text() else {
            log::error!("[gate] Text classifier not loaded, rejecting comment");
            return Decision::Unavailable(ModelKind::Text);
        };

        let preview: String = text.chars().take(TEXT_LOG_PREVIEW_CHARS).collect();
        match classifier.score(text) {
            Ok(score) if score >= self.policy.text_threshold => {
                log::warn!(
                    "[gate] Comment flagged ({:.2}): '{}...'",
                    score,
                    preview
                );
                Decision::Rejected(Verdict::flagged(
                    TEXT_CLASS,
                    score,
                    INAPPROPRIATE_TEXT_REASON.to_string(),
                ))
            }
            Ok(score) => {
                log::info!("[gate] Comment valid ({:.2}): '{}...'", score, preview);
                Decision::Admitted
            }
            Err(e) => {
                log::error!("[gate] Text analysis failed: {:#}", e);
                Decision::Failed(format!("text analysis error: {:#}", e))
            }
        }
    }

    /// First detection that matches a target class at or above threshold.
    fn screen(&self, detections: &[Detection]) -> Option<Verdict> {
        detections
            .iter()
            .find(|d| {
                self.policy.is_target(&d.label) && d.confidence >= self.policy.detector_threshold
            })
            .map(|d| {
                Verdict::flagged(
                    &d.label,
                    d.confidence,
                    format!(
                        "{}: class '{}' detected with confidence {:.2}",
                        POLICY_REASON, d.label, d.confidence
                    ),
                )
            })
    }
}

fn read_image(path: &Path) -> anyhow::Result<DynamicImage> {
    Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        FakeDecoder, RecordingDetector, ScriptedText, gate_with, numbered_frames, write_png,
    };
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    fn policy() -> Policy {
        Policy {
            target_classes: vec!["gun".to_string(), "blood".to_string()],
            ..Policy::default()
        }
    }

    #[test]
    fn test_image_without_detector_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "a.png", 0);
        let gate = ModerationGate::with_policy(
            Classifiers::default(),
            Box::new(FakeDecoder::default()),
            policy(),
        );

        let decision = gate.moderate_image(&path);
        assert_eq!(decision, Decision::Unavailable(ModelKind::Detector));
        assert!(!decision.is_admitted());
        assert!(decision.reason().contains(NOT_READY_REASON));
    }

    #[test]
    fn test_image_flagged_at_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "a.png", 0);
        let detector = RecordingDetector::always(vec![
            Detection::new("person", 0.99),
            Detection::new("gun", 0.5),
        ]);
        let gate = gate_with(Some(detector), None, policy());

        match gate.moderate_image(&path) {
            Decision::Rejected(verdict) => {
                assert!(verdict.is_flagged);
                assert_eq!(verdict.matched_class.as_deref(), Some("gun"));
                assert!(verdict.reason.contains(POLICY_REASON));
                assert!(verdict.reason.contains("gun"));
                assert!(verdict.reason.contains("0.50"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_image_below_threshold_or_other_class_admitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "a.png", 0);
        let detector = RecordingDetector::always(vec![
            Detection::new("gun", 0.49),
            Detection::new("cat", 0.95),
        ]);
        let gate = gate_with(Some(detector), None, policy());

        assert_eq!(gate.moderate_image(&path), Decision::Admitted);
    }

    #[test]
    fn test_unreadable_image_is_processing_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not an image").unwrap();
        let gate = gate_with(Some(RecordingDetector::always(vec![])), None, policy());

        let decision = gate.moderate_image(&path);
        assert!(matches!(decision, Decision::Failed(_)));
        assert_eq!(decision.status_code(), -2);
    }

    #[test]
    fn test_detector_error_is_processing_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "a.png", 0);
        let gate = gate_with(Some(RecordingDetector::failing()), None, policy());

        assert!(matches!(gate.moderate_image(&path), Decision::Failed(_)));
    }

    #[test]
    fn test_video_stops_at_first_flagged_sample() {
        let detector = RecordingDetector::flagging_frames(&[25, 40], "gun", 0.8);
        let evaluated = detector.evaluated.clone();
        let gate = gate_with(Some(detector), None, policy());

        let decoded = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let decision = gate.moderate_frames(numbered_frames(50, decoded.clone()));

        match decision {
            Decision::Rejected(verdict) => {
                assert!(verdict.reason.starts_with("frame 25: "));
                assert_eq!(verdict.matched_class.as_deref(), Some("gun"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(*evaluated.lock().unwrap(), vec![5, 10, 15, 20, 25]);
        assert_eq!(decoded.load(Ordering::SeqCst), 25);
    }

    #[test]
    fn test_clean_video_admitted_after_all_samples() {
        let detector = RecordingDetector::flagging_frames(&[], "gun", 0.9);
        let evaluated = detector.evaluated.clone();
        let gate = gate_with(Some(detector), None, policy());

        let decoded = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        assert_eq!(
            gate.moderate_frames(numbered_frames(12, decoded.clone())),
            Decision::Admitted
        );
        assert_eq!(*evaluated.lock().unwrap(), vec![5, 10]);
        assert_eq!(decoded.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn test_video_with_no_frames_admitted() {
        let detector = RecordingDetector::flagging_frames(&[], "gun", 0.9);
        let gate = gate_with(Some(detector), None, policy());

        let decoded = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        assert_eq!(
            gate.moderate_frames(numbered_frames(0, decoded)),
            Decision::Admitted
        );
    }

    #[test]
    fn test_video_without_detector_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"VID 10").unwrap();
        let gate = ModerationGate::with_policy(
            Classifiers::default(),
            Box::new(FakeDecoder::default()),
            policy(),
        );

        assert_eq!(
            gate.moderate_video(&path),
            Decision::Unavailable(ModelKind::Detector)
        );
    }

    #[test]
    fn test_corrupt_video_is_processing_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"\x00\x01garbage").unwrap();
        let detector = RecordingDetector::flagging_frames(&[], "gun", 0.9);
        let gate = gate_with(Some(detector), None, policy());

        let decision = gate.moderate_video(&path);
        assert!(matches!(decision, Decision::Failed(ref cause) if cause.contains("could not open video")));
    }

    #[test]
    fn test_blank_text_admitted_without_classifier() {
        let text = ScriptedText::new(0.99);
        let calls = text.calls.clone();
        let gate = gate_with(None, Some(text), policy());

        assert_eq!(gate.moderate_text("   \n\t"), Decision::Admitted);
        assert_eq!(gate.moderate_text(""), Decision::Admitted);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // Blank text never needs the model, even when it is missing
        let gate = gate_with(None, None, policy());
        assert_eq!(gate.moderate_text(" "), Decision::Admitted);
    }

    #[test]
    fn test_friendly_comment_admitted_with_empty_reason() {
        let gate = gate_with(None, Some(ScriptedText::new(0.02)), policy());
        let decision = gate.moderate_text("I love this community");
        assert!(decision.is_admitted());
        assert_eq!(decision.reason(), "");
        assert_eq!(decision.status_code(), 0);
    }

    #[test]
    fn test_comment_over_threshold_rejected() {
        let gate = gate_with(None, Some(ScriptedText::new(0.41)), policy());
        let decision = gate.moderate_text("some abusive comment");
        assert_eq!(decision.status_code(), 1);
        assert!(decision.reason().contains("inappropriate content"));
    }

    #[test]
    fn test_comment_without_model_not_ready() {
        let gate = gate_with(None, None, policy());
        let decision = gate.moderate_text("hello there");
        assert_eq!(decision, Decision::Unavailable(ModelKind::Text));
        assert_eq!(decision.status_code(), -1);
    }

    #[test]
    fn test_comment_model_error_is_processing_error() {
        let gate = gate_with(None, Some(ScriptedText::failing()), policy());
        assert_eq!(gate.moderate_text("hello there").status_code(), -2);
    }

    #[test]
    fn test_default_policy_uses_fixed_constants() {
        let policy = Policy::default();
        assert_eq!(policy.detector_threshold, 0.5);
        assert_eq!(policy.text_threshold, 0.4);
        assert_eq!(policy.frame_interval, 5);
        assert!(policy.is_target("violence-Guns and blod-"));
        assert!(!policy.is_target("person"));
    }
}
