//! Application constants
//!
//! Moderation policy is fixed at build time. None of these values can be
//! overridden per request.

/// Minimum detector confidence for a detection to count against an image or frame
pub const DETECTOR_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Minimum text model score for a comment to be considered inappropriate
pub const TEXT_CONFIDENCE_THRESHOLD: f32 = 0.4;

/// Only every Nth decoded video frame is inspected
pub const FRAME_CHECK_INTERVAL: usize = 5;

/// Fixed sequence length the text model was trained with
pub const MAX_SEQUENCE_LENGTH: usize = 2138;

/// Square input edge of the object detector, in pixels
pub const DETECTOR_INPUT_SIZE: u32 = 640;

/// Detector labels that are never allowed through.
///
/// These are the class names baked into the exported violence detector,
/// including the two placeholder classes its dataset export produced.
pub const TARGET_CLASSES: &[&str] = &[
    "-",
    "This dataset was exported via roboflow.com on April 11- 2024 at 8-18 AM GMT",
    "violence-Guns and blod-",
];

/// Maximum upload size for media submissions (200 MB)
pub const MAX_UPLOAD_SIZE: usize = 200 * 1024 * 1024;

/// Chunk size for Cloudinary chunked video uploads
pub const CLOUDINARY_CHUNK_SIZE: usize = 6_000_000;

/// Number of characters of a comment included in log lines
pub const TEXT_LOG_PREVIEW_CHARS: usize = 50;

/// Sub-directory of the media root that holds staged uploads
pub const STAGING_DIR_NAME: &str = "temp_files";

/// Model artifact file names inside the models directory
pub const DETECTOR_MODEL_FILE: &str = "detector.onnx";
pub const DETECTOR_LABELS_FILE: &str = "labels.txt";
pub const TEXT_MODEL_FILE: &str = "text_model.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
