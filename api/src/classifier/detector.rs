use anyhow::{Context, Result, anyhow};
use image::{DynamicImage, imageops::FilterType};
use ndarray::Array4;
use ort::session::{Session, builder::GraphOptimizationLevel};
use std::path::Path;
use std::sync::Mutex;

use super::{Detection, ObjectDetector};
use crate::constants::{DETECTOR_CONFIDENCE_THRESHOLD, DETECTOR_INPUT_SIZE};

/// Gray used by YOLO letterboxing (114 / 255)
const LETTERBOX_FILL: f32 = 114.0 / 255.0;

/// Number of box coordinates preceding the class scores in each output row
const BOX_COORDS: usize = 4;

/// YOLOv8-style violence detector exported to ONNX.
///
/// Output rows below the confidence floor are dropped before they reach the
/// gate, the same way the detector's own `conf` argument filters them.
pub struct OnnxDetector {
    session: Mutex<Session>,
    labels: Vec<String>,
    confidence_floor: f32,
}

impl OnnxDetector {
    pub fn load(model_path: &Path, labels_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(anyhow!("model file {} not found", model_path.display()));
        }
        let labels = parse_labels(
            &std::fs::read_to_string(labels_path)
                .with_context(|| format!("reading labels {}", labels_path.display()))?,
        );
        if labels.is_empty() {
            return Err(anyhow!("labels file {} is empty", labels_path.display()));
        }

        let session = Session::builder()
            .map_err(|e| anyhow!("creating session builder: {}", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("setting optimization level: {}", e))?
            .commit_from_file(model_path)
            .map_err(|e| anyhow!("loading {}: {}", model_path.display(), e))?;

        Ok(Self {
            session: Mutex::new(session),
            labels,
            confidence_floor: DETECTOR_CONFIDENCE_THRESHOLD,
        })
    }
}

impl ObjectDetector for OnnxDetector {
    fn detect(&self, frame: &DynamicImage) -> Result<Vec<Detection>> {
        let input = letterbox(frame, DETECTOR_INPUT_SIZE);

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow!("Lock error: {}", e))?;

        let input_name = session
            .inputs
            .first()
            .map_or_else(|| "images".to_string(), |i| i.name.clone());
        let input_ref = ort::value::TensorRef::from_array_view(&input)
            .map_err(|e| anyhow!("building input tensor: {}", e))?;
        let outputs = session
            .run(ort::inputs![input_name.as_str() => input_ref])
            .map_err(|e| anyhow!("detector inference failed: {}", e))?;

        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| anyhow!("detector produced no output tensor"))?;
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow!("reading detector output: {}", e))?;

        decode_output(shape, data, &self.labels, self.confidence_floor)
    }
}

/// One class name per non-empty line.
fn parse_labels(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resize keeping aspect ratio, center on a gray square, NCHW in [0, 1].
fn letterbox(image: &DynamicImage, size: u32) -> Array4<f32> {
    let (width, height) = (image.width().max(1), image.height().max(1));
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);
    let offset_x = (size - new_w) / 2;
    let offset_y = (size - new_h) / 2;

    let resized = image
        .resize_exact(new_w, new_h, FilterType::Triangle)
        .to_rgb8();

    let side = size as usize;
    let mut tensor = Array4::<f32>::from_elem((1, 3, side, side), LETTERBOX_FILL);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = ((x + offset_x) as usize, (y + offset_y) as usize);
        tensor[[0, 0, ty, tx]] = pixel[0] as f32 / 255.0;
        tensor[[0, 1, ty, tx]] = pixel[1] as f32 / 255.0;
        tensor[[0, 2, ty, tx]] = pixel[2] as f32 / 255.0;
    }
    tensor
}

/// Decode a `[1, 4 + classes, anchors]` output into per-anchor best classes.
fn decode_output(
    shape: &[i64],
    data: &[f32],
    labels: &[String],
    confidence_floor: f32,
) -> Result<Vec<Detection>> {
    if shape.len() != 3 {
        return Err(anyhow!("Expected 3D detector output, got {}D", shape.len()));
    }
    let rows = shape[1] as usize;
    let anchors = shape[2] as usize;
    if rows <= BOX_COORDS {
        return Err(anyhow!("detector output has no class rows ({} rows)", rows));
    }
    if data.len() < rows * anchors {
        return Err(anyhow!(
            "detector output holds {} values, expected {}",
            data.len(),
            rows * anchors
        ));
    }
    let classes = rows - BOX_COORDS;

    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let best = (0..classes)
            .map(|class| (class, data[(BOX_COORDS + class) * anchors + anchor]))
            .max_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((class, score)) = best {
            if score >= confidence_floor {
                let label = labels
                    .get(class)
                    .cloned()
                    .unwrap_or_else(|| format!("class_{}", class));
                detections.push(Detection::new(label, score));
            }
        }
    }

    Ok(detections)
}
