use anyhow::{Result, anyhow};
use ndarray::Array2;
use ort::session::{Session, builder::GraphOptimizationLevel};
use std::path::Path;
use std::sync::Mutex;

use super::{KerasTokenizer, TextClassifier};

/// Comment abuse classifier: Keras model exported to ONNX plus its tokenizer.
///
/// The model takes a `[1, max_len]` padded token sequence and emits a single
/// sigmoid score.
pub struct OnnxTextClassifier {
    session: Mutex<Session>,
    tokenizer: KerasTokenizer,
    max_len: usize,
}

impl OnnxTextClassifier {
    pub fn load(model_path: &Path, tokenizer_path: &Path, max_len: usize) -> Result<Self> {
        if !model_path.exists() {
            return Err(anyhow!("model file {} not found", model_path.display()));
        }
        let tokenizer = KerasTokenizer::from_file(tokenizer_path)?;

        let session = Session::builder()
            .map_err(|e| anyhow!("creating session builder: {}", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("setting optimization level: {}", e))?
            .commit_from_file(model_path)
            .map_err(|e| anyhow!("loading {}: {}", model_path.display(), e))?;

        log::info!(
            "[models] Tokenizer vocabulary: {} words",
            tokenizer.vocabulary_size()
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            max_len,
        })
    }
}

impl TextClassifier for OnnxTextClassifier {
    fn score(&self, text: &str) -> Result<f32> {
        let input = encode_input(&self.tokenizer, text, self.max_len)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow!("Lock error: {}", e))?;

        let input_name = session
            .inputs
            .first()
            .map_or_else(|| "input".to_string(), |i| i.name.clone());
        let input_ref = ort::value::TensorRef::from_array_view(&input)
            .map_err(|e| anyhow!("building input tensor: {}", e))?;
        let outputs = session
            .run(ort::inputs![input_name.as_str() => input_ref])
            .map_err(|e| anyhow!("text inference failed: {}", e))?;

        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| anyhow!("text model produced no output tensor"))?;
        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow!("reading text model output: {}", e))?;

        let score = data
            .first()
            .copied()
            .ok_or_else(|| anyhow!("text model output is empty"))?;
        if !score.is_finite() {
            return Err(anyhow!("text model returned non-finite score {}", score));
        }
        Ok(score)
    }
}

fn encode_input(tokenizer: &KerasTokenizer, text: &str, max_len: usize) -> Result<Array2<f32>> {
    let sequence: Vec<f32> = tokenizer
        .encode_padded(text, max_len)
        .into_iter()
        .map(|id| id as f32)
        .collect();
    Array2::from_shape_vec((1, max_len), sequence)
        .map_err(|e| anyhow!("shaping text input: {}", e))
}
