//! FER+ emotion classifier via ONNX Runtime.
//!
//! Produces 8 logits in [`Emotion::ALL`](crate::types::Emotion::ALL) order
//! from a (1, 1, 64, 64) grayscale tensor.

use crate::preprocess::FERPLUS_INPUT_SIZE;
use crate::types::{EmotionScores, EMOTION_COUNT};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("input tensor has shape {0:?}, expected [1, 1, 64, 64]")]
    BadInputShape(Vec<usize>),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A network mapping a preprocessed face tensor to raw emotion logits.
pub trait EmotionModel {
    fn logits(&mut self, input: &Array4<f32>) -> Result<[f32; EMOTION_COUNT], ClassifierError>;

    /// Run the network and convert logits to a probability distribution.
    fn classify(&mut self, input: &Array4<f32>) -> Result<EmotionScores, ClassifierError> {
        let logits = self.logits(input)?;
        Ok(EmotionScores::from_logits(&logits))
    }
}

/// FER+ (emotion-ferplus-8) classifier.
pub struct EmotionClassifier {
    session: Session,
}

impl EmotionClassifier {
    /// Load the FER+ ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, ClassifierError> {
        if !model_path.exists() {
            return Err(ClassifierError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded FER+ model"
        );

        Ok(Self { session })
    }
}

impl EmotionModel for EmotionClassifier {
    fn logits(&mut self, input: &Array4<f32>) -> Result<[f32; EMOTION_COUNT], ClassifierError> {
        check_input_shape(input)?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("logit extraction: {e}")))?;

        logits_from_slice(raw)
    }
}

fn check_input_shape(input: &Array4<f32>) -> Result<(), ClassifierError> {
    let size = FERPLUS_INPUT_SIZE;
    if input.shape() != &[1, 1, size, size] {
        return Err(ClassifierError::BadInputShape(input.shape().to_vec()));
    }
    Ok(())
}

/// Flattened network output → fixed-size logit array.
fn logits_from_slice(raw: &[f32]) -> Result<[f32; EMOTION_COUNT], ClassifierError> {
    let logits: [f32; EMOTION_COUNT] = raw.try_into().map_err(|_| {
        ClassifierError::InferenceFailed(format!(
            "expected {EMOTION_COUNT} logits, got {}",
            raw.len()
        ))
    })?;
    if logits.iter().any(|v| !v.is_finite()) {
        return Err(ClassifierError::InferenceFailed(format!(
            "non-finite logits: {logits:?}"
        )));
    }
    Ok(logits)
}
