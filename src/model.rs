use serde::{Deserialize, Serialize};

pub const PLACEHOLDER_LABEL: &str = "Healthy";
pub const PLACEHOLDER_CONFIDENCE: f64 = 87.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    /// Percentage in `[0, 100]`.
    pub confidence: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Boundary to whatever produces a label for an uploaded image.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn predict(&self, image_data: &[u8]) -> Result<Prediction, ClassifierError>;
}

/// Returns the same result for every image until a real model is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderClassifier;

impl Classifier for PlaceholderClassifier {
    fn name(&self) -> &'static str {
        "placeholder"
    }

    fn predict(&self, _image_data: &[u8]) -> Result<Prediction, ClassifierError> {
        Ok(Prediction {
            label: PLACEHOLDER_LABEL.to_string(),
            confidence: PLACEHOLDER_CONFIDENCE,
        })
    }
}
