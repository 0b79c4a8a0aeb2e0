use std::time::Duration;

use crate::db::RepositoryError;

/// Error taxonomy of the detection pipeline. An error is always
/// distinguishable from a genuine negative diagnosis; nothing in the
/// pipeline coerces a failure into "healthy".
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// Model artifact missing, unreadable, or shaped wrong. Fatal for the
    /// request and not retried.
    #[error("Model load failed: {0}")]
    ModelLoad(String),
    /// User-correctable input problem: undecodable bytes or a zero-area image.
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    /// Per-image budget exceeded inside a batch; only that slot fails.
    #[error("Image processing exceeded the {0:?} budget")]
    Timeout(Duration),
    /// Batch cancelled before this image was started.
    #[error("Batch cancelled")]
    Cancelled,
    #[error("Storage error: {0}")]
    Storage(String),
}

impl DetectError {
    /// Stable machine-readable tag for per-slot batch results.
    pub fn kind(&self) -> &'static str {
        match self {
            DetectError::ModelLoad(_) => "model_load_error",
            DetectError::InvalidImage(_) => "invalid_image_error",
            DetectError::Inference(_) => "inference_error",
            DetectError::Timeout(_) => "timeout_error",
            DetectError::Cancelled => "cancelled_error",
            DetectError::Storage(_) => "storage_error",
        }
    }
}

impl From<RepositoryError> for DetectError {
    fn from(err: RepositoryError) -> Self {
        DetectError::Storage(err.to_string())
    }
}

impl From<tch::TchError> for DetectError {
    fn from(err: tch::TchError) -> Self {
        DetectError::Inference(err.to_string())
    }
}
