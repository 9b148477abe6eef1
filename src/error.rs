//! Errors produced while serving a single prediction request

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A stage of the prediction pipeline. A request moves through these in
/// order and stops at the first stage that fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Fetching,
    Decoding,
    Preprocessing,
    Invoking,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Idle => "idle",
            Stage::Fetching => "fetching",
            Stage::Decoding => "decoding",
            Stage::Preprocessing => "preprocessing",
            Stage::Invoking => "invoking",
            Stage::Done => "done",
        };
        f.write_str(s)
    }
}

/// Every way a prediction request can fail. All of them are terminal for
/// the request
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PredictError {
    /// The URL is malformed or the image could not be retrieved
    #[error("could not fetch image: {0}")]
    Fetch(String),

    /// The fetched bytes are not a supported image
    #[error("could not decode image: {0}")]
    Decode(String),

    /// The input tensor does not have the shape the model declares
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// The model returned a different number of scores than it declares
    #[error("output mismatch: expected {expected} scores, got {actual}")]
    OutputMismatch { expected: usize, actual: usize },

    /// The model engine failed or produced unusable scores
    #[error("inference failed: {0}")]
    Inference(String),

    /// No healthy model instance is left to serve the request
    #[error("no model worker available: {0}")]
    Unavailable(String),
}

impl PredictError {
    /// Stable machine readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::Fetch(_) => "fetch_error",
            PredictError::Decode(_) => "decode_error",
            PredictError::ShapeMismatch { .. } | PredictError::OutputMismatch { .. } => {
                "shape_mismatch"
            }
            PredictError::Inference(_) => "inference_error",
            PredictError::Unavailable(_) => "unavailable",
        }
    }

    /// The status code reported in the response envelope
    pub fn status_code(&self) -> u16 {
        match self {
            PredictError::Fetch(_) | PredictError::Decode(_) => 400,
            PredictError::ShapeMismatch { .. }
            | PredictError::OutputMismatch { .. }
            | PredictError::Inference(_) => 500,
            PredictError::Unavailable(_) => 503,
        }
    }

    /// The pipeline stage the error terminates in
    pub fn stage(&self) -> Stage {
        match self {
            PredictError::Fetch(_) => Stage::Fetching,
            PredictError::Decode(_) => Stage::Decoding,
            PredictError::ShapeMismatch { .. } => Stage::Preprocessing,
            PredictError::OutputMismatch { .. }
            | PredictError::Inference(_)
            | PredictError::Unavailable(_) => Stage::Invoking,
        }
    }
}

impl From<tch::TchError> for PredictError {
    fn from(err: tch::TchError) -> Self {
        PredictError::Inference(err.to_string())
    }
}
