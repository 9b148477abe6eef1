//! A worker owns one independently loaded copy of the model and computes at
//! most one inference at a time

use crate::error::PredictError;
use crate::preprocess::InputTensor;
use crate::torch::Classifier;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use tracing::*;

/// The current status of a worker
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Currently computing inference
    Working = 0,

    /// Not computing inference
    Idle,

    /// Crashed during an invocation, never scheduled again
    Error,
}

#[derive(Debug)]
pub struct Worker {
    id: usize,
    model: Mutex<Box<dyn Classifier>>,
    status: Mutex<WorkerStatus>,
}

impl Worker {
    pub fn new(id: usize, model: Box<dyn Classifier>) -> Self {
        Worker {
            id,
            model: Mutex::new(model),
            status: Mutex::new(WorkerStatus::Idle),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_status(&self, status: WorkerStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Move an idle worker to `Working`. Returns false if it was not idle
    pub(crate) fn try_claim(&self) -> bool {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if *status == WorkerStatus::Idle {
            *status = WorkerStatus::Working;
            true
        } else {
            false
        }
    }

    /// Run inference on the worker's model. Blocks for the duration of the
    /// forward pass
    #[tracing::instrument(skip(self, input), fields(worker = self.id))]
    pub fn run(&self, input: &InputTensor) -> Result<Vec<f32>, PredictError> {
        let model = self.model.lock().unwrap_or_else(PoisonError::into_inner);

        let expected = model.input_shape();
        if input.shape != expected {
            return Err(PredictError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: input.shape.to_vec(),
            });
        }

        let output = model.invoke(input)?;
        if output.len() != model.output_len() {
            return Err(PredictError::OutputMismatch {
                expected: model.output_len(),
                actual: output.len(),
            });
        }
        debug!("worker computed scores {output:?}");
        Ok(output)
    }
}
