//! Code for loading and running the (trained) classifier

use crate::error::PredictError;
use crate::preprocess::InputTensor;
use anyhow::{Context, Result};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tch::{no_grad, Device, Kind, Tensor};

/// A loaded classification model. One instance must only run one
/// invocation at a time; the worker pool takes care of that
pub trait Classifier: Send + Debug {
    /// The exact input shape the model accepts, batch dimension included
    fn input_shape(&self) -> [usize; 4];

    /// Number of scores one forward pass returns
    fn output_len(&self) -> usize;

    /// Run a forward pass, returning one score per class
    fn invoke(&self, input: &InputTensor) -> Result<Vec<f32>, PredictError>;
}

/// Load and run a TorchScript file
#[derive(Debug)]
pub struct TorchModel {
    /// TorchScript filename
    filename: PathBuf,

    /// The loaded torch model
    model: tch::CModule,

    input_shape: [usize; 4],

    /// Learned from a forward pass over zeros at load time
    output_len: usize,
}

impl TorchModel {
    pub fn new(filename: impl AsRef<Path>, input_shape: [usize; 4]) -> Result<Self> {
        let filename = filename.as_ref().to_path_buf();
        let mut model = tch::CModule::load_on_device(&filename, Device::Cpu)
            .with_context(|| format!("failed to load TorchScript model {}", filename.display()))?;
        model.set_eval();

        // TorchScript doesn't expose the output shape, so run the model once
        let shape = dims(&input_shape);
        let zeros = Tensor::zeros(shape.as_slice(), (Kind::Float, Device::Cpu));
        let output = no_grad(|| model.forward_ts(&[zeros])).with_context(|| {
            format!(
                "model {} rejected an input of shape {input_shape:?}",
                filename.display()
            )
        })?;
        let output_len = output.numel();

        Ok(TorchModel {
            filename,
            model,
            input_shape,
            output_len,
        })
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }
}

impl Classifier for TorchModel {
    fn input_shape(&self) -> [usize; 4] {
        self.input_shape
    }

    fn output_len(&self) -> usize {
        self.output_len
    }

    fn invoke(&self, input: &InputTensor) -> Result<Vec<f32>, PredictError> {
        let shape = dims(&input.shape);
        let tensor = Tensor::from_slice(&input.data).reshape(shape.as_slice());

        let output = no_grad(|| self.model.forward_ts(&[tensor]))?;
        // Drop the batch dimension; a batch of one gives one row of scores
        let output = output.to_kind(Kind::Float).flatten(0, -1);
        let scores = Vec::<f32>::try_from(&output)?;
        Ok(scores)
    }
}

fn dims(shape: &[usize; 4]) -> Vec<i64> {
    shape.iter().map(|d| *d as i64).collect()
}
