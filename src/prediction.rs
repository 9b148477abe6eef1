//! Class labels and the mapping from model output to a `Prediction`

use crate::error::PredictError;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

/// The classes the wildfire model distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Label {
    #[serde(rename = "fire")]
    Fire,
    #[serde(rename = "nofire")]
    NoFire,
}

impl Label {
    /// All labels, in the order of the model's output vector
    pub const ALL: [Label; 2] = [Label::Fire, Label::NoFire];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Fire => "fire",
            Label::NoFire => "nofire",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-class scores, in `Label::ALL` order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scores(pub [(Label, f32); 2]);

impl Scores {
    pub fn get(&self, label: Label) -> f32 {
        self.0
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, s)| *s)
            .unwrap_or(0.0)
    }
}

impl Serialize for Scores {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, score) in &self.0 {
            map.serialize_entry(label.as_str(), score)?;
        }
        map.end()
    }
}

/// The outcome of a successful request
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Prediction {
    #[serde(rename = "prediction")]
    pub label: Label,
    pub scores: Scores,
}

impl Prediction {
    /// Map a raw output vector to a prediction. When `softmax` is set the
    /// reported scores are probabilities; the chosen label is the same
    /// either way
    pub fn from_output(output: &[f32], softmax: bool) -> Result<Self, PredictError> {
        if output.len() != Label::ALL.len() {
            return Err(PredictError::OutputMismatch {
                expected: Label::ALL.len(),
                actual: output.len(),
            });
        }
        if output.iter().any(|s| !s.is_finite()) {
            return Err(PredictError::Inference(format!(
                "model produced non-finite scores {output:?}"
            )));
        }

        let idx = argmax(output);
        let values = if softmax {
            softmax_of(output)
        } else {
            output.to_vec()
        };

        let scores = Scores([(Label::Fire, values[0]), (Label::NoFire, values[1])]);
        Ok(Prediction {
            label: Label::ALL[idx],
            scores,
        })
    }
}

/// Index of the largest value. Ties go to the earliest index
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

fn softmax_of(values: &[f32]) -> Vec<f32> {
    let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_first_occurrence() {
        assert_eq!(argmax(&[0.2, 0.8]), 1);
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert_eq!(argmax(&[-3.0, -1.0, -1.0]), 1);
    }

    #[test]
    fn test_from_output() {
        let p = Prediction::from_output(&[3.2, -1.0], false).unwrap();
        assert_eq!(p.label, Label::Fire);
        assert_eq!(p.scores.get(Label::NoFire), -1.0);

        let p = Prediction::from_output(&[0.1, 0.9], true).unwrap();
        assert_eq!(p.label, Label::NoFire);
        let total = p.scores.get(Label::Fire) + p.scores.get(Label::NoFire);
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_tie_goes_to_fire() {
        let p = Prediction::from_output(&[0.0, 0.0], true).unwrap();
        assert_eq!(p.label, Label::Fire);
    }

    #[test]
    fn test_wrong_length() {
        let err = Prediction::from_output(&[0.1, 0.2, 0.7], false).unwrap_err();
        assert_eq!(
            err,
            PredictError::OutputMismatch {
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn test_non_finite() {
        let err = Prediction::from_output(&[f32::NAN, 0.2], false).unwrap_err();
        assert_eq!(err.kind(), "inference_error");
    }

    #[test]
    fn test_serialize() {
        let p = Prediction::from_output(&[1.0, 0.0], false).unwrap();
        let json = serde_json::to_value(p).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"prediction": "fire", "scores": {"fire": 1.0, "nofire": 0.0}})
        );
    }
}
