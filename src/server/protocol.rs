//! Request and response bodies of the HTTP front end

use crate::error::PredictError;
use crate::prediction::Prediction;
use serde::{Deserialize, Serialize};

/// An inference request: `{"url": "...", "timeout_ms": 5000}`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PredictRequest {
    pub url: String,

    /// Overrides the configured fetch timeout for this request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Body {
    Prediction(Prediction),
    Error(ErrorBody),
}

/// Every response, success or failure, has this shape
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: Body,
}

impl Envelope {
    pub fn ok(prediction: Prediction) -> Self {
        Envelope {
            status_code: 200,
            body: Body::Prediction(prediction),
        }
    }

    pub fn error(status_code: u16, kind: &str, message: String) -> Self {
        Envelope {
            status_code,
            body: Body::Error(ErrorBody {
                error: ErrorDetail {
                    kind: kind.to_string(),
                    message,
                },
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.body, Body::Prediction(_))
    }
}

impl From<&PredictError> for Envelope {
    fn from(err: &PredictError) -> Self {
        Envelope::error(err.status_code(), err.kind(), err.to_string())
    }
}

impl From<Result<Prediction, PredictError>> for Envelope {
    fn from(result: Result<Prediction, PredictError>) -> Self {
        match result {
            Ok(prediction) => Envelope::ok(prediction),
            Err(e) => (&e).into(),
        }
    }
}

/// `GET /health`
#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub workers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_timeout_is_optional() {
        let req: PredictRequest = serde_json::from_str(r#"{"url": "https://a/b.jpg"}"#).unwrap();
        assert_eq!(req.timeout_ms, None);
        let req: PredictRequest =
            serde_json::from_str(r#"{"url": "https://a/b.jpg", "timeout_ms": 50}"#).unwrap();
        assert_eq!(req.timeout_ms, Some(50));
    }

    #[test]
    fn test_success_and_error_share_a_shape() {
        let ok = Envelope::ok(Prediction::from_output(&[0.0, 1.0], false).unwrap());
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({
                "statusCode": 200,
                "body": {"prediction": "nofire", "scores": {"fire": 0.0, "nofire": 1.0}}
            })
        );

        let err: Envelope = (&PredictError::Fetch("timed out fetching image".into())).into();
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({
                "statusCode": 400,
                "body": {"error": {
                    "kind": "fetch_error",
                    "message": "could not fetch image: timed out fetching image"
                }}
            })
        );
    }
}
