//! The user-facing JSON web server that listens for inference requests

use crate::error::PredictError;
use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{error, web, HttpResponse};
use protocol::Envelope;

pub mod protocol;
pub mod routes;

/// An error response, rendered as an `Envelope`
#[derive(Debug)]
pub struct WebError {
    envelope: Envelope,
    message: String,
}

impl WebError {
    pub fn bad_request(message: String) -> Self {
        WebError {
            envelope: Envelope::error(400, "bad_request", message.clone()),
            message,
        }
    }
}

impl std::fmt::Display for WebError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl error::ResponseError for WebError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .json(&self.envelope)
    }

    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.envelope.status_code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<PredictError> for WebError {
    fn from(err: PredictError) -> WebError {
        WebError {
            envelope: (&err).into(),
            message: err.to_string(),
        }
    }
}

/// Largest request body accepted, large enough for a data URL
pub const MAX_REQUEST_BYTES: usize = 2 * 1024 * 1024;

/// Register every route. Malformed JSON bodies get the same envelope as any
/// other failure
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(MAX_REQUEST_BYTES)
            .error_handler(|err, _req| WebError::bad_request(err.to_string()).into()),
    )
    .app_data(web::PayloadConfig::new(MAX_REQUEST_BYTES))
    .service(routes::predict)
    .service(routes::invocation)
    .service(routes::workers)
    .service(routes::worker_status)
    .service(routes::health);
}
