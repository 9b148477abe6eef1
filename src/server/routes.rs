//! HTTP routes. `/predict` answers with the envelope's status code;
//! the serverless invocation path always answers 200 and carries the
//! outcome inside the envelope, as a function runtime would. That
//! includes request bodies that fail to parse.

use super::protocol::{Envelope, Health, PredictRequest};
use super::WebError;
use crate::error::PredictError;
use crate::handler::InferenceHandler;
use crate::prediction::Prediction;
use actix_web::{get, post, web, HttpResponse, Responder};
use std::time::Duration;
use tracing::*;

type Result<T> = std::result::Result<T, WebError>;

async fn classify(
    req: PredictRequest,
    handler: &InferenceHandler,
) -> std::result::Result<Prediction, PredictError> {
    let timeout = req.timeout_ms.map(Duration::from_millis);
    handler.predict_with_timeout(&req.url, timeout).await
}

/// Handle an HTTP request for inference
#[post("/predict")]
pub async fn predict(
    req: web::Json<PredictRequest>,
    handler: web::Data<InferenceHandler>,
) -> Result<impl Responder> {
    let prediction = classify(req.into_inner(), &handler).await?;
    info!("finished serving inference request");
    Ok(web::Json(Envelope::ok(prediction)))
}

/// The function-invocation endpoint of a local serverless runtime
#[post("/2015-03-31/functions/function/invocations")]
pub async fn invocation(body: web::Bytes, handler: web::Data<InferenceHandler>) -> impl Responder {
    let envelope = match serde_json::from_slice::<PredictRequest>(&body) {
        Ok(req) => classify(req, &handler).await.into(),
        Err(e) => {
            warn!("malformed invocation payload: {e}");
            Envelope::error(400, "bad_request", format!("malformed request: {e}"))
        }
    };
    web::Json(envelope)
}

/// HTTP request to list the model workers
#[get("/workers")]
pub async fn workers(handler: web::Data<InferenceHandler>) -> impl Responder {
    web::Json(handler.manager().workers())
}

/// HTTP request to get the status of all workers
#[get("/workers/status")]
pub async fn worker_status(handler: web::Data<InferenceHandler>) -> impl Responder {
    web::Json(handler.manager().all_status())
}

/// 503 once every worker has crashed, so a load balancer stops routing here
#[get("/health")]
pub async fn health(handler: web::Data<InferenceHandler>) -> impl Responder {
    let healthy = handler.manager().healthy();
    if healthy == 0 {
        HttpResponse::ServiceUnavailable().json(Health {
            status: "unavailable",
            workers: healthy,
        })
    } else {
        HttpResponse::Ok().json(Health {
            status: "ok",
            workers: healthy,
        })
    }
}
