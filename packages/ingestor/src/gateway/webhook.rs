//! Webhook endpoint handler.
//!
//! Parses the watcher notification, runs it through the ingestion pipeline
//! and maps the outcome to an HTTP response. Relayed and duplicate
//! notifications look identical to the sender.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::AppState;
use crate::event::{NormalizationError, Notification};
use crate::pipeline::{Outcome, PipelineError, Stage};

/// Errors surfaced to the webhook sender.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Request carried no body.
    #[error("no data received")]
    EmptyBody,

    /// Body is not valid JSON.
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Notification could not be normalized.
    #[error("{0}")]
    Rejected(#[from] NormalizationError),

    /// Infrastructure failure; the sender should redeliver.
    #[error("relay failed at {stage}: {error}")]
    Failed { stage: Stage, error: PipelineError },
}

/// Success body, identical for relayed and duplicate notifications.
#[derive(Debug, Clone, Serialize)]
pub struct SuccessResponse {
    pub message: &'static str,
}

/// JSON error response body.
#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            GatewayError::EmptyBody | GatewayError::InvalidJson(_) | GatewayError::Rejected(_) => {
                (StatusCode::BAD_REQUEST, "bad_request", self.to_string())
            }
            GatewayError::Failed { stage, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                format!("relay failed at {}, please retry", stage),
            ),
        };

        (status, Json(ErrorResponse { error, message })).into_response()
    }
}

/// Map a pipeline outcome to the webhook response.
pub fn outcome_response(outcome: Outcome) -> Result<Json<SuccessResponse>, GatewayError> {
    match outcome {
        Outcome::Relayed | Outcome::Duplicate => Ok(Json(SuccessResponse { message: "success" })),
        Outcome::Rejected(reason) => Err(GatewayError::Rejected(reason)),
        Outcome::Failed { stage, error } => Err(GatewayError::Failed { stage, error }),
    }
}

/// Webhook handler.
///
/// # Request
///
/// - Method: POST
/// - Body: JSON notification with at least a `hash` field
///
/// # Response
///
/// - 200 OK `{"message":"success"}`: relayed or already relayed
/// - 400 Bad Request: empty body, invalid JSON or malformed notification
/// - 500 Internal Server Error: store or queue failure, redeliver later
///
/// # Example
///
/// ```ignore
/// POST /webhook HTTP/1.1
/// Content-Type: application/json
///
/// {"hash": "0xabc", "kind": "Transaction", "status": "confirmed"}
///
/// HTTP/1.1 200 OK
///
/// {"message": "success"}
/// ```
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    body: Bytes,
) -> Result<Json<SuccessResponse>, GatewayError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(GatewayError::EmptyBody);
    }

    let notification = Notification::from_slice(&body)?;
    if notification.fields().is_null() {
        return Err(GatewayError::EmptyBody);
    }

    debug!(bytes = body.len(), "Received notification");
    outcome_response(app_state.pipeline().process(notification).await)
}
