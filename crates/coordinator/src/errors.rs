//! Coordinator error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl. Messages
//! returned to clients are generic; the underlying cause is logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::{ErrorDetail, ErrorResponse, NO_CREDITS_CODE};
use thiserror::Error;

/// Coordinator error type.
///
/// Maps to HTTP status codes:
/// - NoCredits: 402 Payment Required
/// - BadRequest: 400 Bad Request
/// - Forbidden: 403 Forbidden
/// - ServiceUnavailable: 503 Service Unavailable
/// - Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("No credits available")]
    NoCredits,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            CoordinatorError::NoCredits => 402,
            CoordinatorError::BadRequest(_) => 400,
            CoordinatorError::Forbidden(_) => 403,
            CoordinatorError::ServiceUnavailable(_) => 503,
            CoordinatorError::Internal(_) => 500,
        }
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            CoordinatorError::NoCredits => (
                StatusCode::PAYMENT_REQUIRED,
                NO_CREDITS_CODE,
                "No credits left. Donate to get another turn.".to_string(),
            ),
            CoordinatorError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            CoordinatorError::Forbidden(reason) => {
                (StatusCode::FORBIDDEN, "FORBIDDEN", reason.clone())
            }
            CoordinatorError::ServiceUnavailable(reason) => {
                tracing::warn!(target: "coordinator.availability", reason = %reason, "Service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                )
            }
            CoordinatorError::Internal(reason) => {
                tracing::error!(target: "coordinator.internal", reason = %reason, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}
