//! Payment webhook.
//!
//! The payment provider posts confirmed purchases to `POST /ledger/credits`
//! with the shared secret in the `x-ledger-secret` header. The endpoint is
//! disabled (403) when no secret is configured.

use crate::errors::CoordinatorError;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use common::protocol::{GrantCreditsRequest, GrantCreditsResponse, LEDGER_SECRET_HEADER};
use ring::hmac;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /ledger/credits
///
/// # Response
///
/// - 200 OK with the new balance
/// - 400 Bad Request for a blank id or zero credits
/// - 403 Forbidden when the secret is missing, wrong, or not configured
#[instrument(skip_all, name = "coordinator.ledger.grant", fields(participant_id = %request.id))]
pub async fn grant_credits(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<GrantCreditsRequest>,
) -> Result<Json<GrantCreditsResponse>, CoordinatorError> {
    let Some(expected) = state.config.ledger_webhook_secret.as_ref() else {
        return Err(CoordinatorError::Forbidden(
            "ledger webhook is disabled".to_string(),
        ));
    };

    let provided = headers
        .get(LEDGER_SECRET_HEADER)
        .map(|value| value.as_bytes())
        .unwrap_or_default();
    if !secrets_match(expected.expose_secret().as_bytes(), provided) {
        tracing::warn!(target: "coordinator.ledger", "Webhook rejected: invalid secret");
        return Err(CoordinatorError::Forbidden(
            "invalid webhook secret".to_string(),
        ));
    }

    if request.id.is_blank() || request.credits == 0 {
        return Err(CoordinatorError::BadRequest(
            "id and a positive credit amount are required".to_string(),
        ));
    }

    let balance = state.ledger.grant(&request.id, request.credits).await?;

    Ok(Json(GrantCreditsResponse {
        id: request.id,
        credits: balance,
    }))
}

/// Constant-time comparison: both secrets key an HMAC over the same message
/// and the tags are compared with `hmac::verify`.
fn secrets_match(expected: &[u8], provided: &[u8]) -> bool {
    const MESSAGE: &[u8] = b"ledger-webhook";
    let expected_tag = hmac::sign(&hmac::Key::new(hmac::HMAC_SHA256, expected), MESSAGE);
    let provided_key = hmac::Key::new(hmac::HMAC_SHA256, provided);
    hmac::verify(&provided_key, MESSAGE, expected_tag.as_ref()).is_ok()
}
