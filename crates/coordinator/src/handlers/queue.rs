//! Queue handlers.
//!
//! - `POST /join` enters the queue or reports the caller's current standing
//! - `POST /leave` releases the caller's place; also the target of the
//!   page-unload beacon, which arrives as `text/plain`

use crate::errors::CoordinatorError;
use crate::routes::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use common::protocol::{Ack, JoinRequest, JoinResponse, LeaveRequest};
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /join
///
/// # Response
///
/// - 200 OK with the caller's standing
/// - 400 Bad Request if the id is blank
/// - 402 Payment Required (`NO_CREDITS`) if the caller has no credit
/// - 503 Service Unavailable if the ledger cannot be reached
#[instrument(skip_all, name = "coordinator.queue.join", fields(participant_id = %request.id))]
pub async fn join(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JoinRequest>,
) -> Result<Json<JoinResponse>, CoordinatorError> {
    let response = state.coordinator.join(request.id).await?;

    tracing::debug!(
        target: "coordinator.handlers",
        active = response.active,
        position = ?response.position,
        seq = response.seq,
        "Join handled"
    );

    Ok(Json(response))
}

/// Handler for POST /leave
///
/// Always answers 200 `{}`. The body is parsed as JSON whatever its
/// Content-Type; an unreadable body is ignored.
#[instrument(skip_all, name = "coordinator.queue.leave")]
pub async fn leave(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Ack>, CoordinatorError> {
    match serde_json::from_slice::<LeaveRequest>(&body) {
        Ok(request) if !request.id.is_blank() => {
            state.coordinator.leave(request.id).await?;
        }
        Ok(_) => {
            tracing::debug!(target: "coordinator.handlers", "Leave without id ignored");
        }
        Err(e) => {
            tracing::debug!(target: "coordinator.handlers", error = %e, "Unreadable leave body ignored");
        }
    }

    Ok(Json(Ack {}))
}
