//! Health check handlers.
//!
//! - `/health`: Liveness probe - returns OK if the process is running
//! - `/ready`: Readiness probe - the coordinator actor is running and the
//!   service has not started shutting down

use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use std::sync::Arc;

/// Liveness probe handler.
///
/// Does NOT check any dependencies.
pub async fn health_check(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.health.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Readiness probe handler.
#[tracing::instrument(skip_all, name = "coordinator.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> StatusCode {
    if !state.health.is_ready() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    // Round-trip through the actor mailbox.
    match state.coordinator.snapshot().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(target: "coordinator.health", error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
