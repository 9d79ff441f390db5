//! Game event ingress.

use crate::actors::{DiscardReason, PublishOutcome};
use crate::errors::CoordinatorError;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use common::events::{ChannelEvent, Envelope, Topic};
use common::protocol::{Ack, SendEventRequest};
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /send-event
///
/// Control commands (`move`, `grab`, `coin`) from anyone but the active
/// participant are dropped without telling the sender; the response is the
/// same 202 either way.
///
/// # Response
///
/// - 202 Accepted
/// - 400 Bad Request for the queue channel, unknown events, malformed
///   payloads, and events only the coordinator may publish
#[instrument(skip_all, name = "coordinator.events.send", fields(event = %request.event))]
pub async fn send_event(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendEventRequest>,
) -> Result<(StatusCode, Json<Ack>), CoordinatorError> {
    if request.channel == Topic::Queue {
        return Err(CoordinatorError::BadRequest(
            "the queue channel cannot be published to".to_string(),
        ));
    }

    let envelope = Envelope {
        channel: request.channel,
        event: request.event,
        data: request.data,
    };
    let event = match envelope.decode() {
        Ok(ChannelEvent::Game(event)) => event,
        Ok(ChannelEvent::Queue(_)) => {
            return Err(CoordinatorError::BadRequest(
                "the queue channel cannot be published to".to_string(),
            ))
        }
        Err(e) => return Err(CoordinatorError::BadRequest(e.to_string())),
    };

    match state.coordinator.publish(request.sender, event).await? {
        PublishOutcome::Accepted | PublishOutcome::Discarded(DiscardReason::NotActive) => {
            Ok((StatusCode::ACCEPTED, Json(Ack {})))
        }
        PublishOutcome::Discarded(DiscardReason::Reserved) => Err(CoordinatorError::BadRequest(
            format!("{} is published by the coordinator only", envelope.event),
        )),
    }
}
