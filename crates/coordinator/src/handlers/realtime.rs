//! Realtime subscription over server-sent events.
//!
//! `GET /realtime?channels=joystick-queue,joystick-channel&id=<participant>`
//!
//! Each SSE event is named after the channel event and carries the full
//! envelope `{channel, event, data}` as JSON. Queue subscribers first receive
//! the current snapshot, then every broadcast in order. A subscriber that
//! falls behind the bus buffer is disconnected; clients reconnect and
//! resynchronise.
//!
//! Passing `id` ties the stream to the participant's presence: when the
//! last such stream closes, the disconnect grace period starts.

use crate::actors::CoordinatorHandle;
use crate::bus::ChannelBus;
use crate::errors::CoordinatorError;
use crate::observability::metrics;
use crate::routes::AppState;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use common::events::{Envelope, QueueEvent, Topic};
use common::types::ParticipantId;
use futures::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{instrument, warn};

#[derive(Debug, Deserialize)]
pub struct RealtimeQuery {
    /// Comma-separated channel names. All channels when absent.
    pub channels: Option<String>,
    /// Participant owning this stream.
    pub id: Option<ParticipantId>,
}

/// Handler for GET /realtime
///
/// # Response
///
/// - 200 OK with a `text/event-stream` body
/// - 400 Bad Request for an unknown channel name
#[instrument(skip_all, name = "coordinator.realtime.subscribe")]
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RealtimeQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, CoordinatorError> {
    let topics = parse_channels(query.channels.as_deref())?;

    // Subscribe before reading the snapshot so no broadcast falls in between.
    let receiver = state.bus.subscribe();

    let presence = match query.id.filter(|id| !id.is_blank()) {
        Some(id) => {
            state.coordinator.connected(id.clone()).await?;
            Some((state.coordinator.clone(), id))
        }
        None => None,
    };
    let guard = SubscriptionGuard {
        bus: state.bus.clone(),
        presence,
    };

    let pending = if topics.contains(&Topic::Queue) {
        let snapshot = state.coordinator.snapshot().await?;
        let envelope = Envelope::queue(&QueueEvent::QueueUpdate(snapshot))
            .map_err(|e| CoordinatorError::Internal(format!("snapshot encoding failed: {e}")))?;
        Some(Arc::new(envelope))
    } else {
        None
    };

    metrics::set_realtime_subscribers(state.bus.subscriber_count());
    tracing::debug!(
        target: "coordinator.realtime",
        channels = ?topics,
        subscribers = state.bus.subscriber_count(),
        "Realtime subscriber connected"
    );

    let subscription = Subscription {
        receiver,
        topics,
        pending,
        _guard: guard,
    };

    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        let envelope = subscription.next_frame().await?;
        Some((Ok::<_, Infallible>(to_sse_event(&envelope)), subscription))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn parse_channels(channels: Option<&str>) -> Result<Vec<Topic>, CoordinatorError> {
    let Some(channels) = channels.filter(|c| !c.trim().is_empty()) else {
        return Ok(Topic::ALL.to_vec());
    };

    let mut topics = Vec::new();
    for name in channels.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let topic: Topic = name
            .parse()
            .map_err(|e: common::error::ProtocolError| CoordinatorError::BadRequest(e.to_string()))?;
        if !topics.contains(&topic) {
            topics.push(topic);
        }
    }
    Ok(topics)
}

fn to_sse_event(envelope: &Envelope) -> Event {
    match Event::default().event(&envelope.event).json_data(envelope) {
        Ok(event) => event,
        Err(e) => {
            warn!(target: "coordinator.realtime", error = %e, "Failed to encode realtime frame");
            Event::default().comment("encoding error")
        }
    }
}

/// Fields drop in order, so the receiver is gone before the guard reports.
struct Subscription {
    receiver: broadcast::Receiver<Arc<Envelope>>,
    topics: Vec<Topic>,
    pending: Option<Arc<Envelope>>,
    _guard: SubscriptionGuard,
}

impl Subscription {
    /// Next frame for this subscriber, or `None` when the stream must end.
    async fn next_frame(&mut self) -> Option<Arc<Envelope>> {
        if let Some(envelope) = self.pending.take() {
            return Some(envelope);
        }

        loop {
            match self.receiver.recv().await {
                Ok(envelope) if self.topics.contains(&envelope.channel) => return Some(envelope),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    metrics::record_subscriber_lagged();
                    warn!(
                        target: "coordinator.realtime",
                        skipped,
                        "Realtime subscriber lagged, closing stream"
                    );
                    return None;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Reports the end of a stream when the client goes away.
struct SubscriptionGuard {
    bus: ChannelBus,
    presence: Option<(CoordinatorHandle, ParticipantId)>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some((coordinator, id)) = self.presence.take() {
            coordinator.disconnected(id);
        }
        metrics::set_realtime_subscribers(self.bus.subscriber_count());
        tracing::debug!(target: "coordinator.realtime", "Realtime subscriber disconnected");
    }
}
