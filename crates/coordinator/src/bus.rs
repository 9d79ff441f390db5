//! In-process realtime bus.
//!
//! Every frame published by the coordinator goes through one
//! `tokio::sync::broadcast` channel. Each realtime subscriber holds its own
//! receiver and filters by topic. A subscriber that falls more than
//! `capacity` frames behind is disconnected and must resubscribe.

use common::events::{Envelope, GameEvent, QueueEvent};
use common::types::QueueSnapshot;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, trace};

/// Fan-out of realtime frames to all connected subscribers.
#[derive(Clone)]
pub struct ChannelBus {
    sender: broadcast::Sender<Arc<Envelope>>,
}

impl ChannelBus {
    /// Create a bus that buffers up to `capacity` frames per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to all frames published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Envelope>> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish a frame. Returns the number of subscribers it reached.
    ///
    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, envelope: Envelope) -> usize {
        trace!(
            target: "coordinator.bus",
            channel = %envelope.channel,
            event = %envelope.event,
            "Publishing frame"
        );
        self.sender.send(Arc::new(envelope)).unwrap_or(0)
    }

    /// Publish a queue snapshot on the queue topic.
    pub fn publish_snapshot(&self, snapshot: QueueSnapshot) -> usize {
        match Envelope::queue(&QueueEvent::QueueUpdate(snapshot)) {
            Ok(envelope) => self.publish(envelope),
            Err(e) => {
                error!(target: "coordinator.bus", error = %e, "Failed to encode queue update");
                0
            }
        }
    }

    /// Publish a game event on the game topic.
    pub fn publish_game(&self, event: &GameEvent) -> usize {
        match Envelope::game(event) {
            Ok(envelope) => self.publish(envelope),
            Err(e) => {
                error!(
                    target: "coordinator.bus",
                    event = event.name(),
                    error = %e,
                    "Failed to encode game event"
                );
                0
            }
        }
    }
}
