//! Message types for the coordinator actor.
//!
//! All communication with the actor uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Request-reply uses `tokio::sync::oneshot`.

use crate::errors::CoordinatorError;
use common::events::GameEvent;
use common::protocol::JoinResponse;
use common::types::{ParticipantId, QueueSnapshot};
use tokio::sync::oneshot;

/// Messages sent to `CoordinatorActor`.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Enter the queue, or report the current standing if already present.
    Join {
        id: ParticipantId,
        respond_to: oneshot::Sender<Result<JoinResponse, CoordinatorError>>,
    },

    /// Leave the queue or release the active slot. Idempotent.
    Leave {
        id: ParticipantId,
        respond_to: oneshot::Sender<()>,
    },

    /// Publish a game event, gated on the sender for control commands.
    Publish {
        sender: Option<ParticipantId>,
        event: GameEvent,
        respond_to: oneshot::Sender<PublishOutcome>,
    },

    /// A realtime stream carrying this participant's id was opened.
    Connected { id: ParticipantId },

    /// A realtime stream carrying this participant's id was closed.
    Disconnected { id: ParticipantId },

    /// Get the current queue snapshot.
    GetSnapshot {
        respond_to: oneshot::Sender<QueueSnapshot>,
    },
}

/// Result of a publish request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Applied and published.
    Accepted,
    /// Dropped without publishing.
    Discarded(DiscardReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Control command from someone other than the active participant.
    NotActive,
    /// Event reserved for the coordinator's own scene updates.
    Reserved,
}

impl DiscardReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::NotActive => "not_active",
            DiscardReason::Reserved => "reserved",
        }
    }
}
