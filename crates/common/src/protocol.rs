//! HTTP request and response bodies of the coordinator API.

use crate::events::Topic;
use crate::types::{ParticipantId, SnapshotKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error code returned when a participant has no unspent credit.
pub const NO_CREDITS_CODE: &str = "NO_CREDITS";

/// Header carrying the shared secret of the payment webhook.
pub const LEDGER_SECRET_HEADER: &str = "x-ledger-secret";

/// `POST /join` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub id: ParticipantId,
}

/// `POST /join` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub success: bool,
    /// Queue rank when waiting; absent when active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    pub active: bool,
    /// Seconds left when active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_seconds: Option<u32>,
    #[serde(default)]
    pub queue_length: usize,
    /// Key of the coordinator state this response reflects.
    pub epoch: String,
    pub seq: u64,
}

impl JoinResponse {
    #[must_use]
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey {
            epoch: self.epoch.clone(),
            seq: self.seq,
        }
    }
}

/// `POST /leave` body. Also accepted as a `text/plain` unload beacon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub id: ParticipantId,
}

/// `POST /send-event` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEventRequest {
    pub channel: Topic,
    pub event: String,
    #[serde(default)]
    pub data: Value,
    /// Participant issuing the event. Required for control commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<ParticipantId>,
}

/// `POST /ledger/credits` body sent by the payment webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantCreditsRequest {
    pub id: ParticipantId,
    pub credits: u32,
}

/// `POST /ledger/credits` response with the new balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantCreditsResponse {
    pub id: ParticipantId,
    pub credits: u32,
}

/// Empty acknowledgement body (`{}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {}

/// Error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}
