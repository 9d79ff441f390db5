//! Common data types for SweetControl components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque, stable identifier of a participant.
///
/// Assigned once on first visit and persisted client-side. The coordinator
/// uses it as the sole key for queue membership and credit debits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap an existing identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty or whitespace only.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Claw position in controller space (origin at the centre of the rig).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    /// The centre of the rig.
    pub const ORIGIN: Position = Position { x: 0, y: 0 };

    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Translate into device space by adding `offset` to both axes.
    #[must_use]
    pub const fn offset(self, offset: i32) -> Self {
        Self {
            x: self.x + offset,
            y: self.y + offset,
        }
    }

    /// Squared euclidean distance to `other`.
    #[must_use]
    pub fn distance_squared(self, other: Position) -> i64 {
        let dx = i64::from(self.x) - i64::from(other.x);
        let dy = i64::from(self.y) - i64::from(other.y);
        dx * dx + dy * dy
    }
}

/// Movement direction of a `move` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Move `from` by `step` in this direction, clamping both axes to `[-bound, bound]`.
    #[must_use]
    pub fn step(self, from: Position, step: i32, bound: i32) -> Position {
        let (dx, dy) = match self {
            Direction::Up => (0, -step),
            Direction::Down => (0, step),
            Direction::Left => (-step, 0),
            Direction::Right => (step, 0),
        };
        Position {
            x: (from.x + dx).clamp(-bound, bound),
            y: (from.y + dy).clamp(-bound, bound),
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

/// One waiting participant in the FIFO queue.
///
/// `position` is the 1-indexed rank among queued (non-active) entries and is
/// recomputed for every broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: ParticipantId,
    pub position: u32,
    pub joined_at: DateTime<Utc>,
}

/// Idempotence key of a snapshot.
///
/// `epoch` identifies the coordinator process, `seq` increases by one for
/// every queue/session mutation within that epoch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub epoch: String,
    pub seq: u64,
}

impl SnapshotKey {
    /// Whether a snapshot with this key should replace state built from `applied`.
    ///
    /// A different epoch always wins: the coordinator restarted and its new
    /// state is the only authority left.
    #[must_use]
    pub fn supersedes(&self, applied: Option<&SnapshotKey>) -> bool {
        match applied {
            None => true,
            Some(applied) if applied.epoch != self.epoch => true,
            Some(applied) => self.seq > applied.seq,
        }
    }
}

/// Authoritative broadcast of queue and session state (`queue-update`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub queue: Vec<QueueEntry>,
    pub active_id: Option<ParticipantId>,
    /// Seconds left in the active session (0 when idle).
    pub remaining: u32,
    /// Length of the active session in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_seconds: Option<u32>,
    pub epoch: String,
    pub seq: u64,
}

impl QueueSnapshot {
    #[must_use]
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey {
            epoch: self.epoch.clone(),
            seq: self.seq,
        }
    }

    /// Queue rank of `id`, if it is waiting.
    #[must_use]
    pub fn position_of(&self, id: &ParticipantId) -> Option<u32> {
        self.queue
            .iter()
            .find(|entry| &entry.id == id)
            .map(|entry| entry.position)
    }

    #[must_use]
    pub fn is_active(&self, id: &ParticipantId) -> bool {
        self.active_id.as_ref() == Some(id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn snapshot(active: Option<&str>, queued: &[&str], seq: u64) -> QueueSnapshot {
        QueueSnapshot {
            queue: queued
                .iter()
                .enumerate()
                .map(|(i, id)| QueueEntry {
                    id: ParticipantId::from(*id),
                    position: u32::try_from(i + 1).unwrap(),
                    joined_at: Utc::now(),
                })
                .collect(),
            active_id: active.map(ParticipantId::from),
            remaining: 10,
            total_seconds: Some(30),
            epoch: "e1".to_string(),
            seq,
        }
    }

    #[test]
    fn test_direction_step_clamps_to_bounds() {
        let pos = Position::new(110, -110);
        assert_eq!(Direction::Right.step(pos, 20, 120), Position::new(120, -110));
        assert_eq!(Direction::Up.step(pos, 20, 120), Position::new(110, -120));
        assert_eq!(Direction::Left.step(pos, 20, 120), Position::new(90, -110));
        assert_eq!(Direction::Down.step(pos, 20, 120), Position::new(110, -90));
    }

    #[test]
    fn test_position_offset_into_device_space() {
        assert_eq!(Position::new(-20, 40).offset(130), Position::new(110, 170));
    }

    #[test]
    fn test_snapshot_key_supersedes() {
        let applied = SnapshotKey {
            epoch: "e1".to_string(),
            seq: 5,
        };
        let older = SnapshotKey {
            epoch: "e1".to_string(),
            seq: 5,
        };
        let newer = SnapshotKey {
            epoch: "e1".to_string(),
            seq: 6,
        };
        let restarted = SnapshotKey {
            epoch: "e2".to_string(),
            seq: 1,
        };

        assert!(newer.supersedes(None));
        assert!(newer.supersedes(Some(&applied)));
        assert!(!older.supersedes(Some(&applied)));
        assert!(restarted.supersedes(Some(&applied)));
    }

    #[test]
    fn test_snapshot_wire_format_is_camel_case() {
        let snap = snapshot(Some("a"), &["b"], 3);
        let json = serde_json::to_value(&snap).unwrap();

        assert_eq!(json["activeId"], "a");
        assert_eq!(json["totalSeconds"], 30);
        assert_eq!(json["queue"][0]["id"], "b");
        assert_eq!(json["queue"][0]["position"], 1);
        assert!(json["queue"][0]["joinedAt"].is_string());
    }

    #[test]
    fn test_snapshot_lookup_helpers() {
        let snap = snapshot(Some("a"), &["b", "c"], 1);
        let c = ParticipantId::from("c");

        assert_eq!(snap.position_of(&c), Some(2));
        assert_eq!(snap.position_of(&ParticipantId::from("a")), None);
        assert!(snap.is_active(&ParticipantId::from("a")));
        assert!(!snap.is_active(&c));
    }

    #[test]
    fn test_participant_id_is_transparent() {
        let id = ParticipantId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        assert!(ParticipantId::from("  ").is_blank());
        assert_ne!(ParticipantId::generate(), ParticipantId::generate());
    }
}
