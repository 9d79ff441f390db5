//! Realtime channel events.
//!
//! Two logical topics share one transport:
//!
//! - `joystick-queue` carries `queue-update` snapshots published by the coordinator.
//! - `joystick-channel` carries game traffic: control commands from the active
//!   participant and scene updates from the coordinator's bridge.
//!
//! Every frame on the wire is an [`Envelope`] `{ channel, event, data }`.

use crate::error::{ProtocolError, Result};
use crate::types::{Direction, Position, QueueSnapshot};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

/// Channel name of the queue topic.
pub const QUEUE_CHANNEL: &str = "joystick-queue";

/// Channel name of the game topic.
pub const GAME_CHANNEL: &str = "joystick-channel";

/// Logical pub/sub topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "joystick-queue")]
    Queue,
    #[serde(rename = "joystick-channel")]
    Game,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::Queue, Topic::Game];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Topic::Queue => QUEUE_CHANNEL,
            Topic::Game => GAME_CHANNEL,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            QUEUE_CHANNEL => Ok(Topic::Queue),
            GAME_CHANNEL => Ok(Topic::Game),
            other => Err(ProtocolError::UnknownChannel(other.to_string())),
        }
    }
}

/// Events on the queue topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum QueueEvent {
    QueueUpdate(QueueSnapshot),
}

impl QueueEvent {
    const NAMES: &'static [&'static str] = &["queue-update"];
}

/// Kind of object placed on the play field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectCategory {
    /// Raises the telemetry value when captured.
    Consumable,
    /// Lowers the telemetry value when captured.
    Obstacle,
}

/// An object on the play field, addressed by its exact device-space coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameObject {
    pub x: i32,
    pub y: i32,
    #[serde(rename = "type")]
    pub category: ObjectCategory,
    pub label: String,
    pub impact: i32,
}

impl GameObject {
    #[must_use]
    pub const fn position(&self) -> Position {
        Position {
            x: self.x,
            y: self.y,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovePayload {
    /// Claw position after the move. Commands from clients may omit it; the
    /// coordinator always fills in its authoritative value when republishing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrabPayload {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claw_x: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claw_y: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinPayload {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectsInitPayload {
    pub objects: Vec<GameObject>,
    /// Authoritative claw position at the time of the snapshot.
    #[serde(default)]
    pub claw: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectGrabbedPayload {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactPayload {
    pub impact: i32,
    pub name: String,
    #[serde(rename = "type")]
    pub category: ObjectCategory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitGamePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Events on the game topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum GameEvent {
    Move(MovePayload),
    Grab(GrabPayload),
    Coin(CoinPayload),
    ObjectsInit(ObjectsInitPayload),
    ObjectGrabbed(ObjectGrabbedPayload),
    BgImpact(ImpactPayload),
    InitGame(InitGamePayload),
}

impl GameEvent {
    const NAMES: &'static [&'static str] = &[
        "move",
        "grab",
        "coin",
        "objects-init",
        "object-grabbed",
        "bg-impact",
        "init-game",
    ];

    /// Whether this event is a control command reserved for the active participant.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        matches!(
            self,
            GameEvent::Move(_) | GameEvent::Grab(_) | GameEvent::Coin(_)
        )
    }

    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            GameEvent::Move(_) => "move",
            GameEvent::Grab(_) => "grab",
            GameEvent::Coin(_) => "coin",
            GameEvent::ObjectsInit(_) => "objects-init",
            GameEvent::ObjectGrabbed(_) => "object-grabbed",
            GameEvent::BgImpact(_) => "bg-impact",
            GameEvent::InitGame(_) => "init-game",
        }
    }
}

/// A decoded realtime frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Queue(QueueEvent),
    Game(GameEvent),
}

/// Untyped realtime frame as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: Topic,
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Wrap a queue event.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Malformed` if the payload cannot be serialized.
    pub fn queue(event: &QueueEvent) -> Result<Self> {
        let (event, data) = split_tagged(serde_json::to_value(event)?)?;
        Ok(Self {
            channel: Topic::Queue,
            event,
            data,
        })
    }

    /// Wrap a game event.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Malformed` if the payload cannot be serialized.
    pub fn game(event: &GameEvent) -> Result<Self> {
        let (event, data) = split_tagged(serde_json::to_value(event)?)?;
        Ok(Self {
            channel: Topic::Game,
            event,
            data,
        })
    }

    /// Decode into a typed event.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownEvent` if the event name is not valid on the channel
    /// - `ProtocolError::Malformed` if the payload does not match the event schema
    pub fn decode(&self) -> Result<ChannelEvent> {
        match self.channel {
            Topic::Queue => {
                decode_tagged(self, QueueEvent::NAMES).map(ChannelEvent::Queue)
            }
            Topic::Game => decode_tagged(self, GameEvent::NAMES).map(ChannelEvent::Game),
        }
    }
}

fn split_tagged(value: Value) -> Result<(String, Value)> {
    let Value::Object(mut map) = value else {
        return Err(ProtocolError::Malformed(
            "tagged event did not serialize to an object".to_string(),
        ));
    };
    let event = match map.remove("event") {
        Some(Value::String(name)) => name,
        _ => {
            return Err(ProtocolError::Malformed(
                "tagged event is missing its name".to_string(),
            ))
        }
    };
    let data = map.remove("data").unwrap_or_else(|| Value::Object(Map::new()));
    Ok((event, data))
}

fn decode_tagged<T: DeserializeOwned>(envelope: &Envelope, names: &[&str]) -> Result<T> {
    if !names.contains(&envelope.event.as_str()) {
        return Err(ProtocolError::UnknownEvent {
            channel: envelope.channel.to_string(),
            event: envelope.event.clone(),
        });
    }
    let data = if envelope.data.is_null() {
        Value::Object(Map::new())
    } else {
        envelope.data.clone()
    };
    Ok(serde_json::from_value(
        json!({ "event": envelope.event, "data": data }),
    )?)
}
