//! Scene mirror.
//!
//! A passive, local copy of the game topic: the objects on the field, the
//! claw, the grab state, and a telemetry value driven by impacts. It holds no
//! authority; a missed frame is simply overwritten by the next one.

use common::events::{GameEvent, GameObject, ImpactPayload, ObjectCategory};
use common::types::{Direction, Position};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Telemetry value before any impact.
pub const TELEMETRY_START: f64 = 100.0;

/// Lowest value an impact can drive the telemetry to.
pub const TELEMETRY_MIN: f64 = 60.0;

/// Highest value an impact can drive the telemetry to.
pub const TELEMETRY_MAX: f64 = 250.0;

/// Below this the status is `Low`.
pub const LOW_THRESHOLD: f64 = 80.0;

/// Above this the status is `VeryHigh`.
pub const VERY_HIGH_THRESHOLD: f64 = 200.0;

/// How long one impact animates.
pub const IMPACT_ANIMATION: Duration = Duration::from_millis(4000);

/// Samples kept for charting.
pub const HISTORY_LEN: usize = 40;

/// Coarse band of the telemetry value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryStatus {
    Low,
    Normal,
    VeryHigh,
}

impl TelemetryStatus {
    #[must_use]
    pub fn of(value: f64) -> Self {
        if value > VERY_HIGH_THRESHOLD {
            TelemetryStatus::VeryHigh
        } else if value < LOW_THRESHOLD {
            TelemetryStatus::Low
        } else {
            TelemetryStatus::Normal
        }
    }
}

/// Monotonic cubic ease-out from one value to a clamped target.
#[derive(Debug, Clone)]
pub struct Telemetry {
    from: f64,
    target: f64,
    started: Option<Instant>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            from: TELEMETRY_START,
            target: TELEMETRY_START,
            started: None,
        }
    }
}

impl Telemetry {
    /// Value shown at `now`.
    #[must_use]
    pub fn value_at(&self, now: Instant) -> f64 {
        let Some(started) = self.started else {
            return self.target;
        };
        let progress = (now.saturating_duration_since(started).as_secs_f64()
            / IMPACT_ANIMATION.as_secs_f64())
        .min(1.0);
        let eased = 1.0 - (1.0 - progress).powi(3);
        self.from + (self.target - self.from) * eased
    }

    /// Start animating from the current value toward `current + impact`.
    pub fn impact(&mut self, impact: i32, now: Instant) {
        let current = self.value_at(now);
        self.from = current;
        self.target = (current + f64::from(impact)).clamp(TELEMETRY_MIN, TELEMETRY_MAX);
        self.started = Some(now);
    }

    #[must_use]
    pub fn target(&self) -> f64 {
        self.target
    }
}

/// Most recent thing that happened on the field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneAction {
    Moving(Direction),
    Grabbing,
    Released,
    Consumed {
        name: String,
        category: ObjectCategory,
    },
    NewRound,
    Coin,
}

impl fmt::Display for SceneAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneAction::Moving(direction) => write!(f, "Moving {}", direction.as_str()),
            SceneAction::Grabbing => f.write_str("Grabbing"),
            SceneAction::Released => f.write_str("Released"),
            SceneAction::Consumed {
                name,
                category: ObjectCategory::Consumable,
            } => write!(f, "Ate {name}"),
            SceneAction::Consumed {
                name,
                category: ObjectCategory::Obstacle,
            } => write!(f, "Did {name}"),
            SceneAction::NewRound => f.write_str("New round"),
            SceneAction::Coin => f.write_str("Coin inserted"),
        }
    }
}

/// Local copy of the game topic.
#[derive(Debug, Clone, Default)]
pub struct SceneMirror {
    objects: Vec<GameObject>,
    claw: Position,
    grabbing: bool,
    last_action: Option<SceneAction>,
    last_grab: Option<ImpactPayload>,
    telemetry: Telemetry,
    history: VecDeque<f64>,
    rounds: u64,
}

impl SceneMirror {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one game event into the mirror.
    pub fn apply(&mut self, event: &GameEvent, now: Instant) {
        match event {
            GameEvent::ObjectsInit(payload) => {
                self.objects.clone_from(&payload.objects);
                self.claw = payload.claw;
                self.grabbing = false;
                self.rounds += 1;
                self.last_action = Some(SceneAction::NewRound);
            }
            GameEvent::ObjectGrabbed(payload) => {
                let at = Position::new(payload.x, payload.y);
                let before = self.objects.len();
                self.objects.retain(|object| object.position() != at);
                if self.objects.len() == before {
                    debug!(target: "client.mirror", x = at.x, y = at.y, "Grabbed object not in mirror");
                }
            }
            GameEvent::Move(payload) => {
                if let Some(position) = payload.position {
                    self.claw = position;
                }
                self.last_action = Some(SceneAction::Moving(payload.direction));
            }
            GameEvent::Grab(payload) => {
                self.grabbing = payload.active;
                self.last_action = Some(if payload.active {
                    SceneAction::Grabbing
                } else {
                    SceneAction::Released
                });
            }
            GameEvent::BgImpact(payload) => {
                self.telemetry.impact(payload.impact, now);
                self.sample(now);
                self.last_action = Some(SceneAction::Consumed {
                    name: payload.name.clone(),
                    category: payload.category,
                });
                self.last_grab = Some(payload.clone());
            }
            GameEvent::Coin(_) => self.last_action = Some(SceneAction::Coin),
            GameEvent::InitGame(_) => {}
        }
    }

    /// Record the telemetry value at `now` into the bounded history.
    pub fn sample(&mut self, now: Instant) {
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(self.telemetry.value_at(now));
    }

    #[must_use]
    pub fn objects(&self) -> &[GameObject] {
        &self.objects
    }

    #[must_use]
    pub fn claw(&self) -> Position {
        self.claw
    }

    #[must_use]
    pub fn is_grabbing(&self) -> bool {
        self.grabbing
    }

    #[must_use]
    pub fn last_action(&self) -> Option<&SceneAction> {
        self.last_action.as_ref()
    }

    #[must_use]
    pub fn last_grab(&self) -> Option<&ImpactPayload> {
        self.last_grab.as_ref()
    }

    #[must_use]
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    #[must_use]
    pub fn status_at(&self, now: Instant) -> TelemetryStatus {
        TelemetryStatus::of(self.telemetry.value_at(now))
    }

    #[must_use]
    pub fn history(&self) -> &VecDeque<f64> {
        &self.history
    }

    /// Rounds seen since the mirror started.
    #[must_use]
    pub fn rounds(&self) -> u64 {
        self.rounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::events::{GrabPayload, MovePayload, ObjectGrabbedPayload, ObjectsInitPayload};

    fn object(x: i32, y: i32, label: &str) -> GameObject {
        GameObject {
            x,
            y,
            category: ObjectCategory::Consumable,
            label: label.to_string(),
            impact: 40,
        }
    }

    fn impact(value: i32) -> GameEvent {
        GameEvent::BgImpact(ImpactPayload {
            impact: value,
            name: "Donut".to_string(),
            category: ObjectCategory::Consumable,
        })
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_round_init_and_capture_by_exact_position() {
        let now = Instant::now();
        let mut mirror = SceneMirror::new();
        mirror.apply(
            &GameEvent::ObjectsInit(ObjectsInitPayload {
                objects: vec![object(10, 10, "a"), object(10, 11, "b")],
                claw: Position::ORIGIN,
            }),
            now,
        );
        assert_eq!(mirror.objects().len(), 2);
        assert_eq!(mirror.rounds(), 1);

        mirror.apply(
            &GameEvent::ObjectGrabbed(ObjectGrabbedPayload { x: 10, y: 11 }),
            now,
        );
        assert_eq!(mirror.objects(), &[object(10, 10, "a")]);

        // Unknown coordinates change nothing.
        mirror.apply(
            &GameEvent::ObjectGrabbed(ObjectGrabbedPayload { x: 99, y: 99 }),
            now,
        );
        assert_eq!(mirror.objects().len(), 1);
    }

    #[test]
    fn test_move_replaces_claw_and_grab_toggles() {
        let now = Instant::now();
        let mut mirror = SceneMirror::new();

        mirror.apply(
            &GameEvent::Move(MovePayload {
                position: Some(Position::new(40, -20)),
                direction: Direction::Up,
            }),
            now,
        );
        assert_eq!(mirror.claw(), Position::new(40, -20));
        assert_eq!(mirror.last_action().map(ToString::to_string).as_deref(), Some("Moving up"));

        mirror.apply(
            &GameEvent::Grab(GrabPayload {
                active: true,
                claw_x: Some(170),
                claw_y: Some(110),
            }),
            now,
        );
        assert!(mirror.is_grabbing());
        assert_eq!(mirror.last_action(), Some(&SceneAction::Grabbing));

        mirror.apply(
            &GameEvent::Grab(GrabPayload {
                active: false,
                claw_x: None,
                claw_y: None,
            }),
            now,
        );
        assert!(!mirror.is_grabbing());
        assert_eq!(mirror.last_action(), Some(&SceneAction::Released));
    }

    #[test]
    fn test_impact_eases_toward_target() {
        let start = Instant::now();
        let mut mirror = SceneMirror::new();
        mirror.apply(&impact(40), start);

        let telemetry = mirror.telemetry();
        assert!(close(telemetry.target(), 140.0));
        assert!(close(telemetry.value_at(start), 100.0));
        // Cubic ease-out: 1 - 0.5^3 = 0.875 of the way at half time.
        assert!(close(telemetry.value_at(start + Duration::from_millis(2000)), 135.0));
        assert!(close(telemetry.value_at(start + Duration::from_secs(10)), 140.0));

        let mut previous = 100.0;
        for ms in (0..=4000).step_by(250) {
            let value = telemetry.value_at(start + Duration::from_millis(ms));
            assert!(value >= previous);
            previous = value;
        }
        assert_eq!(
            mirror.last_action().map(ToString::to_string).as_deref(),
            Some("Ate Donut")
        );
    }

    #[test]
    fn test_impact_mid_animation_starts_from_current_value() {
        let start = Instant::now();
        let mut telemetry = Telemetry::default();
        telemetry.impact(40, start);

        let later = start + Duration::from_millis(2000);
        telemetry.impact(-100, later);

        assert!(close(telemetry.value_at(later), 135.0));
        assert!(close(telemetry.target(), 60.0));
    }

    #[test]
    fn test_target_is_clamped() {
        let now = Instant::now();
        let mut telemetry = Telemetry::default();
        telemetry.impact(500, now);
        assert!(close(telemetry.target(), TELEMETRY_MAX));

        telemetry.impact(-1000, now + IMPACT_ANIMATION);
        assert!(close(telemetry.target(), TELEMETRY_MIN));
    }

    #[test]
    fn test_status_bands() {
        assert_eq!(TelemetryStatus::of(79.9), TelemetryStatus::Low);
        assert_eq!(TelemetryStatus::of(80.0), TelemetryStatus::Normal);
        assert_eq!(TelemetryStatus::of(200.0), TelemetryStatus::Normal);
        assert_eq!(TelemetryStatus::of(200.1), TelemetryStatus::VeryHigh);

        let mirror = SceneMirror::new();
        assert_eq!(mirror.status_at(Instant::now()), TelemetryStatus::Normal);
    }

    #[test]
    fn test_history_is_bounded() {
        let now = Instant::now();
        let mut mirror = SceneMirror::new();
        for _ in 0..(HISTORY_LEN + 5) {
            mirror.sample(now);
        }
        assert_eq!(mirror.history().len(), HISTORY_LEN);
    }
}
