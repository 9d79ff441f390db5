//! Scene bridge between control commands and the play field.
//!
//! The coordinator owns the authoritative claw position and the objects of
//! the current round. Accepted control commands are applied here and turned
//! into the scene events that are published on the game topic.
//!
//! Coordinates:
//!
//! - Controller space: claw position relative to the centre of the rig,
//!   clamped to `±move_bound` on both axes.
//! - Device space: controller space shifted by `claw_offset`. Objects are
//!   placed and captured in device space.

use common::events::{
    CoinPayload, GameEvent, GameObject, GrabPayload, ImpactPayload, MovePayload, ObjectCategory,
    ObjectGrabbedPayload, ObjectsInitPayload,
};
use common::types::Position;
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use tracing::{debug, info};

/// Consumables raise the telemetry value, obstacles lower it.
const CATALOG: &[(&str, ObjectCategory, i32)] = &[
    ("Donut", ObjectCategory::Consumable, 45),
    ("Soda", ObjectCategory::Consumable, 35),
    ("Candy bar", ObjectCategory::Consumable, 30),
    ("Pizza slice", ObjectCategory::Consumable, 25),
    ("Ice cream", ObjectCategory::Consumable, 40),
    ("Fries", ObjectCategory::Consumable, 20),
    ("Running", ObjectCategory::Obstacle, -35),
    ("Cycling", ObjectCategory::Obstacle, -30),
    ("Swimming", ObjectCategory::Obstacle, -40),
    ("Yoga", ObjectCategory::Obstacle, -15),
    ("Walking", ObjectCategory::Obstacle, -20),
    ("Jump rope", ObjectCategory::Obstacle, -25),
];

/// Geometry of the play field.
#[derive(Debug, Clone)]
pub struct SceneSettings {
    /// Controller-space distance of one move.
    pub move_step: i32,
    /// Claw position is clamped to `±move_bound` on both axes.
    pub move_bound: i32,
    /// Shift from controller space into device space.
    pub claw_offset: i32,
    /// Maximum device-space distance between claw and a captured object.
    pub capture_radius: i32,
    /// Objects placed per round.
    pub object_count: usize,
}

impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            move_step: 20,
            move_bound: 120,
            claw_offset: 130,
            capture_radius: 16,
            object_count: 12,
        }
    }
}

impl SceneSettings {
    /// Device-space coordinates reachable by the claw on one axis.
    fn grid_axis(&self) -> Vec<i32> {
        let step = usize::try_from(self.move_step.max(1)).unwrap_or(1);
        (-self.move_bound..=self.move_bound)
            .step_by(step)
            .map(|c| c + self.claw_offset)
            .collect()
    }
}

/// Authoritative play field state.
pub struct Scene {
    settings: SceneSettings,
    claw: Position,
    objects: Vec<GameObject>,
    round: u64,
    rng: StdRng,
}

impl Scene {
    #[must_use]
    pub fn new(settings: SceneSettings) -> Self {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    /// Scene with deterministic object placement.
    #[must_use]
    pub fn with_seed(settings: SceneSettings, seed: u64) -> Self {
        Self::with_rng(settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(settings: SceneSettings, rng: StdRng) -> Self {
        Self {
            settings,
            claw: Position::ORIGIN,
            objects: Vec::new(),
            round: 0,
            rng,
        }
    }

    #[must_use]
    pub fn claw(&self) -> Position {
        self.claw
    }

    #[must_use]
    pub fn objects(&self) -> &[GameObject] {
        &self.objects
    }

    /// Number of rounds started so far.
    #[must_use]
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Start a new round: re-centre the claw and place fresh objects on
    /// distinct grid cells. Returns the `objects-init` event to publish.
    pub fn new_round(&mut self) -> GameEvent {
        let axis = self.settings.grid_axis();
        let cells = axis.len() * axis.len();
        let count = self.settings.object_count.min(cells);

        let picks = index::sample(&mut self.rng, cells, count);
        let mut objects = Vec::with_capacity(count);
        for cell in picks.iter() {
            let (Some(&x), Some(&y)) = (axis.get(cell % axis.len()), axis.get(cell / axis.len()))
            else {
                continue;
            };
            let Some(&(name, category, impact)) = CATALOG.choose(&mut self.rng) else {
                continue;
            };
            objects.push(GameObject {
                x,
                y,
                category,
                label: format!("{name} ({impact:+})"),
                impact,
            });
        }

        self.objects = objects;
        self.claw = Position::ORIGIN;
        self.round += 1;

        info!(
            target: "coordinator.scene",
            round = self.round,
            objects = self.objects.len(),
            "New round initialized"
        );

        self.objects_init()
    }

    /// Current objects and claw as an `objects-init` event, without resetting.
    #[must_use]
    pub fn objects_init(&self) -> GameEvent {
        GameEvent::ObjectsInit(ObjectsInitPayload {
            objects: self.objects.clone(),
            claw: self.claw,
        })
    }

    /// Apply an accepted event and return the events to publish, in order.
    ///
    /// Events originated by the coordinator itself (`objects-init`,
    /// `object-grabbed`, `bg-impact`) produce nothing.
    pub fn apply(&mut self, event: GameEvent) -> Vec<GameEvent> {
        match event {
            GameEvent::Move(payload) => {
                self.claw = payload.direction.step(
                    self.claw,
                    self.settings.move_step,
                    self.settings.move_bound,
                );
                vec![GameEvent::Move(MovePayload {
                    position: Some(self.claw),
                    direction: payload.direction,
                })]
            }
            GameEvent::Grab(payload) if payload.active => self.grab(),
            GameEvent::Grab(_) => vec![GameEvent::Grab(GrabPayload {
                active: false,
                claw_x: None,
                claw_y: None,
            })],
            GameEvent::Coin(_) => vec![GameEvent::Coin(CoinPayload {}), self.new_round()],
            GameEvent::InitGame(_) => {
                if self.round == 0 {
                    vec![self.new_round()]
                } else {
                    vec![self.objects_init()]
                }
            }
            GameEvent::ObjectsInit(_) | GameEvent::ObjectGrabbed(_) | GameEvent::BgImpact(_) => {
                Vec::new()
            }
        }
    }

    fn grab(&mut self) -> Vec<GameEvent> {
        let claw = self.claw.offset(self.settings.claw_offset);
        let mut events = vec![GameEvent::Grab(GrabPayload {
            active: true,
            claw_x: Some(claw.x),
            claw_y: Some(claw.y),
        })];

        let radius = i64::from(self.settings.capture_radius);
        let nearest = self
            .objects
            .iter()
            .enumerate()
            .map(|(i, object)| (i, object.position().distance_squared(claw)))
            .filter(|(_, distance)| *distance <= radius * radius)
            .min_by_key(|(_, distance)| *distance)
            .map(|(i, _)| i);

        let Some(index) = nearest else {
            debug!(target: "coordinator.scene", claw_x = claw.x, claw_y = claw.y, "Grab missed");
            return events;
        };

        let captured = self.objects.remove(index);
        info!(
            target: "coordinator.scene",
            label = %captured.label,
            x = captured.x,
            y = captured.y,
            remaining = self.objects.len(),
            "Object captured"
        );

        events.push(GameEvent::ObjectGrabbed(ObjectGrabbedPayload {
            x: captured.x,
            y: captured.y,
        }));
        events.push(GameEvent::BgImpact(ImpactPayload {
            impact: captured.impact,
            name: captured.label,
            category: captured.category,
        }));

        if self.objects.is_empty() {
            events.push(self.new_round());
        }
        events
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use common::events::InitGamePayload;
    use common::types::Direction;
    use std::collections::HashSet;

    fn move_cmd(direction: Direction) -> GameEvent {
        GameEvent::Move(MovePayload {
            position: None,
            direction,
        })
    }

    fn grab_cmd() -> GameEvent {
        GameEvent::Grab(GrabPayload {
            active: true,
            claw_x: None,
            claw_y: None,
        })
    }

    #[test]
    fn test_new_round_places_objects_on_distinct_cells() {
        let mut scene = Scene::with_seed(
            SceneSettings {
                object_count: 100,
                ..SceneSettings::default()
            },
            7,
        );
        scene.new_round();

        let cells: HashSet<(i32, i32)> = scene.objects().iter().map(|o| (o.x, o.y)).collect();
        assert_eq!(scene.objects().len(), 100);
        assert_eq!(cells.len(), 100);
        for object in scene.objects() {
            assert!((10..=250).contains(&object.x));
            assert!((10..=250).contains(&object.y));
            assert_eq!((object.x - 10) % 20, 0);
        }
    }

    #[test]
    fn test_object_count_is_capped_by_grid() {
        let mut scene = Scene::with_seed(
            SceneSettings {
                object_count: 1000,
                ..SceneSettings::default()
            },
            1,
        );
        scene.new_round();
        assert_eq!(scene.objects().len(), 169);
    }

    #[test]
    fn test_move_is_stepped_and_clamped() {
        let mut scene = Scene::with_seed(SceneSettings::default(), 1);

        let events = scene.apply(move_cmd(Direction::Right));
        assert_eq!(
            events,
            vec![GameEvent::Move(MovePayload {
                position: Some(Position::new(20, 0)),
                direction: Direction::Right,
            })]
        );

        for _ in 0..10 {
            scene.apply(move_cmd(Direction::Up));
        }
        assert_eq!(scene.claw(), Position::new(20, -120));
    }

    #[test]
    fn test_grab_captures_object_under_claw() {
        let mut scene = Scene::with_seed(SceneSettings::default(), 3);
        scene.new_round();
        let target = scene.objects()[0].clone();

        // Walk the claw onto the target's cell.
        let dx = (target.x - 130) / 20;
        let dy = (target.y - 130) / 20;
        let horizontal = if dx >= 0 { Direction::Right } else { Direction::Left };
        let vertical = if dy >= 0 { Direction::Down } else { Direction::Up };
        for _ in 0..dx.abs() {
            scene.apply(move_cmd(horizontal));
        }
        for _ in 0..dy.abs() {
            scene.apply(move_cmd(vertical));
        }

        let events = scene.apply(grab_cmd());
        assert_eq!(
            events[0],
            GameEvent::Grab(GrabPayload {
                active: true,
                claw_x: Some(target.x),
                claw_y: Some(target.y),
            })
        );
        assert_eq!(
            events[1],
            GameEvent::ObjectGrabbed(ObjectGrabbedPayload {
                x: target.x,
                y: target.y,
            })
        );
        assert_eq!(
            events[2],
            GameEvent::BgImpact(ImpactPayload {
                impact: target.impact,
                name: target.label.clone(),
                category: target.category,
            })
        );
        assert!(!scene
            .objects()
            .iter()
            .any(|o| o.x == target.x && o.y == target.y));
    }

    #[test]
    fn test_grab_miss_only_echoes_grab() {
        let mut scene = Scene::with_seed(
            SceneSettings {
                object_count: 0,
                ..SceneSettings::default()
            },
            3,
        );
        scene.new_round();

        let events = scene.apply(grab_cmd());
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], GameEvent::Grab(GrabPayload { active: true, .. })));
    }

    #[test]
    fn test_capturing_last_object_starts_new_round() {
        let mut scene = Scene::with_seed(
            SceneSettings {
                object_count: 1,
                ..SceneSettings::default()
            },
            11,
        );
        scene.new_round();
        // Place the only object under the centred claw.
        scene.objects[0].x = 130;
        scene.objects[0].y = 130;

        let events = scene.apply(grab_cmd());
        assert_eq!(events.len(), 4);
        assert!(matches!(events[3], GameEvent::ObjectsInit(_)));
        assert_eq!(scene.round(), 2);
        assert_eq!(scene.objects().len(), 1);
    }

    #[test]
    fn test_coin_resets_round_and_claw() {
        let mut scene = Scene::with_seed(SceneSettings::default(), 5);
        scene.new_round();
        scene.apply(move_cmd(Direction::Left));

        let events = scene.apply(GameEvent::Coin(CoinPayload {}));
        assert_eq!(events[0], GameEvent::Coin(CoinPayload {}));
        assert!(matches!(
            &events[1],
            GameEvent::ObjectsInit(payload) if payload.claw == Position::ORIGIN
        ));
        assert_eq!(scene.round(), 2);
    }

    #[test]
    fn test_init_game_replays_without_reset() {
        let mut scene = Scene::with_seed(SceneSettings::default(), 5);

        // First request starts the first round.
        scene.apply(GameEvent::InitGame(InitGamePayload::default()));
        assert_eq!(scene.round(), 1);
        let objects = scene.objects().to_vec();

        scene.apply(move_cmd(Direction::Down));
        let events = scene.apply(GameEvent::InitGame(InitGamePayload::default()));

        assert_eq!(scene.round(), 1);
        assert_eq!(
            events,
            vec![GameEvent::ObjectsInit(ObjectsInitPayload {
                objects,
                claw: Position::new(0, 20),
            })]
        );
    }

    #[test]
    fn test_reserved_events_produce_nothing() {
        let mut scene = Scene::with_seed(SceneSettings::default(), 5);
        let events = scene.apply(GameEvent::ObjectGrabbed(ObjectGrabbedPayload { x: 1, y: 2 }));
        assert!(events.is_empty());
    }
}
