//! Command dispatcher.
//!
//! Turns user input into `move`, `grab` and `coin` events. Every call is a
//! silent no-op unless the session machine currently reports `Active`;
//! nothing is queued for later. Accepted commands go through a single
//! outbox task so they reach the coordinator in the order they were issued.
//! A failed publish is logged and dropped.

use crate::api::CoordinatorApi;
use crate::config::ClientConfig;
use crate::machine::SessionView;
use crate::timer::ScheduledTask;

use common::events::{CoinPayload, GameEvent, GrabPayload, MovePayload};
use common::types::{Direction, ParticipantId, Position};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Commands buffered for the outbox before new ones are dropped.
const OUTBOX_BUFFER: usize = 64;

/// Movement and timing rules of the controls.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub move_step: i32,
    pub move_bound: i32,
    /// Shift from controller space into device space for `grab`.
    pub claw_offset: i32,
    pub hold_repeat: Duration,
    pub grab_dwell: Duration,
}

impl DispatchSettings {
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            move_step: config.move_step,
            move_bound: config.move_bound,
            claw_offset: config.claw_offset,
            hold_repeat: config.hold_repeat,
            grab_dwell: config.grab_dwell,
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

#[derive(Debug, Default)]
struct Controls {
    claw: Position,
    engaged: bool,
    hold: Option<ScheduledTask>,
    release: Option<ScheduledTask>,
}

/// Cloneable front of the controls.
#[derive(Clone)]
pub struct CommandDispatcher {
    session: watch::Receiver<SessionView>,
    settings: Arc<DispatchSettings>,
    controls: Arc<Mutex<Controls>>,
    outbox: mpsc::Sender<GameEvent>,
}

impl CommandDispatcher {
    /// Create the dispatcher and spawn its outbox task.
    ///
    /// The outbox ends when the last dispatcher clone is dropped.
    pub fn spawn(
        api: Arc<dyn CoordinatorApi>,
        session: watch::Receiver<SessionView>,
        settings: DispatchSettings,
    ) -> (Self, JoinHandle<()>) {
        let (outbox, receiver) = mpsc::channel(OUTBOX_BUFFER);
        let task = tokio::spawn(outbox_loop(api, session.clone(), receiver));

        let dispatcher = Self {
            session,
            settings: Arc::new(settings),
            controls: Arc::new(Mutex::new(Controls::default())),
            outbox,
        };
        (dispatcher, task)
    }

    fn is_active(&self) -> bool {
        self.session.borrow().is_active()
    }

    /// Step the claw once. Returns whether a command was sent.
    pub async fn move_claw(&self, direction: Direction) -> bool {
        if !self.is_active() {
            return false;
        }
        let mut controls = self.controls.lock().await;
        self.step(&mut controls, direction)
    }

    fn step(&self, controls: &mut Controls, direction: Direction) -> bool {
        controls.claw = direction.step(
            controls.claw,
            self.settings.move_step,
            self.settings.move_bound,
        );
        self.enqueue(GameEvent::Move(MovePayload {
            position: Some(controls.claw),
            direction,
        }))
    }

    /// Start repeating `direction` while the control is held.
    ///
    /// Moves once immediately, then every `hold_repeat` until
    /// [`hold_stop`](Self::hold_stop) or the session stops being active.
    /// A start while already holding is ignored.
    pub async fn hold_start(&self, direction: Direction) {
        if !self.is_active() {
            return;
        }
        // Check, first move and arming happen under one lock so a concurrent
        // hold_stop either sees the task or runs after it is stored.
        let mut controls = self.controls.lock().await;
        if controls.hold.as_ref().is_some_and(ScheduledTask::is_active) {
            return;
        }
        if !self.is_active() || !self.step(&mut controls, direction) {
            return;
        }

        let dispatcher = self.clone();
        controls.hold = Some(ScheduledTask::every(self.settings.hold_repeat, move || {
            let dispatcher = dispatcher.clone();
            async move {
                if dispatcher.move_claw(direction).await {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(())
                }
            }
        }));
    }

    /// Stop a held control. Safe to call on every exit path, held or not.
    pub async fn hold_stop(&self) {
        if let Some(task) = self.controls.lock().await.hold.take() {
            task.cancel();
        }
    }

    /// Engage the claw at its current position.
    ///
    /// After the dwell time the engaged flag clears. The disengage command is
    /// sent only if the session is still active then; a session that ended
    /// during the dwell gets no release. Returns whether a grab started. A
    /// grab while engaged is ignored.
    pub async fn grab(&self) -> bool {
        if !self.is_active() {
            return false;
        }
        let mut controls = self.controls.lock().await;
        if controls.engaged {
            return false;
        }
        controls.engaged = true;

        let device = controls.claw.offset(self.settings.claw_offset);
        self.enqueue(GameEvent::Grab(GrabPayload {
            active: true,
            claw_x: Some(device.x),
            claw_y: Some(device.y),
        }));

        let dispatcher = self.clone();
        controls.release = Some(ScheduledTask::once(self.settings.grab_dwell, async move {
            dispatcher.release().await;
        }));
        true
    }

    async fn release(&self) {
        let mut controls = self.controls.lock().await;
        controls.engaged = false;
        if self.is_active() {
            let device = controls.claw.offset(self.settings.claw_offset);
            self.enqueue(GameEvent::Grab(GrabPayload {
                active: false,
                claw_x: Some(device.x),
                claw_y: Some(device.y),
            }));
        }
    }

    /// Insert a coin. Returns whether a command was sent.
    pub fn coin(&self) -> bool {
        self.is_active() && self.enqueue(GameEvent::Coin(CoinPayload {}))
    }

    /// Adopt the authoritative claw position from a game event.
    pub async fn observe(&self, event: &GameEvent) {
        let position = match event {
            GameEvent::Move(MovePayload {
                position: Some(position),
                ..
            }) => *position,
            GameEvent::ObjectsInit(payload) => payload.claw,
            _ => return,
        };
        self.controls.lock().await.claw = position;
    }

    pub async fn claw(&self) -> Position {
        self.controls.lock().await.claw
    }

    pub async fn is_engaged(&self) -> bool {
        self.controls.lock().await.engaged
    }

    pub async fn is_holding(&self) -> bool {
        self.controls
            .lock()
            .await
            .hold
            .as_ref()
            .is_some_and(ScheduledTask::is_active)
    }

    fn enqueue(&self, event: GameEvent) -> bool {
        match self.outbox.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "client.dispatcher", error = %e, "Command dropped");
                false
            }
        }
    }
}

/// Publishes commands one at a time, as the participant currently in the view.
async fn outbox_loop(
    api: Arc<dyn CoordinatorApi>,
    session: watch::Receiver<SessionView>,
    mut receiver: mpsc::Receiver<GameEvent>,
) {
    while let Some(event) = receiver.recv().await {
        let sender: Option<ParticipantId> = session.borrow().participant_id.clone();
        match api.send_event(&event, sender.as_ref()).await {
            Ok(()) => debug!(target: "client.dispatcher", event = event.name(), "Command sent"),
            Err(e) => warn!(
                target: "client.dispatcher",
                event = event.name(),
                error = %e,
                "Command not delivered"
            ),
        }
    }
    debug!(target: "client.dispatcher", "Outbox closed");
}
