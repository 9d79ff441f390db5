//! `SessionMachine` - the client's session state machine.
//!
//! One actor per participant owns the [`SessionState`] and is the only
//! place it changes. Inputs arrive from three sources and are applied one at
//! a time:
//!
//! - commands from the [`SessionHandle`] (rejoin, retry, leave, shutdown)
//! - answers of its own `join` calls, run as background tasks
//! - realtime events (snapshots, transport connect/disconnect)
//!
//! Observers read the state through a `watch` channel of [`SessionView`].
//!
//! # Timers
//!
//! The countdown is a [`ScheduledTask`] armed on entering `Active` and
//! cancelled on leaving it. Each arming bumps a generation number so a tick
//! already queued by a cancelled countdown is ignored.

use crate::api::CoordinatorApi;
use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::realtime::RealtimeEvent;
use crate::state::{self, Failure, Phase, SessionState};
use crate::timer::ScheduledTask;

use common::events::{ChannelEvent, QueueEvent};
use common::protocol::JoinResponse;
use common::types::ParticipantId;
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Mailbox size of the session machine.
const SESSION_CHANNEL_BUFFER: usize = 64;

/// Countdown resolution.
const COUNTDOWN_PERIOD: Duration = Duration::from_secs(1);

/// Automatic retries of a failed join before surfacing the error.
const JOIN_RETRIES: u8 = 1;

/// Session machine settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Countdown seed when a join answer reports `active` without `remaining`.
    pub fallback_seconds: u32,
    /// Delay before the automatic join retry.
    pub retry_delay: Duration,
}

impl SessionSettings {
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            fallback_seconds: config.session_unit_seconds,
            ..Self::default()
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            fallback_seconds: 30,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// What observers see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub participant_id: Option<ParticipantId>,
    pub state: SessionState,
    /// Whether the realtime stream is currently up.
    pub realtime_connected: bool,
}

impl SessionView {
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

enum SessionMessage {
    Rejoin,
    Retry,
    Leave { respond_to: oneshot::Sender<()> },
    Shutdown,
    JoinCompleted(Result<JoinResponse, ClientError>),
    RetryJoin,
    Tick { generation: u64 },
}

/// Handle to the `SessionMachine`.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionMessage>,
    view: watch::Receiver<SessionView>,
    cancel_token: CancellationToken,
}

impl SessionHandle {
    /// Current view.
    #[must_use]
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every view change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Wait until the view satisfies `predicate`, checking the current view first.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Internal` if the machine stops first.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&SessionView) -> bool,
    ) -> Result<SessionView, ClientError> {
        let mut view = self.view.clone();
        let matched = view
            .wait_for(|v| predicate(v))
            .await
            .map_err(|e| ClientError::Internal(format!("session machine stopped: {e}")))?;
        Ok(matched.clone())
    }

    /// Start a new join cycle after `Ended` or an error.
    pub async fn rejoin(&self) -> Result<(), ClientError> {
        self.send(SessionMessage::Rejoin).await
    }

    /// Retry after `Error(Transient)`.
    pub async fn retry(&self) -> Result<(), ClientError> {
        self.send(SessionMessage::Retry).await
    }

    /// End the session voluntarily.
    ///
    /// Ends locally right away; the coordinator is notified without waiting
    /// for its answer.
    pub async fn leave(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionMessage::Leave { respond_to: tx }).await?;

        rx.await
            .map_err(|e| ClientError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop the machine, sending a best-effort leave if a session is live.
    ///
    /// Does not wait, so it can run on the way out of the process.
    pub fn shutdown(&self) {
        if let Err(e) = self.sender.try_send(SessionMessage::Shutdown) {
            warn!(target: "client.session", error = %e, "Shutdown not delivered, cancelling");
            self.cancel_token.cancel();
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, message: SessionMessage) -> Result<(), ClientError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| ClientError::Internal(format!("channel send failed: {e}")))
    }
}

/// The `SessionMachine` implementation.
pub struct SessionMachine {
    receiver: mpsc::Receiver<SessionMessage>,
    /// Weak so that the machine stops once every handle is gone.
    sender: mpsc::WeakSender<SessionMessage>,
    realtime: Option<broadcast::Receiver<RealtimeEvent>>,
    cancel_token: CancellationToken,
    settings: SessionSettings,
    api: Arc<dyn CoordinatorApi>,
    me: Option<ParticipantId>,
    state: SessionState,
    realtime_connected: bool,
    view: watch::Sender<SessionView>,
    join_in_flight: bool,
    join_retries_left: u8,
    retry_task: Option<ScheduledTask>,
    countdown: Option<ScheduledTask>,
    countdown_generation: u64,
}

impl SessionMachine {
    /// Spawn the session machine.
    ///
    /// Without a participant id the machine goes straight to `RedirectHome`.
    pub fn spawn(
        participant_id: Option<ParticipantId>,
        api: Arc<dyn CoordinatorApi>,
        realtime: broadcast::Receiver<RealtimeEvent>,
        settings: SessionSettings,
        cancel_token: CancellationToken,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let (view_tx, view_rx) = watch::channel(SessionView {
            participant_id: participant_id.clone(),
            state: SessionState::joining(),
            realtime_connected: false,
        });

        let machine = Self {
            receiver,
            sender: sender.downgrade(),
            realtime: Some(realtime),
            cancel_token: cancel_token.clone(),
            settings,
            api,
            me: participant_id,
            state: SessionState::joining(),
            realtime_connected: false,
            view: view_tx,
            join_in_flight: false,
            join_retries_left: JOIN_RETRIES,
            retry_task: None,
            countdown: None,
            countdown_generation: 0,
        };

        let task_handle = tokio::spawn(machine.run());

        let handle = SessionHandle {
            sender,
            view: view_rx,
            cancel_token,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "client.session", fields(participant_id = ?self.me))]
    async fn run(mut self) {
        info!(target: "client.session", "SessionMachine started");

        if self.me.is_some() {
            self.start_join();
        } else {
            info!(target: "client.session", "No participant identity, redirecting home");
            self.transition(SessionState::redirect_home());
        }

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(target: "client.session", "SessionMachine received cancellation signal");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            if self.handle_message(message).is_break() {
                                break;
                            }
                        }
                        None => {
                            info!(target: "client.session", "SessionMachine channel closed, exiting");
                            break;
                        }
                    }
                }

                event = recv_realtime(&mut self.realtime) => {
                    self.handle_realtime(event);
                }
            }
        }

        self.countdown = None;
        self.retry_task = None;
        info!(
            target: "client.session",
            phase = ?self.state.phase,
            "SessionMachine stopped"
        );
    }

    fn handle_message(&mut self, message: SessionMessage) -> ControlFlow<()> {
        match message {
            SessionMessage::Rejoin => {
                if matches!(self.state.phase, Phase::Ended | Phase::Error(_)) {
                    self.restart_cycle();
                } else {
                    debug!(target: "client.session", phase = ?self.state.phase, "Rejoin ignored");
                }
            }
            SessionMessage::Retry => {
                if self.state.phase == Phase::Error(Failure::Transient) {
                    self.restart_cycle();
                } else {
                    debug!(target: "client.session", phase = ?self.state.phase, "Retry ignored");
                }
            }
            SessionMessage::Leave { respond_to } => {
                if self.state.is_live() {
                    self.send_leave_beacon();
                    self.transition(state::end(&self.state));
                }
                let _ = respond_to.send(());
            }
            SessionMessage::Shutdown => {
                if self.state.is_live() {
                    self.send_leave_beacon();
                    self.transition(state::end(&self.state));
                }
                return ControlFlow::Break(());
            }
            SessionMessage::JoinCompleted(result) => self.handle_join_completed(result),
            SessionMessage::RetryJoin => {
                if self.state.phase == Phase::Joining {
                    self.start_join();
                }
            }
            SessionMessage::Tick { generation } => self.handle_tick(generation),
        }
        ControlFlow::Continue(())
    }

    fn handle_realtime(&mut self, event: Result<RealtimeEvent, RecvError>) {
        match event {
            Ok(RealtimeEvent::Connected) => {
                self.set_connected(true);
                // Broadcasts missed while disconnected are not replayed.
                if self.state.is_live() {
                    self.start_join();
                }
            }
            Ok(RealtimeEvent::Disconnected) => self.set_connected(false),
            Ok(RealtimeEvent::Frame(ChannelEvent::Queue(QueueEvent::QueueUpdate(snapshot)))) => {
                if let Some(me) = &self.me {
                    let next = state::reconcile(&self.state, &snapshot, me);
                    self.transition(next);
                }
            }
            Ok(RealtimeEvent::Frame(ChannelEvent::Game(_))) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(target: "client.session", skipped, "Realtime events lagged, resyncing");
                if self.state.is_live() {
                    self.start_join();
                }
            }
            Err(RecvError::Closed) => {
                warn!(target: "client.session", "Realtime subscriber gone");
                self.realtime = None;
                self.set_connected(false);
            }
        }
    }

    fn handle_join_completed(&mut self, result: Result<JoinResponse, ClientError>) {
        self.join_in_flight = false;

        match result {
            Ok(response) => {
                self.join_retries_left = JOIN_RETRIES;
                let member = response.active || response.position.is_some();
                if self.state.phase == Phase::Ended && member {
                    // Left while this join was on the wire; it may have re-added us.
                    self.send_leave_beacon();
                }
                let next =
                    state::apply_join(&self.state, &response, self.settings.fallback_seconds);
                self.transition(next);
            }
            Err(ClientError::NoCredits) => {
                info!(target: "client.session", "Join rejected: no credits");
                self.transition(state::fail(&self.state, Failure::NoCredits));
            }
            Err(e) => {
                if matches!(self.state.phase, Phase::Queued | Phase::Active) {
                    warn!(target: "client.session", error = %e, "Resync join failed, keeping last known state");
                    return;
                }
                if self.state.phase != Phase::Joining {
                    return;
                }
                if e.is_retryable() && self.join_retries_left > 0 {
                    self.join_retries_left -= 1;
                    warn!(
                        target: "client.session",
                        error = %e,
                        retry_in_ms = self.settings.retry_delay.as_millis(),
                        "Join failed, retrying"
                    );
                    self.schedule_retry();
                    return;
                }
                warn!(target: "client.session", error = %e, "Join failed");
                self.transition(state::fail(&self.state, Failure::Transient));
            }
        }
    }

    fn handle_tick(&mut self, generation: u64) {
        if generation != self.countdown_generation || !self.state.is_active() {
            return;
        }

        let next = state::tick(&self.state);
        if next.remaining == 0 {
            info!(target: "client.session", "Countdown finished, leaving");
            self.send_leave_beacon();
            self.transition(state::end(&next));
        } else {
            self.transition(next);
        }
    }

    fn restart_cycle(&mut self) {
        self.retry_task = None;
        self.join_retries_left = JOIN_RETRIES;
        self.transition(state::restart(&self.state));
        self.start_join();
    }

    /// Issue a `join` unless one is outstanding.
    fn start_join(&mut self) {
        let Some(id) = self.me.clone() else {
            return;
        };
        if self.join_in_flight {
            debug!(target: "client.session", "Join already in flight, dropped");
            return;
        }
        self.join_in_flight = true;

        let api = self.api.clone();
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let result = api.join(&id).await;
            if let Some(sender) = sender.upgrade() {
                let _ = sender.send(SessionMessage::JoinCompleted(result)).await;
            }
        });
    }

    fn schedule_retry(&mut self) {
        let sender = self.sender.clone();
        self.retry_task = Some(ScheduledTask::once(self.settings.retry_delay, async move {
            if let Some(sender) = sender.upgrade() {
                let _ = sender.send(SessionMessage::RetryJoin).await;
            }
        }));
    }

    /// Fire-and-forget `leave`. Failures are left to the coordinator's expiry.
    fn send_leave_beacon(&self) {
        let Some(id) = self.me.clone() else {
            return;
        };
        let api = self.api.clone();
        tokio::spawn(async move {
            if let Err(e) = api.leave(&id).await {
                debug!(target: "client.session", error = %e, "Leave not delivered");
            }
        });
    }

    fn arm_countdown(&mut self) {
        self.countdown_generation += 1;
        let generation = self.countdown_generation;
        let sender = self.sender.clone();

        self.countdown = Some(ScheduledTask::every(COUNTDOWN_PERIOD, move || {
            let sender = sender.clone();
            async move {
                match sender.upgrade() {
                    Some(sender) if sender.send(SessionMessage::Tick { generation }).await.is_ok() => {
                        ControlFlow::Continue(())
                    }
                    _ => ControlFlow::Break(()),
                }
            }
        }));
    }

    /// Replace the state, keeping the countdown in step with `Active`.
    fn transition(&mut self, next: SessionState) {
        if next == self.state {
            return;
        }
        let previous = std::mem::replace(&mut self.state, next);

        match (previous.is_active(), self.state.is_active()) {
            (false, true) => self.arm_countdown(),
            (true, false) => self.countdown = None,
            _ => {}
        }

        if previous.phase != self.state.phase {
            info!(
                target: "client.session",
                from = ?previous.phase,
                to = ?self.state.phase,
                position = ?self.state.position,
                remaining = self.state.remaining,
                seq = ?self.state.applied.as_ref().map(|k| k.seq),
                "Session phase changed"
            );
        }
        self.publish_view();
    }

    fn set_connected(&mut self, connected: bool) {
        if self.realtime_connected != connected {
            self.realtime_connected = connected;
            self.publish_view();
        }
    }

    fn publish_view(&self) {
        self.view.send_replace(SessionView {
            participant_id: self.me.clone(),
            state: self.state.clone(),
            realtime_connected: self.realtime_connected,
        });
    }
}

async fn recv_realtime(
    realtime: &mut Option<broadcast::Receiver<RealtimeEvent>>,
) -> Result<RealtimeEvent, RecvError> {
    match realtime {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::api::mock::MockCoordinatorApi;
    use common::types::QueueSnapshot;

    fn answer(active: bool, position: Option<u32>, remaining: Option<u32>, seq: u64) -> JoinResponse {
        JoinResponse {
            success: true,
            position,
            active,
            remaining,
            total_seconds: remaining,
            queue_length: position.map_or(0, |p| p as usize),
            epoch: "e1".to_string(),
            seq,
        }
    }

    fn update(active: Option<&str>, remaining: u32, seq: u64) -> RealtimeEvent {
        RealtimeEvent::Frame(ChannelEvent::Queue(QueueEvent::QueueUpdate(QueueSnapshot {
            queue: Vec::new(),
            active_id: active.map(Into::into),
            remaining,
            total_seconds: active.map(|_| remaining),
            epoch: "e1".to_string(),
            seq,
        })))
    }

    struct Harness {
        handle: SessionHandle,
        realtime: broadcast::Sender<RealtimeEvent>,
        api: Arc<MockCoordinatorApi>,
        task: JoinHandle<()>,
    }

    fn spawn_machine(api: MockCoordinatorApi, id: Option<&str>) -> Harness {
        let api = Arc::new(api);
        let (realtime, receiver) = broadcast::channel(16);
        let (handle, task) = SessionMachine::spawn(
            id.map(Into::into),
            api.clone(),
            receiver,
            SessionSettings::default(),
            CancellationToken::new(),
        );
        Harness {
            handle,
            realtime,
            api,
            task,
        }
    }

    async fn wait_phase(handle: &SessionHandle, phase: Phase) -> SessionView {
        handle.wait_for(|v| v.phase() == phase).await.unwrap()
    }

    async fn wait_leaves(api: &MockCoordinatorApi, count: usize) {
        for _ in 0..100 {
            if api.leave_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} leave calls, saw {}", api.leave_count());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_identity_redirects_home() {
        let h = spawn_machine(MockCoordinatorApi::new(), None);

        wait_phase(&h.handle, Phase::RedirectHome).await;
        assert_eq!(h.api.join_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_join_seeds_countdown_and_expiry_leaves() {
        let api = MockCoordinatorApi::new();
        api.push_join(Ok(answer(true, None, Some(3), 1)));
        let h = spawn_machine(api, Some("me"));

        let view = wait_phase(&h.handle, Phase::Active).await;
        assert_eq!(view.state.remaining, 3);

        wait_phase(&h.handle, Phase::Ended).await;
        wait_leaves(&h.api, 1).await;
        assert_eq!(h.handle.view().state.remaining, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_join_without_remaining_uses_fallback() {
        let api = MockCoordinatorApi::new();
        api.push_join(Ok(answer(true, None, None, 1)));
        let h = spawn_machine(api, Some("me"));

        let view = wait_phase(&h.handle, Phase::Active).await;
        assert_eq!(view.state.remaining, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_promotes_queued_participant() {
        let api = MockCoordinatorApi::new();
        api.push_join(Ok(answer(false, Some(1), None, 2)));
        let h = spawn_machine(api, Some("me"));

        let view = wait_phase(&h.handle, Phase::Queued).await;
        assert_eq!(view.state.position, Some(1));

        h.realtime.send(update(Some("me"), 20, 3)).unwrap();
        let view = wait_phase(&h.handle, Phase::Active).await;
        assert!(view.state.remaining > 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_promotion_keeps_countdown() {
        let api = MockCoordinatorApi::new();
        api.push_join(Ok(answer(true, None, Some(20), 1)));
        let h = spawn_machine(api, Some("me"));
        wait_phase(&h.handle, Phase::Active).await;

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(h.handle.view().state.remaining, 18);

        h.realtime.send(update(Some("me"), 20, 2)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let view = h.handle.view();
        assert_eq!(view.phase(), Phase::Active);
        assert_eq!(view.state.remaining, 18);
        assert_eq!(view.state.applied.unwrap().seq, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_ending_session_sends_no_leave() {
        let api = MockCoordinatorApi::new();
        api.push_join(Ok(answer(true, None, Some(20), 1)));
        let h = spawn_machine(api, Some("me"));
        wait_phase(&h.handle, Phase::Active).await;

        h.realtime.send(update(Some("someone-else"), 30, 2)).unwrap();
        wait_phase(&h.handle, Phase::Ended).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.api.leave_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_credits_is_terminal_error() {
        let api = MockCoordinatorApi::new();
        api.push_join(Err(ClientError::NoCredits));
        let h = spawn_machine(api, Some("me"));

        wait_phase(&h.handle, Phase::Error(Failure::NoCredits)).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.api.join_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retries_once_then_surfaces() {
        let api = MockCoordinatorApi::new();
        api.push_join(Err(ClientError::Transient("down".to_string())));
        let h = spawn_machine(api, Some("me"));

        wait_phase(&h.handle, Phase::Error(Failure::Transient)).await;
        assert_eq!(h.api.join_count(), 2);

        h.api.push_join(Ok(answer(false, Some(3), None, 7)));
        h.handle.retry().await.unwrap();
        let view = wait_phase(&h.handle, Phase::Queued).await;
        assert_eq!(view.state.position, Some(3));
        assert_eq!(h.api.join_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_joins_are_dropped() {
        let api = MockCoordinatorApi::new();
        api.set_join_delay(Duration::from_secs(1));
        api.push_join(Ok(answer(false, Some(1), None, 1)));
        let h = spawn_machine(api, Some("me"));

        h.realtime.send(RealtimeEvent::Connected).unwrap();
        h.realtime.send(RealtimeEvent::Connected).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.api.join_count(), 1);

        wait_phase(&h.handle, Phase::Queued).await;

        // A reconnect after the answer resyncs with a fresh join.
        h.realtime.send(RealtimeEvent::Connected).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.api.join_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_resync_keeps_last_known_state() {
        let api = MockCoordinatorApi::new();
        api.push_join(Ok(answer(false, Some(2), None, 1)));
        api.push_join(Err(ClientError::Transient("down".to_string())));
        let h = spawn_machine(api, Some("me"));
        wait_phase(&h.handle, Phase::Queued).await;

        h.realtime.send(RealtimeEvent::Connected).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        let view = h.handle.view();
        assert_eq!(view.phase(), Phase::Queued);
        assert_eq!(view.state.position, Some(2));
        assert!(view.realtime_connected);
        assert_eq!(h.api.join_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_join_answer_loses_to_newer_snapshot() {
        let api = MockCoordinatorApi::new();
        api.set_join_delay(Duration::from_secs(1));
        api.push_join(Ok(answer(false, Some(1), None, 2)));
        let h = spawn_machine(api, Some("me"));

        h.realtime.send(update(Some("me"), 30, 5)).unwrap();
        wait_phase(&h.handle, Phase::Active).await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let view = h.handle.view();
        assert_eq!(view.phase(), Phase::Active);
        assert_eq!(view.state.applied.unwrap().seq, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_ends_and_notifies_coordinator() {
        let api = MockCoordinatorApi::new();
        api.push_join(Ok(answer(true, None, Some(60), 1)));
        let h = spawn_machine(api, Some("me"));
        wait_phase(&h.handle, Phase::Active).await;

        h.handle.leave().await.unwrap();
        assert_eq!(h.handle.view().phase(), Phase::Ended);
        wait_leaves(&h.api, 1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_after_end() {
        let api = MockCoordinatorApi::new();
        api.push_join(Ok(answer(true, None, Some(60), 1)));
        let h = spawn_machine(api, Some("me"));
        wait_phase(&h.handle, Phase::Active).await;
        h.handle.leave().await.unwrap();

        h.api.push_join(Ok(answer(false, Some(1), None, 4)));
        h.handle.rejoin().await.unwrap();

        wait_phase(&h.handle, Phase::Queued).await;
        assert_eq!(h.api.join_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_overtaking_own_leave_still_ends() {
        let api = MockCoordinatorApi::new();
        api.push_join(Ok(answer(true, None, Some(60), 1)));
        let h = spawn_machine(api, Some("me"));
        wait_phase(&h.handle, Phase::Active).await;
        h.handle.leave().await.unwrap();

        // The rejoin is answered with the standing from before the leave.
        h.api.push_join(Ok(answer(true, None, Some(60), 1)));
        h.handle.rejoin().await.unwrap();
        wait_phase(&h.handle, Phase::Active).await;

        // The leave commits afterwards.
        h.realtime.send(update(None, 0, 2)).unwrap();
        wait_phase(&h.handle, Phase::Ended).await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.handle.view().phase(), Phase::Ended);
        assert_eq!(h.api.join_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_sends_beacon_and_stops() {
        let api = MockCoordinatorApi::new();
        api.push_join(Ok(answer(false, Some(1), None, 1)));
        let h = spawn_machine(api, Some("me"));
        wait_phase(&h.handle, Phase::Queued).await;

        h.handle.shutdown();
        h.task.await.unwrap();
        wait_leaves(&h.api, 1).await;
    }
}
