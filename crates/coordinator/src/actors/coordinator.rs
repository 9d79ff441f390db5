//! `CoordinatorActor` - single owner of the queue and the active session.
//!
//! Every mutation goes through the actor's mailbox, so joins, leaves,
//! expiries and evictions are applied one at a time and each one is followed
//! by exactly one `queue-update` broadcast carrying the next sequence number.
//!
//! # Session lifecycle
//!
//! 1. `join` checks the ledger and appends the participant to the queue
//! 2. When the slot is free, the head of the queue is promoted and debited
//!    `min(balance, max_credits_per_session)` credits
//! 3. The session ends at its deadline, on `leave`, or never through
//!    presence (the deadline is the backstop for a vanished driver)
//!
//! # Presence
//!
//! Realtime streams opened with a participant id report connect and
//! disconnect. A queued participant that stays disconnected longer than the
//! grace period is evicted.

use crate::bus::ChannelBus;
use crate::config::Config;
use crate::errors::CoordinatorError;
use crate::observability::metrics;
use crate::scene::Scene;
use crate::services::CreditLedger;

use super::messages::{CoordinatorMessage, DiscardReason, PublishOutcome};

use chrono::{DateTime, Utc};
use common::events::GameEvent;
use common::protocol::JoinResponse;
use common::types::{ParticipantId, QueueEntry, QueueSnapshot};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the coordinator mailbox.
const COORDINATOR_CHANNEL_BUFFER: usize = 500;

/// How often presence eviction and deferred promotion are checked.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

/// Session and presence rules.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Identifies this coordinator lifetime. Sequence numbers restart with it.
    pub epoch: String,
    pub session_unit_seconds: u32,
    pub max_credits_per_session: u32,
    pub disconnect_grace: Duration,
}

impl CoordinatorSettings {
    /// Settings for a fresh coordinator lifetime.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            epoch: uuid::Uuid::new_v4().to_string(),
            session_unit_seconds: config.session_unit_seconds,
            max_credits_per_session: config.max_credits_per_session,
            disconnect_grace: Duration::from_secs(config.disconnect_grace_seconds),
        }
    }
}

/// Handle to the `CoordinatorActor`.
#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
}

impl CoordinatorHandle {
    /// Join the queue.
    pub async fn join(&self, id: ParticipantId) -> Result<JoinResponse, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::Join { id, respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))?
    }

    /// Leave the queue or release the active slot.
    pub async fn leave(&self, id: ParticipantId) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::Leave { id, respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Publish a game event on behalf of `sender`.
    pub async fn publish(
        &self,
        sender: Option<ParticipantId>,
        event: GameEvent,
    ) -> Result<PublishOutcome, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::Publish {
            sender,
            event,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Report a realtime stream opened by `id`.
    pub async fn connected(&self, id: ParticipantId) -> Result<(), CoordinatorError> {
        self.send(CoordinatorMessage::Connected { id }).await
    }

    /// Report a realtime stream closed by `id`.
    ///
    /// Does not wait, so it can be called from `Drop`.
    pub fn disconnected(&self, id: ParticipantId) {
        if let Err(e) = self
            .sender
            .try_send(CoordinatorMessage::Disconnected { id })
        {
            warn!(
                target: "coordinator.actor",
                error = %e,
                "Failed to report realtime disconnect"
            );
        }
    }

    /// Get the current queue snapshot.
    pub async fn snapshot(&self) -> Result<QueueSnapshot, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::GetSnapshot { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, message: CoordinatorMessage) -> Result<(), CoordinatorError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))
    }
}

#[derive(Debug)]
struct Waiting {
    id: ParticipantId,
    joined_at: DateTime<Utc>,
}

#[derive(Debug)]
struct ActiveSession {
    id: ParticipantId,
    total_seconds: u32,
    expires_at: Instant,
}

/// What a promotion attempt did to the queue and session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Promotion {
    Unchanged,
    /// Heads without credit were dropped but nobody was promoted.
    Skipped,
    Promoted,
}

#[derive(Debug, Default)]
struct Presence {
    streams: usize,
    disconnected_at: Option<Instant>,
}

/// The `CoordinatorActor` implementation.
pub struct CoordinatorActor {
    receiver: mpsc::Receiver<CoordinatorMessage>,
    cancel_token: CancellationToken,
    settings: CoordinatorSettings,
    ledger: Arc<dyn CreditLedger>,
    bus: ChannelBus,
    scene: Scene,
    /// Waiting participants, head first.
    queue: VecDeque<Waiting>,
    session: Option<ActiveSession>,
    presence: HashMap<ParticipantId, Presence>,
    /// Sequence number of the last committed snapshot.
    seq: u64,
    messages_processed: u64,
}

impl CoordinatorActor {
    /// Spawn the coordinator actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        settings: CoordinatorSettings,
        ledger: Arc<dyn CreditLedger>,
        bus: ChannelBus,
        scene: Scene,
        cancel_token: CancellationToken,
    ) -> (CoordinatorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            settings,
            ledger,
            bus,
            scene,
            queue: VecDeque::new(),
            session: None,
            presence: HashMap::new(),
            seq: 0,
            messages_processed: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = CoordinatorHandle {
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "coordinator.actor", fields(epoch = %self.settings.epoch))]
    async fn run(mut self) {
        info!(target: "coordinator.actor", "CoordinatorActor started");

        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.session.as_ref().map(|s| s.expires_at);

            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(target: "coordinator.actor", "CoordinatorActor received cancellation signal");
                    break;
                }

                () = sleep_until_deadline(deadline) => {
                    self.handle_expiry().await;
                }

                _ = housekeeping.tick() => {
                    self.housekeeping().await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.messages_processed += 1;
                        }
                        None => {
                            info!(target: "coordinator.actor", "CoordinatorActor channel closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "coordinator.actor",
            queued = self.queue.len(),
            seq = self.seq,
            messages_processed = self.messages_processed,
            "CoordinatorActor stopped"
        );
    }

    async fn handle_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::Join { id, respond_to } => {
                let result = self.handle_join(id).await;
                let _ = respond_to.send(result);
            }
            CoordinatorMessage::Leave { id, respond_to } => {
                self.handle_leave(&id).await;
                let _ = respond_to.send(());
            }
            CoordinatorMessage::Publish {
                sender,
                event,
                respond_to,
            } => {
                let outcome = self.handle_publish(sender.as_ref(), event);
                let _ = respond_to.send(outcome);
            }
            CoordinatorMessage::Connected { id } => {
                let presence = self.presence.entry(id).or_default();
                presence.streams += 1;
                presence.disconnected_at = None;
            }
            CoordinatorMessage::Disconnected { id } => {
                if let Some(presence) = self.presence.get_mut(&id) {
                    presence.streams = presence.streams.saturating_sub(1);
                    if presence.streams == 0 {
                        presence.disconnected_at = Some(Instant::now());
                        debug!(
                            target: "coordinator.actor",
                            participant_id = %id,
                            "Participant disconnected, grace period started"
                        );
                    }
                }
            }
            CoordinatorMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    async fn handle_join(&mut self, id: ParticipantId) -> Result<JoinResponse, CoordinatorError> {
        if id.is_blank() {
            metrics::record_join("invalid");
            return Err(CoordinatorError::BadRequest(
                "participant id is required".to_string(),
            ));
        }

        // Re-joining restarts the grace period of a disconnected participant.
        if let Some(presence) = self.presence.get_mut(&id) {
            if presence.streams == 0 {
                presence.disconnected_at = Some(Instant::now());
            }
        }

        if self.is_active(&id) || self.is_queued(&id) {
            metrics::record_join("existing");
            return Ok(self.join_response(&id));
        }

        let credits = match self.ledger.available_credits(&id).await {
            Ok(credits) => credits,
            Err(e) => {
                metrics::record_join("ledger_error");
                return Err(e);
            }
        };
        if credits == 0 {
            metrics::record_join("no_credits");
            info!(target: "coordinator.actor", participant_id = %id, "Join refused: no credits");
            return Err(CoordinatorError::NoCredits);
        }

        self.queue.push_back(Waiting {
            id: id.clone(),
            joined_at: Utc::now(),
        });
        info!(
            target: "coordinator.actor",
            participant_id = %id,
            position = self.queue.len(),
            "Participant joined queue"
        );

        self.promote_next().await;
        self.commit("join");

        if !self.is_active(&id) && !self.is_queued(&id) {
            // Promotion found the balance spent in the meantime.
            metrics::record_join("no_credits");
            return Err(CoordinatorError::NoCredits);
        }

        metrics::record_join("accepted");
        Ok(self.join_response(&id))
    }

    async fn handle_leave(&mut self, id: &ParticipantId) {
        self.presence.remove(id);

        if self.is_active(id) {
            self.session = None;
            metrics::record_leave("active");
            info!(target: "coordinator.actor", participant_id = %id, "Active participant left");
            self.promote_next().await;
            self.commit("leave");
        } else if let Some(index) = self.queue.iter().position(|w| &w.id == id) {
            self.queue.remove(index);
            metrics::record_leave("queued");
            info!(target: "coordinator.actor", participant_id = %id, "Queued participant left");
            self.commit("leave");
        } else {
            // Nothing changed; replay the current state under its existing key.
            metrics::record_leave("absent");
            self.bus.publish_snapshot(self.snapshot());
        }
    }

    fn handle_publish(&mut self, sender: Option<&ParticipantId>, event: GameEvent) -> PublishOutcome {
        let name = event.name();

        if matches!(
            event,
            GameEvent::ObjectsInit(_) | GameEvent::ObjectGrabbed(_) | GameEvent::BgImpact(_)
        ) {
            metrics::record_command(name, DiscardReason::Reserved.as_str());
            return PublishOutcome::Discarded(DiscardReason::Reserved);
        }

        if event.is_control() && !sender.is_some_and(|s| self.is_driving(s)) {
            metrics::record_command(name, DiscardReason::NotActive.as_str());
            debug!(
                target: "coordinator.actor",
                event = name,
                sender = ?sender.map(ParticipantId::as_str),
                "Control command discarded: sender is not active"
            );
            return PublishOutcome::Discarded(DiscardReason::NotActive);
        }

        for output in self.scene.apply(event) {
            self.bus.publish_game(&output);
        }
        metrics::record_command(name, "accepted");
        PublishOutcome::Accepted
    }

    async fn handle_expiry(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        info!(
            target: "coordinator.actor",
            participant_id = %session.id,
            total_seconds = session.total_seconds,
            "Session expired"
        );
        metrics::record_expiry();

        self.promote_next().await;
        self.commit("expiry");
    }

    async fn housekeeping(&mut self) {
        let evicted = self.evict_disconnected();

        let promotion = if self.session.is_none() && !self.queue.is_empty() {
            self.promote_next().await
        } else {
            Promotion::Unchanged
        };

        if evicted > 0 {
            self.commit("eviction");
        } else if promotion == Promotion::Promoted {
            self.commit("promotion");
        } else if promotion == Promotion::Skipped {
            self.commit("skip");
        }
    }

    /// Remove queued participants whose grace period has run out.
    fn evict_disconnected(&mut self) -> usize {
        let now = Instant::now();
        let grace = self.settings.disconnect_grace;

        let lapsed: Vec<ParticipantId> = self
            .presence
            .iter()
            .filter(|(_, p)| {
                p.streams == 0
                    && p.disconnected_at
                        .is_some_and(|at| now.duration_since(at) >= grace)
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut evicted = 0;
        for id in lapsed {
            if self.is_active(&id) {
                continue;
            }
            self.presence.remove(&id);
            if let Some(index) = self.queue.iter().position(|w| w.id == id) {
                self.queue.remove(index);
                evicted += 1;
                metrics::record_eviction();
                info!(
                    target: "coordinator.actor",
                    participant_id = %id,
                    "Queued participant evicted after disconnect grace period"
                );
            }
        }
        evicted
    }

    /// Promote the head of the queue if the slot is free.
    ///
    /// Heads with no credit left are dropped. A ledger failure stops at the
    /// current head; the next housekeeping tick retries.
    async fn promote_next(&mut self) -> Promotion {
        if self.session.is_some() {
            return Promotion::Unchanged;
        }

        let mut outcome = Promotion::Unchanged;
        while let Some(head) = self.queue.front() {
            let id = head.id.clone();
            match self
                .ledger
                .debit_session(&id, self.settings.max_credits_per_session)
                .await
            {
                Ok(0) => {
                    self.queue.pop_front();
                    outcome = Promotion::Skipped;
                    warn!(
                        target: "coordinator.actor",
                        participant_id = %id,
                        "Queue head has no credits left, skipping"
                    );
                }
                Ok(credits) => {
                    self.queue.pop_front();
                    let total_seconds = credits.saturating_mul(self.settings.session_unit_seconds);
                    self.session = Some(ActiveSession {
                        id: id.clone(),
                        total_seconds,
                        expires_at: Instant::now() + Duration::from_secs(u64::from(total_seconds)),
                    });

                    info!(
                        target: "coordinator.actor",
                        participant_id = %id,
                        credits,
                        total_seconds,
                        "Participant promoted to active"
                    );
                    metrics::record_promotion(total_seconds);

                    let round = self.scene.new_round();
                    self.bus.publish_game(&round);
                    return Promotion::Promoted;
                }
                Err(e) => {
                    metrics::record_ledger_error("debit_session");
                    warn!(
                        target: "coordinator.actor",
                        participant_id = %id,
                        error = %e,
                        "Ledger unavailable, promotion deferred"
                    );
                    return outcome;
                }
            }
        }
        outcome
    }

    /// Advance the sequence and broadcast the new state.
    fn commit(&mut self, reason: &'static str) {
        self.seq += 1;
        let snapshot = self.snapshot();
        let reached = self.bus.publish_snapshot(snapshot);
        metrics::record_snapshot(reason, self.queue.len());

        debug!(
            target: "coordinator.actor",
            seq = self.seq,
            reason,
            subscribers = reached,
            queued = self.queue.len(),
            active = ?self.session.as_ref().map(|s| s.id.as_str()),
            "Queue snapshot broadcast"
        );
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            queue: self
                .queue
                .iter()
                .zip(1u32..)
                .map(|(waiting, position)| QueueEntry {
                    id: waiting.id.clone(),
                    position,
                    joined_at: waiting.joined_at,
                })
                .collect(),
            active_id: self.session.as_ref().map(|s| s.id.clone()),
            remaining: self.remaining_seconds(),
            total_seconds: self.session.as_ref().map(|s| s.total_seconds),
            epoch: self.settings.epoch.clone(),
            seq: self.seq,
        }
    }

    fn join_response(&self, id: &ParticipantId) -> JoinResponse {
        let active = self.is_active(id);
        JoinResponse {
            success: true,
            position: if active { None } else { self.position_of(id) },
            active,
            remaining: active.then(|| self.remaining_seconds()),
            total_seconds: self
                .session
                .as_ref()
                .filter(|_| active)
                .map(|s| s.total_seconds),
            queue_length: self.queue.len(),
            epoch: self.settings.epoch.clone(),
            seq: self.seq,
        }
    }

    /// Whole seconds left in the active session, rounded up.
    fn remaining_seconds(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| {
            let left = s.expires_at.saturating_duration_since(Instant::now());
            u32::try_from(left.as_millis().div_ceil(1000)).unwrap_or(u32::MAX)
        })
    }

    fn is_active(&self, id: &ParticipantId) -> bool {
        self.session.as_ref().is_some_and(|s| &s.id == id)
    }

    /// Active and still inside the session deadline.
    fn is_driving(&self, id: &ParticipantId) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| &s.id == id && Instant::now() < s.expires_at)
    }

    fn is_queued(&self, id: &ParticipantId) -> bool {
        self.queue.iter().any(|w| &w.id == id)
    }

    fn position_of(&self, id: &ParticipantId) -> Option<u32> {
        self.queue
            .iter()
            .position(|w| &w.id == id)
            .and_then(|index| u32::try_from(index + 1).ok())
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::scene::SceneSettings;
    use crate::services::{InMemoryLedger, MockLedger};
    use common::events::{ChannelEvent, Envelope, GrabPayload, MovePayload, QueueEvent, Topic};
    use common::types::{Direction, Position};
    use tokio::sync::broadcast;

    fn settings() -> CoordinatorSettings {
        CoordinatorSettings {
            epoch: "epoch-1".to_string(),
            session_unit_seconds: 30,
            max_credits_per_session: 10,
            disconnect_grace: Duration::from_secs(30),
        }
    }

    fn spawn_with(
        ledger: Arc<dyn CreditLedger>,
    ) -> (CoordinatorHandle, ChannelBus, broadcast::Receiver<Arc<Envelope>>) {
        let bus = ChannelBus::new(64);
        let rx = bus.subscribe();
        let (handle, _task) = CoordinatorActor::spawn(
            settings(),
            ledger,
            bus.clone(),
            Scene::with_seed(SceneSettings::default(), 42),
            CancellationToken::new(),
        );
        (handle, bus, rx)
    }

    fn id(value: &str) -> ParticipantId {
        ParticipantId::from(value)
    }

    /// Next queue snapshot on the bus, skipping game frames.
    async fn next_snapshot(rx: &mut broadcast::Receiver<Arc<Envelope>>) -> QueueSnapshot {
        loop {
            let envelope = rx.recv().await.unwrap();
            if envelope.channel == Topic::Queue {
                let ChannelEvent::Queue(QueueEvent::QueueUpdate(snapshot)) =
                    envelope.decode().unwrap()
                else {
                    panic!("unexpected queue event");
                };
                return snapshot;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_join_becomes_active() {
        let (handle, _bus, mut rx) = spawn_with(Arc::new(MockLedger::with_credits(1)));

        let response = handle.join(id("alice")).await.unwrap();
        assert!(response.success);
        assert!(response.active);
        assert_eq!(response.position, None);
        assert_eq!(response.remaining, Some(30));
        assert_eq!(response.total_seconds, Some(30));
        assert_eq!(response.seq, 1);

        let snapshot = next_snapshot(&mut rx).await;
        assert_eq!(snapshot.active_id, Some(id("alice")));
        assert_eq!(snapshot.seq, 1);
        assert!(snapshot.queue.is_empty());

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_length_is_capped() {
        let (handle, _bus, _rx) = spawn_with(Arc::new(MockLedger::with_credits(25)));

        let response = handle.join(id("alice")).await.unwrap();
        assert_eq!(response.total_seconds, Some(300));

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_join_is_queued() {
        let (handle, _bus, _rx) = spawn_with(Arc::new(MockLedger::with_credits(1)));

        handle.join(id("alice")).await.unwrap();
        let response = handle.join(id("bob")).await.unwrap();

        assert!(!response.active);
        assert_eq!(response.position, Some(1));
        assert_eq!(response.queue_length, 1);
        assert_eq!(response.remaining, None);

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_without_credits_is_refused() {
        let (handle, _bus, _rx) = spawn_with(Arc::new(MockLedger::with_credits(0)));

        let result = handle.join(id("alice")).await;
        assert!(matches!(result, Err(CoordinatorError::NoCredits)));

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.seq, 0);
        assert!(snapshot.active_id.is_none());

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_with_blank_id_is_rejected() {
        let (handle, _bus, _rx) = spawn_with(Arc::new(MockLedger::with_credits(1)));

        let result = handle.join(id("  ")).await;
        assert!(matches!(result, Err(CoordinatorError::BadRequest(_))));

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_ledger_failure_is_unavailable() {
        let (handle, _bus, _rx) = spawn_with(Arc::new(MockLedger::failing()));

        let result = handle.join(id("alice")).await;
        assert!(matches!(result, Err(CoordinatorError::ServiceUnavailable(_))));

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_join_is_idempotent() {
        let (handle, _bus, _rx) = spawn_with(Arc::new(MockLedger::with_credits(1)));

        handle.join(id("alice")).await.unwrap();
        handle.join(id("bob")).await.unwrap();
        let again = handle.join(id("bob")).await.unwrap();

        assert_eq!(again.position, Some(1));
        assert_eq!(again.seq, 2);
        assert_eq!(handle.snapshot().await.unwrap().queue.len(), 1);

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_leave_promotes_next_in_one_broadcast() {
        let (handle, _bus, mut rx) = spawn_with(Arc::new(MockLedger::with_credits(1)));

        handle.join(id("alice")).await.unwrap();
        handle.join(id("bob")).await.unwrap();
        next_snapshot(&mut rx).await;
        next_snapshot(&mut rx).await;

        handle.leave(id("alice")).await.unwrap();

        let snapshot = next_snapshot(&mut rx).await;
        assert_eq!(snapshot.seq, 3);
        assert_eq!(snapshot.active_id, Some(id("bob")));
        assert!(snapshot.queue.is_empty());
        assert_eq!(snapshot.remaining, 30);

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_leave_renumbers_positions() {
        let (handle, _bus, _rx) = spawn_with(Arc::new(MockLedger::with_credits(1)));

        handle.join(id("alice")).await.unwrap();
        handle.join(id("bob")).await.unwrap();
        handle.join(id("carol")).await.unwrap();
        handle.leave(id("bob")).await.unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.queue.len(), 1);
        assert_eq!(snapshot.queue[0].id, id("carol"));
        assert_eq!(snapshot.queue[0].position, 1);

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_of_unknown_replays_current_key() {
        let (handle, _bus, mut rx) = spawn_with(Arc::new(MockLedger::with_credits(1)));

        handle.join(id("alice")).await.unwrap();
        next_snapshot(&mut rx).await;

        handle.leave(id("nobody")).await.unwrap();
        handle.leave(id("nobody")).await.unwrap();

        assert_eq!(next_snapshot(&mut rx).await.seq, 1);
        assert_eq!(next_snapshot(&mut rx).await.seq, 1);

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expires_and_next_is_promoted() {
        let (handle, _bus, _rx) = spawn_with(Arc::new(MockLedger::with_credits(1)));

        handle.join(id("alice")).await.unwrap();
        handle.join(id("bob")).await.unwrap();

        tokio::time::advance(Duration::from_millis(10_500)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.active_id, Some(id("alice")));
        assert_eq!(snapshot.remaining, 20);

        tokio::time::advance(Duration::from_secs(20)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.active_id, Some(id("bob")));
        assert_eq!(snapshot.remaining, 30);
        assert!(snapshot.queue.is_empty());

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_with_empty_queue_frees_slot() {
        let (handle, _bus, _rx) = spawn_with(Arc::new(MockLedger::with_credits(1)));

        handle.join(id("alice")).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.active_id.is_none());
        assert_eq!(snapshot.remaining, 0);
        assert_eq!(snapshot.seq, 2);

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotion_skips_head_without_credits() {
        let ledger = Arc::new(InMemoryLedger::new(0));
        for name in ["alice", "bob", "carol"] {
            ledger.grant(&id(name), 1).await.unwrap();
        }
        let (handle, _bus, _rx) = spawn_with(ledger.clone());

        handle.join(id("alice")).await.unwrap();
        handle.join(id("bob")).await.unwrap();
        handle.join(id("carol")).await.unwrap();

        // Bob spends his credit elsewhere while waiting.
        ledger.debit_session(&id("bob"), 10).await.unwrap();

        handle.leave(id("alice")).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.active_id, Some(id("carol")));
        assert!(snapshot.queue.is_empty());

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotion_retries_after_ledger_outage() {
        let ledger = Arc::new(MockLedger::with_credits(1));
        let (handle, _bus, _rx) = spawn_with(ledger.clone());

        handle.join(id("alice")).await.unwrap();
        handle.join(id("bob")).await.unwrap();

        ledger.set_failing(true);
        tokio::time::advance(Duration::from_secs(30)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.active_id.is_none());
        assert_eq!(snapshot.queue.len(), 1);

        ledger.set_failing(false);
        tokio::time::advance(HOUSEKEEPING_INTERVAL).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.active_id, Some(id("bob")));

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipping_head_after_outage_is_broadcast() {
        let ledger = Arc::new(MockLedger::with_credits(1));
        let (handle, _bus, mut rx) = spawn_with(ledger.clone());

        handle.join(id("alice")).await.unwrap();
        handle.join(id("bob")).await.unwrap();

        // Alice expires while the ledger is down; bob stays queued.
        ledger.set_failing(true);
        tokio::time::advance(Duration::from_secs(30)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.seq, 3);
        assert_eq!(snapshot.queue.len(), 1);

        // Back up, but bob has nothing left.
        ledger.set_credits(0);
        ledger.set_failing(false);
        tokio::time::advance(HOUSEKEEPING_INTERVAL).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.seq, 4);
        assert!(snapshot.queue.is_empty());
        assert!(snapshot.active_id.is_none());

        let mut last = None;
        while let Ok(envelope) = rx.try_recv() {
            if let Ok(ChannelEvent::Queue(QueueEvent::QueueUpdate(update))) = envelope.decode() {
                last = Some(update);
            }
        }
        let last = last.unwrap();
        assert_eq!(last.seq, 4);
        assert!(last.queue.is_empty());

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_queued_participant_is_evicted() {
        let (handle, _bus, _rx) = spawn_with(Arc::new(MockLedger::with_credits(10)));

        handle.join(id("alice")).await.unwrap();
        handle.join(id("bob")).await.unwrap();
        handle.connected(id("bob")).await.unwrap();
        handle.disconnected(id("bob"));
        handle.snapshot().await.unwrap();

        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(handle.snapshot().await.unwrap().queue.len(), 1);

        tokio::time::advance(Duration::from_secs(16)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.queue.is_empty());
        assert_eq!(snapshot.active_id, Some(id("alice")));

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_within_grace_keeps_membership() {
        let (handle, _bus, _rx) = spawn_with(Arc::new(MockLedger::with_credits(10)));

        handle.join(id("alice")).await.unwrap();
        handle.join(id("bob")).await.unwrap();
        handle.connected(id("bob")).await.unwrap();
        handle.disconnected(id("bob"));
        handle.snapshot().await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        handle.connected(id("bob")).await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(handle.snapshot().await.unwrap().queue.len(), 1);

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_participant_is_never_evicted() {
        let (handle, _bus, _rx) = spawn_with(Arc::new(MockLedger::with_credits(10)));

        handle.join(id("alice")).await.unwrap();
        handle.connected(id("alice")).await.unwrap();
        handle.disconnected(id("alice"));
        handle.snapshot().await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(
            handle.snapshot().await.unwrap().active_id,
            Some(id("alice"))
        );

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_from_non_active_is_discarded() {
        let (handle, _bus, _rx) = spawn_with(Arc::new(MockLedger::with_credits(1)));

        handle.join(id("alice")).await.unwrap();
        handle.join(id("bob")).await.unwrap();

        let move_up = GameEvent::Move(MovePayload {
            position: None,
            direction: Direction::Up,
        });
        assert_eq!(
            handle.publish(Some(id("bob")), move_up.clone()).await.unwrap(),
            PublishOutcome::Discarded(DiscardReason::NotActive)
        );
        assert_eq!(
            handle.publish(None, move_up).await.unwrap(),
            PublishOutcome::Discarded(DiscardReason::NotActive)
        );

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_from_active_is_republished_with_position() {
        let (handle, _bus, mut rx) = spawn_with(Arc::new(MockLedger::with_credits(1)));

        handle.join(id("alice")).await.unwrap();

        let outcome = handle
            .publish(
                Some(id("alice")),
                GameEvent::Move(MovePayload {
                    position: Some(Position::new(100, 100)),
                    direction: Direction::Left,
                }),
            )
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Accepted);

        // Promotion publishes a fresh round before the snapshot; the move follows.
        let mut moves = Vec::new();
        while moves.is_empty() {
            let envelope = rx.recv().await.unwrap();
            if let Ok(ChannelEvent::Game(GameEvent::Move(payload))) = envelope.decode() {
                moves.push(payload);
            }
        }
        assert_eq!(moves[0].position, Some(Position::new(-20, 0)));

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserved_events_are_discarded() {
        let (handle, _bus, _rx) = spawn_with(Arc::new(MockLedger::with_credits(1)));
        handle.join(id("alice")).await.unwrap();

        let outcome = handle
            .publish(
                Some(id("alice")),
                GameEvent::ObjectGrabbed(common::events::ObjectGrabbedPayload { x: 10, y: 10 }),
            )
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Discarded(DiscardReason::Reserved));

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_grab_release_is_accepted_from_active() {
        let (handle, _bus, _rx) = spawn_with(Arc::new(MockLedger::with_credits(1)));
        handle.join(id("alice")).await.unwrap();

        let outcome = handle
            .publish(
                Some(id("alice")),
                GameEvent::Grab(GrabPayload {
                    active: false,
                    claw_x: None,
                    claw_y: None,
                }),
            )
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Accepted);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_cancel_stops_actor() {
        let bus = ChannelBus::new(8);
        let cancel_token = CancellationToken::new();
        let (handle, task) = CoordinatorActor::spawn(
            settings(),
            Arc::new(MockLedger::with_credits(1)),
            bus,
            Scene::with_seed(SceneSettings::default(), 1),
            cancel_token,
        );

        handle.cancel();
        assert!(handle.is_cancelled());
        task.await.unwrap();
        assert!(handle.snapshot().await.is_err());
    }
}
