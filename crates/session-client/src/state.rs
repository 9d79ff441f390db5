//! Session state and its pure transition functions.
//!
//! The coordinator's broadcasts are the only authority on who is active.
//! Everything here is a total function of the previous state and one input
//! (snapshot, join answer, countdown tick), so it can be applied to any
//! delivery in any order: stale or replayed inputs return the state unchanged.
//!
//! ```text
//! Joining ──join/snapshot──▶ Queued ──snapshot(active=me)──▶ Active
//!    │                         │                               │
//!    └──────────── snapshot without me / countdown end ───────▶ Ended
//! ```

use common::protocol::JoinResponse;
use common::types::{ParticipantId, QueueSnapshot, SnapshotKey};
use serde::Serialize;

/// Why a join cycle stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Failure {
    /// The ledger refused; more credits are needed.
    NoCredits,
    /// The coordinator could not be reached. Retry-eligible.
    Transient,
}

/// User-visible phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "failure")]
pub enum Phase {
    /// A join is outstanding and no snapshot has placed us yet.
    Joining,
    /// Waiting in the queue.
    Queued,
    /// Holding the active slot.
    Active,
    /// The session (or queue place) is over.
    Ended,
    Error(Failure),
    /// No participant identity; not a playable state.
    RedirectHome,
}

/// Local state reconciled against coordinator snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub phase: Phase,
    /// 1-indexed queue rank while queued.
    pub position: Option<u32>,
    /// Participants waiting behind the active slot.
    pub queue_length: usize,
    /// Local countdown in seconds. Only meaningful while active.
    pub remaining: u32,
    pub total_seconds: Option<u32>,
    /// Key of the newest coordinator state applied.
    pub applied: Option<SnapshotKey>,
    /// Whether the newest applied snapshot listed neither our queue place
    /// nor our session.
    pub absent: bool,
    /// Whether this cycle's join answer has been applied. Until then a
    /// snapshot that omits us may predate our join and keeps us `Joining`.
    pub join_answered: bool,
}

impl SessionState {
    #[must_use]
    pub fn joining() -> Self {
        Self {
            phase: Phase::Joining,
            position: None,
            queue_length: 0,
            remaining: 0,
            total_seconds: None,
            applied: None,
            absent: false,
            join_answered: false,
        }
    }

    #[must_use]
    pub fn redirect_home() -> Self {
        Self {
            phase: Phase::RedirectHome,
            ..Self::joining()
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    /// Whether snapshots and join answers still drive this state.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self.phase, Phase::Joining | Phase::Queued | Phase::Active)
    }

    fn activate(&self, remaining: u32, total_seconds: Option<u32>) -> Self {
        if self.is_active() {
            // Already running: a duplicate promotion must not restart the countdown.
            return self.clone();
        }
        Self {
            phase: Phase::Active,
            position: None,
            remaining,
            total_seconds,
            ..self.clone()
        }
    }

    fn queued(&self, position: u32) -> Self {
        Self {
            phase: Phase::Queued,
            position: Some(position),
            remaining: 0,
            total_seconds: None,
            ..self.clone()
        }
    }
}

/// Apply a `queue-update` snapshot.
///
/// Snapshots whose key does not supersede the applied key are ignored, so
/// replays and out-of-order deliveries change nothing.
#[must_use]
pub fn reconcile(state: &SessionState, snapshot: &QueueSnapshot, me: &ParticipantId) -> SessionState {
    let key = snapshot.key();
    if !key.supersedes(state.applied.as_ref()) {
        return state.clone();
    }

    let base = SessionState {
        applied: Some(key),
        queue_length: snapshot.queue.len(),
        absent: !snapshot.is_active(me) && snapshot.position_of(me).is_none(),
        ..state.clone()
    };

    if !state.is_live() {
        return base;
    }

    if snapshot.is_active(me) {
        return base.activate(snapshot.remaining, snapshot.total_seconds);
    }

    match (state.phase, snapshot.position_of(me)) {
        (Phase::Active, _) => end(&base),
        (_, Some(position)) => base.queued(position),
        // Our join may not be committed yet.
        (Phase::Joining, None) if !state.join_answered => base,
        (_, None) => end(&base),
    }
}

/// Apply the answer to our own `join`.
///
/// The answer carries the key of the state it reflects and loses against
/// any newer snapshot already applied. An answer under the applied key
/// describes that same committed state and is applied from its contents.
/// `fallback_seconds` seeds the countdown when the answer omits `remaining`.
#[must_use]
pub fn apply_join(state: &SessionState, response: &JoinResponse, fallback_seconds: u32) -> SessionState {
    if !state.is_live() {
        return state.clone();
    }

    let key = response.key();
    let current = state.applied.as_ref() == Some(&key);
    if !current && !key.supersedes(state.applied.as_ref()) {
        // A newer snapshot already decided. If it placed us nowhere while we
        // were still joining, the answer describes a session that is gone.
        if state.phase == Phase::Joining && state.absent {
            return end(state);
        }
        return SessionState {
            join_answered: true,
            ..state.clone()
        };
    }

    let base = SessionState {
        applied: Some(key),
        queue_length: response.queue_length,
        absent: false,
        join_answered: true,
        ..state.clone()
    };

    if response.active {
        base.activate(
            response.remaining.unwrap_or(fallback_seconds),
            response.total_seconds,
        )
    } else if let Some(position) = response.position {
        base.queued(position)
    } else {
        base
    }
}

/// Advance the local countdown by one second.
#[must_use]
pub fn tick(state: &SessionState) -> SessionState {
    if !state.is_active() {
        return state.clone();
    }
    SessionState {
        remaining: state.remaining.saturating_sub(1),
        ..state.clone()
    }
}

/// End the session or queue place. No-op outside live phases.
#[must_use]
pub fn end(state: &SessionState) -> SessionState {
    if !state.is_live() {
        return state.clone();
    }
    SessionState {
        phase: Phase::Ended,
        position: None,
        remaining: 0,
        ..state.clone()
    }
}

/// Stop the join cycle with a failure. No-op outside live phases.
#[must_use]
pub fn fail(state: &SessionState, failure: Failure) -> SessionState {
    if !state.is_live() {
        return state.clone();
    }
    SessionState {
        phase: Phase::Error(failure),
        position: None,
        remaining: 0,
        ..state.clone()
    }
}

/// Start a new join cycle from `Ended` or `Error`.
///
/// The applied key is kept so that snapshots older than the previous cycle
/// stay ignored.
#[must_use]
pub fn restart(state: &SessionState) -> SessionState {
    match state.phase {
        Phase::Ended | Phase::Error(_) => SessionState {
            phase: Phase::Joining,
            position: None,
            remaining: 0,
            total_seconds: None,
            join_answered: false,
            ..state.clone()
        },
        _ => state.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::types::QueueEntry;

    fn me() -> ParticipantId {
        "me".into()
    }

    fn snapshot(active: Option<&str>, queued: &[&str], remaining: u32, seq: u64) -> QueueSnapshot {
        QueueSnapshot {
            queue: queued
                .iter()
                .zip(1u32..)
                .map(|(id, position)| QueueEntry {
                    id: (*id).into(),
                    position,
                    joined_at: Utc::now(),
                })
                .collect(),
            active_id: active.map(Into::into),
            remaining,
            total_seconds: active.map(|_| 90),
            epoch: "e1".to_string(),
            seq,
        }
    }

    fn join_answer(active: bool, position: Option<u32>, seq: u64) -> JoinResponse {
        JoinResponse {
            success: true,
            position,
            active,
            remaining: active.then_some(60),
            total_seconds: active.then_some(60),
            queue_length: position.map_or(0, |p| p as usize),
            epoch: "e1".to_string(),
            seq,
        }
    }

    #[test]
    fn test_join_answer_places_us() {
        let queued = apply_join(&SessionState::joining(), &join_answer(false, Some(2), 3), 30);
        assert_eq!(queued.phase, Phase::Queued);
        assert_eq!(queued.position, Some(2));

        let active = apply_join(&SessionState::joining(), &join_answer(true, None, 3), 30);
        assert_eq!(active.phase, Phase::Active);
        assert_eq!(active.remaining, 60);
    }

    #[test]
    fn test_join_answer_without_remaining_uses_fallback() {
        let mut answer = join_answer(true, None, 1);
        answer.remaining = None;

        let state = apply_join(&SessionState::joining(), &answer, 35);
        assert_eq!(state.remaining, 35);
    }

    #[test]
    fn test_snapshot_promotes_queued_participant() {
        let queued = apply_join(&SessionState::joining(), &join_answer(false, Some(1), 2), 30);

        let active = reconcile(&queued, &snapshot(Some("me"), &[], 45, 3), &me());

        assert_eq!(active.phase, Phase::Active);
        assert_eq!(active.remaining, 45);
        assert_eq!(active.total_seconds, Some(90));
        assert_eq!(active.position, None);
    }

    #[test]
    fn test_replayed_snapshot_changes_nothing() {
        let state = reconcile(&SessionState::joining(), &snapshot(None, &["x", "me"], 0, 4), &me());
        let replayed = reconcile(&state, &snapshot(None, &["x", "me"], 0, 4), &me());

        assert_eq!(replayed, state);
    }

    #[test]
    fn test_stale_snapshot_is_ignored() {
        let active = reconcile(&SessionState::joining(), &snapshot(Some("me"), &[], 30, 7), &me());
        let after_stale = reconcile(&active, &snapshot(None, &["me"], 0, 6), &me());

        assert_eq!(after_stale, active);
    }

    #[test]
    fn test_duplicate_promotion_keeps_countdown() {
        let active = reconcile(&SessionState::joining(), &snapshot(Some("me"), &[], 30, 1), &me());
        let ticked = tick(&tick(&active));
        assert_eq!(ticked.remaining, 28);

        // Someone joined behind us; we are still active.
        let again = reconcile(&ticked, &snapshot(Some("me"), &["x"], 30, 2), &me());
        assert_eq!(again.phase, Phase::Active);
        assert_eq!(again.remaining, 28);
        assert_eq!(again.queue_length, 1);
    }

    #[test]
    fn test_losing_active_slot_ends_session() {
        let active = reconcile(&SessionState::joining(), &snapshot(Some("me"), &[], 30, 1), &me());
        let ended = reconcile(&active, &snapshot(Some("x"), &[], 30, 2), &me());

        assert_eq!(ended.phase, Phase::Ended);
        assert_eq!(ended.remaining, 0);
    }

    #[test]
    fn test_removed_from_queue_ends_place() {
        let queued = reconcile(&SessionState::joining(), &snapshot(Some("x"), &["me"], 10, 1), &me());
        let evicted = reconcile(&queued, &snapshot(Some("x"), &[], 9, 2), &me());

        assert_eq!(evicted.phase, Phase::Ended);
    }

    #[test]
    fn test_snapshot_before_our_join_keeps_joining() {
        let state = reconcile(&SessionState::joining(), &snapshot(Some("x"), &[], 10, 1), &me());
        assert_eq!(state.phase, Phase::Joining);
        assert!(state.absent);

        // Our answer reflects a later commit and still applies.
        let queued = apply_join(&state, &join_answer(false, Some(1), 2), 30);
        assert_eq!(queued.phase, Phase::Queued);
    }

    #[test]
    fn test_stale_join_answer_loses_to_newer_snapshot() {
        let active = reconcile(&SessionState::joining(), &snapshot(Some("me"), &[], 30, 5), &me());
        let after = apply_join(&active, &join_answer(false, Some(1), 4), 30);

        assert_eq!(after, active);
    }

    #[test]
    fn test_stale_join_answer_after_session_came_and_went() {
        // Promoted and expired before our join answer arrived.
        let state = reconcile(&SessionState::joining(), &snapshot(Some("x"), &[], 10, 9), &me());
        let after = apply_join(&state, &join_answer(true, None, 4), 30);

        assert_eq!(after.phase, Phase::Ended);
    }

    #[test]
    fn test_join_answer_under_applied_key_is_applied() {
        // The snapshot and our answer describe the same commit.
        let state = reconcile(&SessionState::joining(), &snapshot(Some("x"), &["me"], 10, 3), &me());
        let rejoined = restart(&end(&state));

        let after = apply_join(&rejoined, &join_answer(false, Some(1), 3), 30);
        assert_eq!(after.phase, Phase::Queued);
        assert_eq!(after.position, Some(1));
        assert!(after.join_answered);
    }

    #[test]
    fn test_rejoin_racing_own_leave_converges_to_ended() {
        // Countdown ended locally, leave beacon in flight, user rejoins.
        let active = apply_join(&SessionState::joining(), &join_answer(true, None, 1), 30);
        let rejoined = restart(&end(&active));
        assert!(!rejoined.join_answered);

        // The join overtakes the leave and reports the old standing.
        let answered = apply_join(&rejoined, &join_answer(true, None, 1), 30);
        assert_eq!(answered.phase, Phase::Active);

        // Then the leave commits without us.
        let after = reconcile(&answered, &snapshot(None, &[], 0, 2), &me());
        assert_eq!(after.phase, Phase::Ended);
    }

    #[test]
    fn test_snapshot_without_us_ends_an_answered_join() {
        let mut state = SessionState::joining();
        state.join_answered = true;

        let after = reconcile(&state, &snapshot(Some("x"), &[], 10, 4), &me());
        assert_eq!(after.phase, Phase::Ended);
    }

    #[test]
    fn test_new_epoch_supersedes() {
        let active = reconcile(&SessionState::joining(), &snapshot(Some("me"), &[], 30, 50), &me());
        let mut restarted = snapshot(None, &[], 0, 1);
        restarted.epoch = "e2".to_string();

        let after = reconcile(&active, &restarted, &me());
        assert_eq!(after.phase, Phase::Ended);
    }

    #[test]
    fn test_terminal_phases_ignore_inputs() {
        let ended = end(&reconcile(&SessionState::joining(), &snapshot(Some("me"), &[], 3, 1), &me()));
        assert_eq!(ended.phase, Phase::Ended);

        let after = reconcile(&ended, &snapshot(Some("me"), &[], 3, 2), &me());
        assert_eq!(after.phase, Phase::Ended);
        assert_eq!(apply_join(&ended, &join_answer(true, None, 3), 30).phase, Phase::Ended);
        assert_eq!(tick(&ended), ended);

        let home = SessionState::redirect_home();
        assert_eq!(fail(&home, Failure::Transient), home);
        assert_eq!(restart(&home), home);
    }

    #[test]
    fn test_restart_from_ended_or_error() {
        let ended = end(&SessionState::joining());
        assert_eq!(restart(&ended).phase, Phase::Joining);

        let failed = fail(&SessionState::joining(), Failure::NoCredits);
        assert_eq!(failed.phase, Phase::Error(Failure::NoCredits));
        assert_eq!(restart(&failed).phase, Phase::Joining);
    }

    #[test]
    fn test_countdown_saturates_at_zero() {
        let active = apply_join(&SessionState::joining(), &join_answer(true, None, 1), 30);
        let mut state = active;
        for _ in 0..70 {
            state = tick(&state);
        }
        assert_eq!(state.remaining, 0);
        assert_eq!(state.phase, Phase::Active);
    }
}
