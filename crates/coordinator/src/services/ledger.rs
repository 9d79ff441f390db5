//! Credit ledger.
//!
//! The coordinator consults the ledger twice per session: once at join to
//! refuse participants with no credit, and once at promotion to debit the
//! credits that buy the session's control time.

use crate::errors::CoordinatorError;
use common::types::ParticipantId;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Trait for ledger operations (enables mocking).
#[async_trait::async_trait]
pub trait CreditLedger: Send + Sync {
    /// Unspent credits of a participant.
    async fn available_credits(&self, id: &ParticipantId) -> Result<u32, CoordinatorError>;

    /// Debit up to `max_credits` for one session. Returns the credits actually
    /// debited, which is zero when the participant has nothing left.
    async fn debit_session(
        &self,
        id: &ParticipantId,
        max_credits: u32,
    ) -> Result<u32, CoordinatorError>;

    /// Add credits after a confirmed payment. Returns the new balance.
    async fn grant(&self, id: &ParticipantId, credits: u32) -> Result<u32, CoordinatorError>;
}

/// Ledger kept in coordinator memory.
///
/// Participants seen for the first time start with `free_play_credits`.
pub struct InMemoryLedger {
    balances: Mutex<HashMap<ParticipantId, u32>>,
    free_play_credits: u32,
}

impl InMemoryLedger {
    #[must_use]
    pub fn new(free_play_credits: u32) -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            free_play_credits,
        }
    }
}

#[async_trait::async_trait]
impl CreditLedger for InMemoryLedger {
    async fn available_credits(&self, id: &ParticipantId) -> Result<u32, CoordinatorError> {
        let mut balances = self.balances.lock().await;
        Ok(*balances
            .entry(id.clone())
            .or_insert(self.free_play_credits))
    }

    async fn debit_session(
        &self,
        id: &ParticipantId,
        max_credits: u32,
    ) -> Result<u32, CoordinatorError> {
        let mut balances = self.balances.lock().await;
        let balance = balances
            .entry(id.clone())
            .or_insert(self.free_play_credits);
        let debited = (*balance).min(max_credits);
        *balance -= debited;

        debug!(
            target: "coordinator.ledger",
            participant_id = %id,
            debited,
            remaining_balance = *balance,
            "Session debited"
        );
        Ok(debited)
    }

    async fn grant(&self, id: &ParticipantId, credits: u32) -> Result<u32, CoordinatorError> {
        let mut balances = self.balances.lock().await;
        let balance = balances
            .entry(id.clone())
            .or_insert(self.free_play_credits);
        *balance = balance.saturating_add(credits);

        info!(
            target: "coordinator.ledger",
            participant_id = %id,
            granted = credits,
            balance = *balance,
            "Credits granted"
        );
        Ok(*balance)
    }
}

/// Mock ledger module for testing.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

    /// Mock ledger with a fixed balance for every participant.
    ///
    /// Debits never reduce the balance, so a participant can play any number
    /// of sessions.
    pub struct MockLedger {
        credits: AtomicU32,
        failing: AtomicBool,
        call_count: AtomicUsize,
        debit_count: AtomicUsize,
    }

    impl MockLedger {
        /// Every participant holds `credits`.
        pub fn with_credits(credits: u32) -> Self {
            Self {
                credits: AtomicU32::new(credits),
                failing: AtomicBool::new(false),
                call_count: AtomicUsize::new(0),
                debit_count: AtomicUsize::new(0),
            }
        }

        /// Every call fails as if the ledger were unreachable.
        pub fn failing() -> Self {
            let mock = Self::with_credits(0);
            mock.set_failing(true);
            mock
        }

        /// Toggle failures at runtime.
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Change every participant's balance.
        pub fn set_credits(&self, credits: u32) {
            self.credits.store(credits, Ordering::SeqCst);
        }

        /// Get the number of calls made.
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        /// Get the number of successful debits.
        pub fn debit_count(&self) -> usize {
            self.debit_count.load(Ordering::SeqCst)
        }

        fn check(&self) -> Result<(), CoordinatorError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(CoordinatorError::ServiceUnavailable(
                    "Mock ledger error".to_string(),
                ));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl CreditLedger for MockLedger {
        async fn available_credits(&self, _id: &ParticipantId) -> Result<u32, CoordinatorError> {
            self.check()?;
            Ok(self.credits.load(Ordering::SeqCst))
        }

        async fn debit_session(
            &self,
            _id: &ParticipantId,
            max_credits: u32,
        ) -> Result<u32, CoordinatorError> {
            self.check()?;
            self.debit_count.fetch_add(1, Ordering::SeqCst);
            Ok(self.credits.load(Ordering::SeqCst).min(max_credits))
        }

        async fn grant(&self, _id: &ParticipantId, credits: u32) -> Result<u32, CoordinatorError> {
            self.check()?;
            Ok(self.credits.load(Ordering::SeqCst).saturating_add(credits))
        }
    }

}
