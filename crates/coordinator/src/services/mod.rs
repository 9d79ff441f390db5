//! Service layer for the coordinator.
//!
//! # Components
//!
//! - `ledger` - Credit balances consulted at join and debited at promotion

pub mod ledger;

pub use ledger::{CreditLedger, InMemoryLedger};
// Mock ledger for testing (exposed for integration tests)
#[allow(unused_imports)]
pub use ledger::mock::MockLedger;
