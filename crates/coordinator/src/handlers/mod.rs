//! HTTP request handlers for the coordinator.

pub mod events;
pub mod health;
pub mod ledger;
pub mod metrics;
pub mod queue;
pub mod realtime;

pub use events::send_event;
pub use health::{health_check, readiness_check};
pub use ledger::grant_credits;
pub use metrics::metrics_handler;
pub use queue::{join, leave};
pub use realtime::subscribe;
