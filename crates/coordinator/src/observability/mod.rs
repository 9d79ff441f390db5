//! Observability for the coordinator.
//!
//! Provides metrics definitions and liveness/readiness state.

pub mod health;
pub mod metrics;

pub use health::HealthState;
