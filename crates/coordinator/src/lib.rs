//! Coordinator Service Library
//!
//! The coordinator runs a single shared claw machine that remote
//! participants take turns driving:
//!
//! - A first-come-first-served queue gated by credits
//! - One active session at a time, timed from the credits debited at promotion
//! - Two realtime channels: queue snapshots and game events
//! - A scene of objects on the play field that the claw can grab
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> actors/coordinator.rs -> services/ledger.rs
//!                                          |
//!                                          +-> scene.rs
//!                                          +-> bus.rs -> handlers/realtime.rs (SSE)
//! ```
//!
//! # Modules
//!
//! - `actors` - The coordinator actor owning queue and session state
//! - `bus` - Realtime broadcast of channel envelopes
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - HTTP metrics middleware
//! - `observability` - Metrics and health state
//! - `routes` - Axum router setup
//! - `scene` - Play field objects and claw position
//! - `services` - Credit ledger

pub mod actors;
pub mod bus;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod routes;
pub mod scene;
pub mod services;
