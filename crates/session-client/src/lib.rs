//! Session client for the SweetControl coordinator.
//!
//! Everything a controller or a passive viewer runs:
//!
//! - [`machine`] turns join answers and queue snapshots into a local
//!   session phase with a countdown, reconciled by the pure functions in
//!   [`state`]
//! - [`dispatcher`] sends control commands while the session is active
//! - [`mirror`] keeps a local copy of the play field and its telemetry
//! - [`realtime`] holds the server-sent event stream open across reconnects
//! - [`api`] is the HTTP client of the coordinator
//!
//! [`client::SessionClient`] wires them together.

pub mod api;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod identity;
pub mod machine;
pub mod mirror;
pub mod realtime;
pub mod state;
pub mod timer;

pub use client::SessionClient;
pub use errors::ClientError;
