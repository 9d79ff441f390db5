//! Common types shared by the SweetControl coordinator and its clients.
//!
//! Everything that crosses the wire lives here so that both sides agree on
//! a single definition: HTTP bodies, realtime envelopes, queue snapshots and
//! game events.

#![warn(clippy::pedantic)]

/// Module for environment configuration helpers
pub mod config;

/// Module for common error types
pub mod error;

/// Module for realtime channel events
pub mod events;

/// Module for HTTP request/response bodies
pub mod protocol;

/// Module for decoding server-sent event streams
pub mod sse;

/// Module for common data types
pub mod types;
