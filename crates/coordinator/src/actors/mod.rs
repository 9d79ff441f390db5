//! Actor owning the coordinator's queue and session state.
//!
//! ```text
//! HTTP handlers ──► CoordinatorHandle ──mpsc──► CoordinatorActor
//!                                                 ├── queue + active session
//!                                                 ├── presence tracking
//!                                                 ├── Scene (claw + objects)
//!                                                 └── ChannelBus (broadcast out)
//! ```
//!
//! # Modules
//!
//! - [`coordinator`] - `CoordinatorActor` and its handle
//! - [`messages`] - Message types for actor communication

pub mod coordinator;
pub mod messages;

pub use coordinator::{CoordinatorActor, CoordinatorHandle, CoordinatorSettings};
pub use messages::*;
