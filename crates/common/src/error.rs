//! Common error types for SweetControl components.

use thiserror::Error;

/// Errors raised while encoding or decoding wire messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Channel name is not one of the known topics
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// Event name is not valid on the given channel
    #[error("Unknown event '{event}' on channel '{channel}'")]
    UnknownEvent { channel: String, event: String },

    /// Payload did not match the event's schema
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Malformed(err.to_string())
    }
}

/// Result type alias using `ProtocolError`
pub type Result<T> = std::result::Result<T, ProtocolError>;
