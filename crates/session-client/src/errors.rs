//! Session client error types.

use thiserror::Error;

/// Errors raised by the session client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The ledger has no credit for this participant. Terminal until more
    /// credits are purchased.
    #[error("No credits available")]
    NoCredits,

    /// Network failure or coordinator unavailable. Retry-eligible.
    #[error("Coordinator unreachable: {0}")]
    Transient(String),

    /// The coordinator rejected the request or answered something unreadable.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Whether the same call may succeed if repeated.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }
}
