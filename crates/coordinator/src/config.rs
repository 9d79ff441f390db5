//! Coordinator configuration.
//!
//! Configuration is loaded from environment variables. The ledger webhook
//! secret is redacted in Debug output.

use common::config::{positive_or, string_or, InvalidVar};
use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default seconds of control granted per credit.
pub const DEFAULT_SESSION_UNIT_SECONDS: u32 = 30;

/// Default cap on credits consumed by a single session.
pub const DEFAULT_MAX_CREDITS_PER_SESSION: u32 = 10;

/// Default grace period before a disconnected, queued participant is evicted.
pub const DEFAULT_DISCONNECT_GRACE_SECONDS: u64 = 30;

/// Default number of objects placed per round.
pub const DEFAULT_ROUND_OBJECT_COUNT: usize = 12;

/// Default realtime bus buffer (frames per subscriber before it lags).
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Upper bound on objects per round (number of free grid cells on the field).
pub const MAX_ROUND_OBJECT_COUNT: usize = 144;

/// Default coordinator ID prefix.
pub const DEFAULT_COORDINATOR_ID_PREFIX: &str = "coordinator";

/// Coordinator configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Unique identifier for this coordinator instance.
    pub coordinator_id: String,

    /// Seconds of control per credit.
    pub session_unit_seconds: u32,

    /// Maximum credits consumed by one session.
    pub max_credits_per_session: u32,

    /// Seconds a queued participant may stay disconnected before eviction.
    pub disconnect_grace_seconds: u64,

    /// Objects placed on the field per round.
    pub round_object_count: usize,

    /// Realtime bus buffer size.
    pub bus_capacity: usize,

    /// Credits granted to participants the ledger has never seen (0 disables).
    pub free_play_credits: u32,

    /// Shared secret expected from the payment webhook. `None` disables the endpoint.
    pub ledger_webhook_secret: Option<SecretString>,
}

/// Custom Debug implementation that redacts the webhook secret.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("coordinator_id", &self.coordinator_id)
            .field("session_unit_seconds", &self.session_unit_seconds)
            .field("max_credits_per_session", &self.max_credits_per_session)
            .field("disconnect_grace_seconds", &self.disconnect_grace_seconds)
            .field("round_object_count", &self.round_object_count)
            .field("bus_capacity", &self.bus_capacity)
            .field("free_play_credits", &self.free_play_credits)
            .field(
                "ledger_webhook_secret",
                &self.ledger_webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidVar(#[from] InvalidVar),

    #[error("Invalid round configuration: {0}")]
    InvalidRound(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = string_or(vars, "BIND_ADDRESS", "0.0.0.0:8080");

        let session_unit_seconds =
            positive_or(vars, "SESSION_UNIT_SECONDS", DEFAULT_SESSION_UNIT_SECONDS)?;

        let max_credits_per_session = positive_or(
            vars,
            "MAX_CREDITS_PER_SESSION",
            DEFAULT_MAX_CREDITS_PER_SESSION,
        )?;

        let disconnect_grace_seconds = positive_or(
            vars,
            "DISCONNECT_GRACE_SECONDS",
            DEFAULT_DISCONNECT_GRACE_SECONDS,
        )?;

        let round_object_count =
            positive_or(vars, "ROUND_OBJECT_COUNT", DEFAULT_ROUND_OBJECT_COUNT)?;
        if round_object_count > MAX_ROUND_OBJECT_COUNT {
            return Err(ConfigError::InvalidRound(format!(
                "ROUND_OBJECT_COUNT must not exceed {}, got {}",
                MAX_ROUND_OBJECT_COUNT, round_object_count
            )));
        }

        let bus_capacity = positive_or(vars, "BUS_CAPACITY", DEFAULT_BUS_CAPACITY)?;

        let free_play_credits = common::config::parse_or(vars, "FREE_PLAY_CREDITS", 0u32)?;

        let ledger_webhook_secret = vars
            .get("LEDGER_WEBHOOK_SECRET")
            .filter(|s| !s.trim().is_empty())
            .map(|s| SecretString::from(s.clone()));

        let coordinator_id = vars.get("COORDINATOR_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!(
                "{}-{}-{}",
                DEFAULT_COORDINATOR_ID_PREFIX, hostname, short_suffix
            )
        });

        Ok(Config {
            bind_address,
            coordinator_id,
            session_unit_seconds,
            max_credits_per_session,
            disconnect_grace_seconds,
            round_object_count,
            bus_capacity,
            free_play_credits,
            ledger_webhook_secret,
        })
    }
}
