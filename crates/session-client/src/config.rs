//! Session client configuration.
//!
//! Loaded from environment variables. The credit-to-time ratio and the
//! identity location are deployment choices, so both are configurable.

use common::config::{parse_or, positive_or, string_or, InvalidVar};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default coordinator base URL.
pub const DEFAULT_CORE_URL: &str = "http://localhost:8080";

/// Default countdown seed when a join response omits `remaining`.
pub const DEFAULT_SESSION_UNIT_SECONDS: u32 = 30;

/// Default controller-space distance of one move.
pub const DEFAULT_MOVE_STEP: i32 = 20;

/// Default clamp of the claw on both axes.
pub const DEFAULT_MOVE_BOUND: i32 = 120;

/// Default shift from controller space into device space.
pub const DEFAULT_CLAW_OFFSET: i32 = 130;

/// Default interval between repeated moves while a direction is held.
pub const DEFAULT_HOLD_REPEAT_MS: u64 = 120;

/// Default time the claw stays engaged after a grab.
pub const DEFAULT_GRAB_DWELL_MS: u64 = 1500;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidVar(#[from] InvalidVar),

    #[error("Invalid movement configuration: {0}")]
    InvalidMovement(String),
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordinator base URL, without trailing slash.
    pub core_url: String,

    /// Fallback countdown seed in seconds.
    pub session_unit_seconds: u32,

    /// Where the participant id is persisted. In-memory when `None`.
    pub identity_path: Option<PathBuf>,

    pub move_step: i32,
    pub move_bound: i32,
    pub claw_offset: i32,
    pub hold_repeat: Duration,
    pub grab_dwell: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            core_url: DEFAULT_CORE_URL.to_string(),
            session_unit_seconds: DEFAULT_SESSION_UNIT_SECONDS,
            identity_path: None,
            move_step: DEFAULT_MOVE_STEP,
            move_bound: DEFAULT_MOVE_BOUND,
            claw_offset: DEFAULT_CLAW_OFFSET,
            hold_repeat: Duration::from_millis(DEFAULT_HOLD_REPEAT_MS),
            grab_dwell: Duration::from_millis(DEFAULT_GRAB_DWELL_MS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let core_url = string_or(vars, "CORE_URL", DEFAULT_CORE_URL)
            .trim_end_matches('/')
            .to_string();

        let session_unit_seconds =
            positive_or(vars, "SESSION_UNIT_SECONDS", DEFAULT_SESSION_UNIT_SECONDS)?;

        let identity_path = vars
            .get("IDENTITY_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let move_step = positive_or(vars, "MOVE_STEP", DEFAULT_MOVE_STEP)?;
        let move_bound = parse_or(vars, "MOVE_BOUND", DEFAULT_MOVE_BOUND)?;
        if move_bound < 0 {
            return Err(ConfigError::InvalidMovement(format!(
                "MOVE_BOUND must not be negative, got {move_bound}"
            )));
        }
        let claw_offset = parse_or(vars, "CLAW_OFFSET", DEFAULT_CLAW_OFFSET)?;

        let hold_repeat_ms = positive_or(vars, "HOLD_REPEAT_MS", DEFAULT_HOLD_REPEAT_MS)?;
        let grab_dwell_ms = positive_or(vars, "GRAB_DWELL_MS", DEFAULT_GRAB_DWELL_MS)?;

        Ok(Self {
            core_url,
            session_unit_seconds,
            identity_path,
            move_step,
            move_bound,
            claw_offset,
            hold_repeat: Duration::from_millis(hold_repeat_ms),
            grab_dwell: Duration::from_millis(grab_dwell_ms),
        })
    }
}
