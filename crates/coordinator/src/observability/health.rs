//! Coordinator lifecycle as seen by the probes.
//!
//! `/health` answers OK for every stage except `Stopped`. `/ready` answers OK
//! only while `Serving`; draining coordinators keep streaming to connected
//! clients but stop taking new traffic from the load balancer.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    /// Actor spawned, listener not yet bound.
    Starting = 0,
    Serving = 1,
    /// Shutdown signal received; in-flight requests and streams drain.
    Draining = 2,
    Stopped = 3,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Lifecycle::Starting,
            1 => Lifecycle::Serving,
            2 => Lifecycle::Draining,
            _ => Lifecycle::Stopped,
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Starting => "starting",
            Lifecycle::Serving => "serving",
            Lifecycle::Draining => "draining",
            Lifecycle::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Shared lifecycle flag read by the probe handlers.
#[derive(Debug)]
pub struct HealthState {
    stage: AtomicU8,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stage: AtomicU8::new(Lifecycle::Starting as u8),
        }
    }

    #[must_use]
    pub fn stage(&self) -> Lifecycle {
        Lifecycle::from_u8(self.stage.load(Ordering::SeqCst))
    }

    /// Listener bound and actor running. No-op once draining has begun.
    pub fn set_ready(&self) {
        let _ = self.stage.compare_exchange(
            Lifecycle::Starting as u8,
            Lifecycle::Serving as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Shutdown started. Stages only move forward.
    pub fn set_not_ready(&self) {
        self.stage.fetch_max(Lifecycle::Draining as u8, Ordering::SeqCst);
    }

    pub fn set_stopped(&self) {
        self.stage.store(Lifecycle::Stopped as u8, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.stage() != Lifecycle::Stopped
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.stage() == Lifecycle::Serving
    }
}
