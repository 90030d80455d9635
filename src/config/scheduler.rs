//! Scheduler loop configuration.
//!
//! # Example
//!
//! ```toml
//! [scheduler]
//! enabled = true
//! interval_secs = 60
//! lock_name = "ttl_sweeper"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Scheduler configuration.
///
/// Read at start-up and again on every reload. The loop picks up a new
/// snapshot at the top of its next wait cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Whether timer ticks run cleanup passes.
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between the start of one wait and the next timer tick.
    /// Must be at least 1. Default: 60
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Name of the single-flight lock shared by every sweeper on the same
    /// database.
    /// Default: "ttl_sweeper"
    #[serde(default = "default_lock_name")]
    pub lock_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            lock_name: default_lock_name(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "scheduler.interval_secs must be at least 1".into(),
            ));
        }
        if self.lock_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "scheduler.lock_name cannot be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    60
}

fn default_lock_name() -> String {
    "ttl_sweeper".to_string()
}
