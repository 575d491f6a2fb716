use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::MAX_BACKOFF_MULTIPLIER;
use crate::Error;
use crate::Result;

/// What the client does once every connection is gone
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectMode {
    /// Reconnect in the background; retryable operations wait for it
    #[default]
    On,
    /// Losing the cluster is fatal
    Off,
    /// Reconnect in the background; operations fail fast while offline
    Async,
}

/// Backoff applied between reconnection attempts
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct BackoffPolicy {
    /// Maximum number of attempts per reconnection cycle (0 means unlimited)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (unit: milliseconds)
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_in_ms: u64,

    /// Upper bound for the delay (unit: milliseconds)
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_in_ms: u64,

    /// Growth factor applied after each failed attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Random spread applied to each delay, 0.0 to 1.0
    #[serde(default)]
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_in_ms: default_initial_backoff_ms(),
            max_backoff_in_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            jitter: 0.0,
        }
    }
}

impl BackoffPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.initial_backoff_in_ms == 0 {
            return Err(Error::Configuration(
                "initial_backoff_in_ms must be greater than 0".into(),
            ));
        }
        if self.max_backoff_in_ms < self.initial_backoff_in_ms {
            return Err(Error::Configuration(format!(
                "max_backoff_in_ms ({}) must be >= initial_backoff_in_ms ({})",
                self.max_backoff_in_ms, self.initial_backoff_in_ms
            )));
        }
        if !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&self.multiplier) {
            return Err(Error::Configuration(format!(
                "multiplier ({}) must be within 1.0..={}",
                self.multiplier, MAX_BACKOFF_MULTIPLIER
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::Configuration(format!(
                "jitter ({}) must be within 0.0..=1.0",
                self.jitter
            )));
        }
        Ok(())
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_in_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_in_ms)
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_attempts == 0
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default)]
pub struct ReconnectConfig {
    #[serde(default)]
    pub mode: ReconnectMode,

    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl ReconnectConfig {
    pub fn validate(&self) -> Result<()> {
        self.backoff.validate()
    }
}

fn default_max_attempts() -> u32 {
    0
}
fn default_initial_backoff_ms() -> u64 {
    1_000
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_multiplier() -> f64 {
    1.05
}
