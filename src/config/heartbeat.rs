use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Liveness probing parameters applied to every new connection
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Interval between probes
    /// Default: 5 seconds
    #[serde(default = "default_interval")]
    pub interval_in_ms: u64,

    /// Silence after which a connection is declared stale
    /// Default: 60 seconds
    #[serde(default = "default_timeout")]
    pub timeout_in_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_in_ms: default_interval(),
            timeout_in_ms: default_timeout(),
        }
    }
}

impl HeartbeatConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval_in_ms == 0 {
            return Err(Error::Configuration(
                "heartbeat interval_in_ms must be greater than 0".into(),
            ));
        }
        if self.interval_in_ms >= self.timeout_in_ms {
            return Err(Error::Configuration(format!(
                "heartbeat interval_in_ms ({}) must be less than timeout_in_ms ({})",
                self.interval_in_ms, self.timeout_in_ms
            )));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_in_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_in_ms)
    }
}

fn default_interval() -> u64 {
    5_000
}
fn default_timeout() -> u64 {
    60_000
}
