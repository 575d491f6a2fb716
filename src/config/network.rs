use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Connection establishment parameters
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    /// Maximum time to wait for a single member connection (TCP + handshake)
    /// Default: 5 seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_in_ms: u64,

    /// Total time budget for the initial cluster connection during start
    /// Default: 20 seconds
    #[serde(default = "default_cluster_connect_timeout")]
    pub cluster_connect_timeout_in_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_in_ms: default_connect_timeout(),
            cluster_connect_timeout_in_ms: default_cluster_connect_timeout(),
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_in_ms == 0 {
            return Err(Error::Configuration(
                "connect_timeout_in_ms must be greater than 0".into(),
            ));
        }
        if self.cluster_connect_timeout_in_ms < self.connect_timeout_in_ms {
            return Err(Error::Configuration(format!(
                "cluster_connect_timeout_in_ms ({}) must be >= connect_timeout_in_ms ({})",
                self.cluster_connect_timeout_in_ms, self.connect_timeout_in_ms
            )));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_in_ms)
    }

    pub fn cluster_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster_connect_timeout_in_ms)
    }
}

fn default_connect_timeout() -> u64 {
    5_000
}
fn default_cluster_connect_timeout() -> u64 {
    20_000
}
