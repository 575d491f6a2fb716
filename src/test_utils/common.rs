use std::time::Duration;

use tokio::time::Instant;

use crate::BackoffPolicy;
use crate::ClientConfig;
use crate::ReconnectMode;

/// Configuration with short timers so tests finish quickly under a paused clock
pub fn fast_config(addresses: &[&str]) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.cluster.cluster_name = "test-cluster".to_string();
    config.cluster.addresses = addresses.iter().map(|a| a.to_string()).collect();
    config.cluster.client_name = "test-client".to_string();
    config.network.connect_timeout_in_ms = 200;
    config.network.cluster_connect_timeout_in_ms = 2_000;
    config.heartbeat.interval_in_ms = 100;
    config.heartbeat.timeout_in_ms = 500;
    config.reconnect.mode = ReconnectMode::On;
    config.reconnect.backoff = BackoffPolicy {
        max_attempts: 0,
        initial_backoff_in_ms: 100,
        max_backoff_in_ms: 400,
        multiplier: 2.0,
        jitter: 0.0,
    };
    config
}

/// Polls `condition` every few milliseconds until it holds or `within` elapses.
///
/// Returns whether the condition was met.
pub async fn wait_until<F>(
    mut condition: F,
    within: Duration,
) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
