use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use tracing::error;

#[cfg(test)]
mod metrics_test;

lazy_static! {
    pub static ref LIVE_CONNECTIONS: IntGauge =
        IntGauge::new("client_live_connections", "Number of LIVE member connections")
            .expect("metric can not be created");

    pub static ref CONNECTIONS_REMOVED: IntCounterVec = IntCounterVec::new(
        Opts::new("client_connections_removed", "Connections removed from the registry"),
        &["reason"]
    )
    .expect("metric can not be created");

    pub static ref HEARTBEAT_TIMEOUTS: IntCounter = IntCounter::new(
        "client_heartbeat_timeouts",
        "Connections declared stale by the heartbeat monitor"
    )
    .expect("metric can not be created");

    pub static ref RECONNECT_ATTEMPTS: IntCounter = IntCounter::new(
        "client_reconnect_attempts",
        "Reconnection attempts across all cycles"
    )
    .expect("metric can not be created");

    pub static ref QUEUED_INVOCATIONS: IntGauge = IntGauge::new(
        "client_queued_invocations",
        "Invocations waiting for a connection"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

pub fn register_custom_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(LIVE_CONNECTIONS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(CONNECTIONS_REMOVED.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(HEARTBEAT_TIMEOUTS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(RECONNECT_ATTEMPTS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(QUEUED_INVOCATIONS.clone()))
            .expect("collector can be registered");
    });
}

/// Renders the client registry in the prometheus text format
pub fn gather_metrics() -> String {
    register_custom_metrics();
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
