use std::time::Duration;

// -
// Configuration

/// Prefix of environment variables overriding `ClientConfig`
pub(crate) const CONFIG_ENV_PREFIX: &str = "CLUSTER_CONN";

// -
// Liveness

/// Shortest heartbeat interval the monitor accepts
pub(crate) const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

// -
// Reconnection

/// Largest growth factor accepted for reconnection backoff
pub(crate) const MAX_BACKOFF_MULTIPLIER: f64 = 100.0;

// -
// Event bus

/// Capacity of the broadcast channel handed to async subscribers
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

// -
// Transport

/// Upper bound of a single encoded frame
pub(crate) const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Capacity of the outbound frame queue per connection
pub(crate) const OUTBOUND_QUEUE_CAPACITY: usize = 1024;
