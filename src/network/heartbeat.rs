use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::Connection;
use super::ConnectionId;
use super::LivenessSink;
use crate::constants::MIN_HEARTBEAT_INTERVAL;
use crate::metrics::HEARTBEAT_TIMEOUTS;
use crate::RemovalReason;

/// Per-connection probe bookkeeping, owned by the probing task
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatRecord {
    pub last_success: Instant,
    pub interval: Duration,
    pub timeout: Duration,
}

impl HeartbeatRecord {
    pub fn new(
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            last_success: Instant::now(),
            interval,
            timeout,
        }
    }

    /// Time since the last proof of life, counting both probes and other inbound traffic
    pub(crate) fn silent_for(
        &self,
        connection: &Connection,
        now: Instant,
    ) -> Duration {
        let last = self.last_success.max(connection.last_activity());
        now.saturating_duration_since(last)
    }
}

struct MonitorHandle {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Probes every monitored connection on its own task
///
/// A connection that stays silent for `timeout` is reported to the
/// [`LivenessSink`] exactly once and monitoring for it ends. The monitor never
/// closes sockets itself.
pub struct HeartbeatMonitor {
    sink: Arc<dyn LivenessSink>,
    tasks: Arc<DashMap<ConnectionId, MonitorHandle>>,
    shutdown: CancellationToken,
}

impl HeartbeatMonitor {
    pub fn new(sink: Arc<dyn LivenessSink>) -> Self {
        Self {
            sink,
            tasks: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Starts probing `connection` every `interval`.
    ///
    /// A zero interval is raised to a minimal one and `timeout` never drops
    /// below the interval.
    pub fn start_monitoring(
        &self,
        connection: Arc<Connection>,
        interval: Duration,
        timeout: Duration,
    ) {
        if self.shutdown.is_cancelled() {
            debug!(connection_id = connection.id(), "monitor is shut down, skip");
            return;
        }
        let id = connection.id();
        if interval < MIN_HEARTBEAT_INTERVAL || timeout < interval {
            warn!(connection_id = id, ?interval, ?timeout, "heartbeat timing out of range, clamping");
        }
        let interval = interval.max(MIN_HEARTBEAT_INTERVAL);
        let timeout = timeout.max(interval);
        let cancel = self.shutdown.child_token();
        let record = HeartbeatRecord::new(interval, timeout);

        let entry = MonitorHandle {
            cancel: cancel.clone(),
            handle: None,
        };
        if let Some(previous) = self.tasks.insert(id, entry) {
            previous.cancel.cancel();
        }

        let handle = tokio::spawn(probe_loop(
            connection,
            record,
            self.sink.clone(),
            self.tasks.clone(),
            cancel,
        ));
        // the task may already be gone if the channel was closed on arrival
        if let Some(mut entry) = self.tasks.get_mut(&id) {
            entry.handle = Some(handle);
        }
        debug!(connection_id = id, ?interval, ?timeout, "heartbeat monitoring started");
    }

    /// Cancels probing for one connection; unknown ids are ignored
    pub fn stop(
        &self,
        connection_id: ConnectionId,
    ) {
        if let Some((_, monitor)) = self.tasks.remove(&connection_id) {
            monitor.cancel.cancel();
            trace!(connection_id, "heartbeat monitoring stopped");
        }
    }

    pub fn monitored(&self) -> usize {
        self.tasks.len()
    }

    /// Cancels every probe task and waits for them to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let ids: Vec<ConnectionId> = self.tasks.iter().map(|e| *e.key()).collect();
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, monitor)) = self.tasks.remove(&id) {
                handles.extend(monitor.handle);
            }
        }
        for handle in handles {
            let _ = handle.await;
        }
        debug!("heartbeat monitor shut down");
    }
}

async fn probe_loop(
    connection: Arc<Connection>,
    mut record: HeartbeatRecord,
    sink: Arc<dyn LivenessSink>,
    tasks: Arc<DashMap<ConnectionId, MonitorHandle>>,
    cancel: CancellationToken,
) {
    let id = connection.id();
    let mut ticker = tokio::time::interval_at(Instant::now() + record.interval, record.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = connection.channel().closed() => break RemovalReason::ClosedByPeer,
            _ = ticker.tick() => {}
        }

        let silent_for = record.silent_for(&connection, Instant::now());
        if silent_for >= record.timeout {
            warn!(
                connection_id = id,
                member = %connection.member(),
                ?silent_for,
                "heartbeat timed out"
            );
            HEARTBEAT_TIMEOUTS.inc();
            break RemovalReason::HeartbeatTimeout;
        }

        // a hung probe must not outlive the timeout
        let budget = (record.timeout - silent_for).min(record.interval);
        tokio::select! {
            _ = cancel.cancelled() => return,
            result = tokio::time::timeout(budget, connection.channel().ping()) => match result {
                Ok(Ok(())) => {
                    record.last_success = Instant::now();
                    trace!(connection_id = id, "heartbeat ok");
                }
                Ok(Err(e)) => debug!(connection_id = id, "heartbeat failed: {}", e),
                Err(_) => debug!(connection_id = id, ?budget, "heartbeat probe timed out"),
            }
        }
    };

    if cancel.is_cancelled() {
        return;
    }
    sink.connection_lost(id, reason);
    tasks.remove(&id);
}
