use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use super::Connection;
use super::ConnectionId;
use super::ConnectionState;
use crate::metrics::CONNECTIONS_REMOVED;
use crate::metrics::LIVE_CONNECTIONS;
use crate::ClientEvent;
use crate::EventBus;
use crate::RemovalReason;

/// Receiver of liveness failures detected outside the registry
#[cfg_attr(test, automock)]
pub trait LivenessSink: Send + Sync + 'static {
    /// Returns `true` if this call performed the transition
    fn connection_lost(
        &self,
        connection_id: ConnectionId,
        reason: RemovalReason,
    ) -> bool;
}

/// Tracks the LIVE connections of the client
///
/// Every mutation runs under one lock and emits its events before the lock
/// is released, so a listener always observes a count that matches the event.
/// `count()` is a lock-free snapshot.
pub struct ConnectionRegistry {
    connections: Mutex<BTreeMap<ConnectionId, Arc<Connection>>>,
    live: AtomicUsize,
    next_id: AtomicU64,
    round_robin: AtomicUsize,
    events: Arc<EventBus>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry").field("live", &self.count()).finish()
    }
}

impl ConnectionRegistry {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            connections: Mutex::new(BTreeMap::new()),
            live: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            round_robin: AtomicUsize::new(0),
            events,
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a freshly opened connection and marks it LIVE.
    ///
    /// Returns `false` (and leaves the connection untouched) if the member
    /// already has a live connection or the connection is not CONNECTING.
    pub fn add(
        &self,
        connection: Arc<Connection>,
    ) -> bool {
        let mut connections = self.connections.lock();

        if connections.values().any(|c| c.member().uuid == connection.member().uuid) {
            debug!(member = %connection.member(), "member already connected, skip");
            return false;
        }
        if !connection.transition(ConnectionState::Connecting, ConnectionState::Live) {
            warn!(connection = ?connection, "only CONNECTING connections can be added");
            return false;
        }

        connections.insert(connection.id(), connection.clone());
        let previous = self.live.fetch_add(1, Ordering::AcqRel);
        LIVE_CONNECTIONS.set((previous + 1) as i64);
        info!(
            connection_id = connection.id(),
            member = %connection.member(),
            live = previous + 1,
            "connection added"
        );

        self.events.emit(ClientEvent::ConnectionAdded {
            connection_id: connection.id(),
            member: connection.member().clone(),
        });
        if previous == 0 {
            self.events.emit(ClientEvent::ConnectionRestored);
        }
        true
    }

    /// Removes a connection; removing an unknown or already removed id is a no-op.
    pub fn remove(
        &self,
        connection_id: ConnectionId,
        reason: RemovalReason,
    ) -> Option<Arc<Connection>> {
        self.remove_inner(connection_id, reason, false)
    }

    fn remove_inner(
        &self,
        connection_id: ConnectionId,
        reason: RemovalReason,
        lost: bool,
    ) -> Option<Arc<Connection>> {
        let mut connections = self.connections.lock();
        let connection = connections.remove(&connection_id)?;

        let next_state = match reason {
            RemovalReason::HeartbeatTimeout => ConnectionState::Stale,
            _ => ConnectionState::Closed,
        };
        // uncount before leaving LIVE so count() never exceeds the LIVE connections
        let previous = self.live.fetch_sub(1, Ordering::AcqRel);
        connection.set_state(next_state);
        LIVE_CONNECTIONS.set((previous - 1) as i64);
        CONNECTIONS_REMOVED.with_label_values(&[reason.as_str()]).inc();
        info!(
            connection_id,
            member = %connection.member(),
            ?reason,
            live = previous - 1,
            "connection removed"
        );

        if lost {
            self.events.emit(ClientEvent::ConnectionLost {
                connection_id,
                member: connection.member().clone(),
                reason,
            });
        }
        self.events.emit(ClientEvent::ConnectionRemoved {
            connection_id,
            member: connection.member().clone(),
            reason,
        });
        if previous == 1 {
            warn!("all connections to the cluster are lost");
            self.events.emit(ClientEvent::AllConnectionsLost);
        }
        drop(connections);

        connection.channel().close();
        Some(connection)
    }

    /// Removes every connection, e.g. during shutdown
    pub fn close_all(
        &self,
        reason: RemovalReason,
    ) {
        let ids: Vec<ConnectionId> = self.connections.lock().keys().copied().collect();
        for id in ids {
            self.remove(id, reason);
        }
    }

    pub fn count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().values().cloned().collect()
    }

    pub fn get(
        &self,
        connection_id: ConnectionId,
    ) -> Option<Arc<Connection>> {
        self.connections.lock().get(&connection_id).cloned()
    }

    pub fn connection_for_member(
        &self,
        uuid: &Uuid,
    ) -> Option<Arc<Connection>> {
        self.connections.lock().values().find(|c| &c.member().uuid == uuid).cloned()
    }

    /// Picks a LIVE connection for an operation.
    ///
    /// Operations with a routing key always land on the same connection while
    /// the connection set is unchanged; the others are spread round robin.
    pub fn pick(
        &self,
        key: Option<&[u8]>,
    ) -> Option<Arc<Connection>> {
        let connections = self.connections.lock();
        if connections.is_empty() {
            return None;
        }
        let index = match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % connections.len() as u64) as usize
            }
            None => self.round_robin.fetch_add(1, Ordering::Relaxed) % connections.len(),
        };
        connections.values().nth(index).cloned()
    }
}

impl LivenessSink for ConnectionRegistry {
    fn connection_lost(
        &self,
        connection_id: ConnectionId,
        reason: RemovalReason,
    ) -> bool {
        self.remove_inner(connection_id, reason, true).is_some()
    }
}
