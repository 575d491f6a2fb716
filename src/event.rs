//! Connection lifecycle events.
//!
//! Listeners registered through [`EventBus::register`] run synchronously on
//! the thread performing the mutation that produced the event, while the
//! emitting component still holds its lock. They must not call back into the
//! component that emitted the event and must not block; hand work off to a
//! task or a channel instead. Async observers use [`EventBus::subscribe`].

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::broadcast;
use tracing::trace;

use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::ConnectionId;
use crate::Error;
use crate::Member;

/// Why a connection left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// No heartbeat activity within the configured timeout
    HeartbeatTimeout,
    /// Peer closed the channel
    ClosedByPeer,
    /// An operation observed a broken channel
    IoError,
    /// Membership event reported the member gone
    MemberRemoved,
    /// Session re-establishment failed on this connection
    SessionInitFailed,
    /// Client shutdown
    Shutdown,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalReason::HeartbeatTimeout => "heartbeat_timeout",
            RemovalReason::ClosedByPeer => "closed_by_peer",
            RemovalReason::IoError => "io_error",
            RemovalReason::MemberRemoved => "member_removed",
            RemovalReason::SessionInitFailed => "session_init_failed",
            RemovalReason::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Started,
    ShuttingDown,
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    ConnectionAdded {
        connection_id: ConnectionId,
        member: Member,
    },
    ConnectionRemoved {
        connection_id: ConnectionId,
        member: Member,
        reason: RemovalReason,
    },
    /// Liveness failure detected by the heartbeat monitor or the channel itself
    ConnectionLost {
        connection_id: ConnectionId,
        member: Member,
        reason: RemovalReason,
    },
    /// Live connection count dropped from >0 to 0
    AllConnectionsLost,
    /// Live connection count rose from 0 to >0
    ConnectionRestored,
    /// A reconnection cycle completed, session state is re-established
    ClusterReconnected { member: Member },
    /// Controller gave up; the client is unusable
    ClientFatal { error: Arc<Error> },
    Lifecycle(LifecycleState),
}

pub trait EventListener: Send + Sync + 'static {
    fn on_event(
        &self,
        event: &ClientEvent,
    );
}

impl<F> EventListener for F
where
    F: Fn(&ClientEvent) + Send + Sync + 'static,
{
    fn on_event(
        &self,
        event: &ClientEvent,
    ) {
        self(event)
    }
}

/// Publish/subscribe channel shared by all lifecycle components
pub struct EventBus {
    listeners: ArcSwap<Vec<Arc<dyn EventListener>>>,
    sender: broadcast::Sender<ClientEvent>,
    closed: AtomicBool,
}

impl std::fmt::Debug for EventBus {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.load().len())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            listeners: ArcSwap::from_pointee(Vec::new()),
            sender,
            closed: AtomicBool::new(false),
        }
    }

    /// Adds a synchronous listener. Listeners are invoked in registration order.
    pub fn register(
        &self,
        listener: Arc<dyn EventListener>,
    ) {
        self.listeners.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(listener.clone());
            next
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    pub fn emit(
        &self,
        event: ClientEvent,
    ) {
        if self.closed.load(Ordering::Acquire) {
            trace!(?event, "event bus closed, dropping event");
            return;
        }
        trace!(?event, "emit");
        for listener in self.listeners.load().iter() {
            listener.on_event(&event);
        }
        let _ = self.sender.send(event);
    }

    /// Stops all further emission
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
