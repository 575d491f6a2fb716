use std::fmt;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::MemberChannel;
use crate::Member;

pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Live = 1,
    Stale = 2,
    Closed = 3,
}

impl From<u8> for ConnectionState {
    fn from(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Live,
            2 => ConnectionState::Stale,
            _ => ConnectionState::Closed,
        }
    }
}

/// Client-held channel to one member plus its liveness state
///
/// State changes out of `Live` only happen inside the registry so that the
/// live count and the state never disagree.
pub struct Connection {
    id: ConnectionId,
    member: Member,
    local_address: Option<String>,
    state: AtomicU8,
    channel: Arc<dyn MemberChannel>,
    opened_at: Instant,
    last_activity: Mutex<Instant>,
}

impl fmt::Debug for Connection {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("member", &self.member)
            .field("local_address", &self.local_address)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        channel: Arc<dyn MemberChannel>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            member: channel.member(),
            local_address: channel.local_address(),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            channel,
            opened_at: now,
            last_activity: Mutex::new(now),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn member(&self) -> &Member {
        &self.member
    }

    pub fn remote_address(&self) -> &str {
        &self.member.address
    }

    pub fn local_address(&self) -> Option<&str> {
        self.local_address.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.load(Ordering::Acquire).into()
    }

    pub fn is_live(&self) -> bool {
        self.state() == ConnectionState::Live
    }

    pub fn channel(&self) -> &Arc<dyn MemberChannel> {
        &self.channel
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Records inbound activity (a response) on this connection
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub(crate) fn transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn set_state(
        &self,
        to: ConnectionState,
    ) {
        self.state.store(to as u8, Ordering::Release);
    }
}
