//! Connections to cluster members.
//!
//! - [`Connector`] / [`MemberChannel`]: transport seam, one channel per member
//! - [`Connection`]: liveness state wrapped around a channel
//! - [`ConnectionRegistry`]: the set of LIVE connections and their events
//! - [`HeartbeatMonitor`]: per-connection liveness probing
//! - [`tcp`]: framed TCP implementation of the transport seam

mod connection;
mod heartbeat;
mod registry;
pub mod tcp;

pub use connection::*;
pub use heartbeat::*;
pub use registry::*;

#[cfg(test)]
mod tcp_test;

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Member;
use crate::NetworkError;
use crate::Operation;
use crate::OperationResult;
use crate::Result;

/// Opens authenticated channels to members
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connects to `address` and completes the handshake.
    ///
    /// # Errors
    /// - `Error::Configuration` if the member belongs to another cluster
    /// - `Error::Network` for transient failures
    async fn connect(
        &self,
        address: &str,
    ) -> Result<Arc<dyn MemberChannel>>;
}

/// An authenticated, bidirectional channel to one member
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MemberChannel: Send + Sync + 'static {
    /// Identity reported by the member during the handshake
    fn member(&self) -> Member;

    fn local_address(&self) -> Option<String>;

    /// Liveness probe round trip
    async fn ping(&self) -> std::result::Result<(), NetworkError>;

    /// Executes an operation on the member.
    ///
    /// # Errors
    /// - `Error::Network(NetworkError::NotSent)` if nothing reached the wire
    /// - `Error::Network(NetworkError::Disconnected)` if the channel died after the request was
    ///   written
    /// - `Error::Remote` if the member rejected the operation
    async fn invoke(
        &self,
        operation: Operation,
    ) -> Result<OperationResult>;

    /// Resolves once the channel is closed from either side
    async fn closed(&self);

    /// Tears the channel down; pending requests fail with `Disconnected`
    fn close(&self);
}
