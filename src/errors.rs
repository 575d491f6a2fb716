//! Client Connection Lifecycle Error Hierarchy
//!
//! Defines the error types surfaced by the connection lifecycle manager,
//! split between caller-facing failures and transport-level detail.

use std::time::Duration;

use config::ConfigError;
use uuid::Uuid;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transient loss of the connection an operation was bound to
    #[error("Connection to member {member} lost: {reason}")]
    ConnectionLost { member: Uuid, reason: String },

    /// Bounded reconnection policy ran out of attempts
    #[error("Reconnection exhausted after {attempts} attempts")]
    ReconnectionExhausted { attempts: u32 },

    /// Non-retryable operation submitted while no connection is available
    #[error("Operation rejected: client is disconnected from the cluster")]
    OperationRejectedDisconnected,

    /// Invalid cluster or target settings; never retried
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Configuration source loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport detail for a single connection
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Operation rejected by the member that executed it
    #[error("Remote error: {0}")]
    Remote(String),

    /// Client was shut down before the operation completed
    #[error("Client is shut down")]
    ClientShutdown,

    /// Backpressure on the invocation queue
    #[error("Too many pending invocations (limit {limit})")]
    TooManyPendingInvocations { limit: usize },

    /// Unrecoverable failures requiring client termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// Channel was closed before the request was written
    #[error("Channel closed, request not sent")]
    NotSent,

    /// Request was written but the channel closed before a response arrived
    #[error("Channel disconnected while request was in flight")]
    Disconnected,

    /// Connect or probe timeout
    #[error("Timeout to {address} after {duration:?}")]
    Timeout { address: String, duration: Duration },

    /// Socket level failures
    #[error("I/O error: {0}")]
    Io(String),

    /// Frame encoding or decoding failures
    #[error("Codec error: {0}")]
    Codec(String),

    /// Authentication handshake failures other than cluster mismatch
    #[error("Handshake with {address} failed: {reason}")]
    Handshake { address: String, reason: String },
}

impl Error {
    /// Transient errors are retried internally and never surfaced one by one
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ConnectionLost { .. } | Error::Network(_)
        )
    }

    /// Errors that terminate the client
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_) | Error::ReconnectionExhausted { .. } | Error::Fatal(_)
        )
    }

    /// Copy of the error suitable for fanning out to many waiters
    ///
    /// `ConfigError` is not `Clone`, so it collapses into `Configuration`.
    pub(crate) fn duplicate(&self) -> Error {
        match self {
            Error::ConnectionLost { member, reason } => Error::ConnectionLost {
                member: *member,
                reason: reason.clone(),
            },
            Error::ReconnectionExhausted { attempts } => Error::ReconnectionExhausted {
                attempts: *attempts,
            },
            Error::OperationRejectedDisconnected => Error::OperationRejectedDisconnected,
            Error::Configuration(msg) => Error::Configuration(msg.clone()),
            Error::Config(e) => Error::Configuration(e.to_string()),
            Error::Network(e) => Error::Network(e.clone()),
            Error::Remote(msg) => Error::Remote(msg.clone()),
            Error::ClientShutdown => Error::ClientShutdown,
            Error::TooManyPendingInvocations { limit } => {
                Error::TooManyPendingInvocations { limit: *limit }
            }
            Error::Fatal(msg) => Error::Fatal(msg.clone()),
        }
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(e: std::io::Error) -> Self {
        NetworkError::Io(e.to_string())
    }
}

impl From<bincode::Error> for NetworkError {
    fn from(e: bincode::Error) -> Self {
        NetworkError::Codec(e.to_string())
    }
}
