//! Cluster reconnection.
//!
//! The [`ReconnectionController`] reacts to the loss of the last live
//! connection by running one reconnection cycle at a time: discover
//! addresses, connect with backoff, re-establish the session through the
//! [`SessionInitializer`] hook and announce `ClusterReconnected`.

mod controller;
mod session;

pub use controller::*;
pub use session::*;
