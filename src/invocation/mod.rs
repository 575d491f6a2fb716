//! Operation routing across connectivity changes.
//!
//! [`InvocationCoordinator`] binds operations to LIVE connections, queues
//! retryable ones while the cluster is unreachable and resends them after
//! the next reconnection in submission order.

mod coordinator;
mod operation;

pub use coordinator::*;
pub use operation::*;
