//! Client-side connection lifecycle management for a clustered data store.
//!
//! Keeps a set of authenticated connections to cluster members alive,
//! detects dead connections through heartbeats, reconnects with backoff once
//! every connection is gone and parks retryable operations until the cluster
//! is reachable again.

mod client;
mod config;
mod constants;
mod errors;
mod event;
mod invocation;
mod membership;
pub mod metrics;
pub mod network;
mod reconnect;
pub(crate) mod utils;

pub use client::*;
pub use config::*;
pub use errors::*;
pub use event::*;
pub use invocation::*;
pub use membership::*;
pub use network::*;
pub use reconnect::*;

#[cfg(test)]
mod event_test;

//-----------------------------------------------------------
// Test utils

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
