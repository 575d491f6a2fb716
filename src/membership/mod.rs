//! Cluster member identities and the discovery hook used during (re)connection.
//!
//! The client never takes part in the membership protocol. It only keeps the
//! addresses it learned from membership events so that a reconnection attempt
//! can reach members that joined after start, and treats member identity as
//! opaque: a restarted member comes back with a new UUID.

mod member_list;
pub use member_list::*;


use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::Result;

/// One node of the cluster as seen by the client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    pub uuid: Uuid,
    pub address: String,
}

impl Member {
    pub fn new(
        uuid: Uuid,
        address: impl Into<String>,
    ) -> Self {
        Self {
            uuid,
            address: address.into(),
        }
    }
}

impl fmt::Display for Member {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Member[{}]({})", self.address, self.uuid)
    }
}

/// Source of reachable member addresses
///
/// Called once per connection attempt while reconnecting, so implementations
/// should be cheap and must tolerate repeated calls.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MemberDiscovery: Send + Sync + 'static {
    async fn addresses(&self) -> Result<Vec<String>>;
}
