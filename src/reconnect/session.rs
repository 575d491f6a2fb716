use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Connection;
use crate::Result;

/// Re-establishes client-side session state after the cluster came back
///
/// Called exactly once per successful reconnection cycle, on the first
/// connection of that cycle, before `ClusterReconnected` is emitted. An
/// error closes that connection and the cycle keeps trying.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SessionInitializer: Send + Sync + 'static {
    async fn initialize_on_cluster(
        &self,
        connection: &Arc<Connection>,
    ) -> Result<()>;
}

/// Used when the application has no session state to restore
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSessionInitializer;

#[async_trait]
impl SessionInitializer for NoopSessionInitializer {
    async fn initialize_on_cluster(
        &self,
        _connection: &Arc<Connection>,
    ) -> Result<()> {
        Ok(())
    }
}
