//! Client facade tying the lifecycle components together
//!
//! - [`Client`] - entry point: start, submit, proxies, shutdown
//! - [`ClientBuilder`] - wiring of config, transport and hooks
//! - [`MapProxy`] - key-value operations on a named distributed map
//!
//! # Basic Usage
//! ```no_run
//! use cluster_conn::{Client, ClientConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let config = ClientConfig::new().unwrap().validate().unwrap();
//!     let client = Client::builder(config).build().unwrap();
//!     client.start().await.unwrap();
//!
//!     let map = client.map("users").await.unwrap();
//!     map.put("user:1001", "Alice").await.unwrap();
//!     let value = map.get("user:1001").await.unwrap();
//!     println!("User data: {:?}", value);
//!
//!     client.shutdown().await;
//! }
//! ```

mod builder;
mod map;

pub use builder::*;
pub use map::*;

#[cfg(test)]
mod client_test;

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::ClientConfig;
use crate::ClientEvent;
use crate::ConnectionRegistry;
use crate::ControllerState;
use crate::Error;
use crate::EventBus;
use crate::HeartbeatMonitor;
use crate::InvocationCoordinator;
use crate::LifecycleState;
use crate::Member;
use crate::MemberList;
use crate::Operation;
use crate::OperationResult;
use crate::ReconnectionController;
use crate::RemovalReason;
use crate::Result;

/// Main entry point for talking to the cluster
///
/// Cheap to clone; all clones share the same connections and queue.
/// Created through [`Client::builder`].
#[derive(Clone)]
pub struct Client {
    pub(super) inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub(super) config: ClientConfig,
    pub(super) events: Arc<EventBus>,
    pub(super) registry: Arc<ConnectionRegistry>,
    pub(super) monitor: Arc<HeartbeatMonitor>,
    pub(super) controller: Arc<ReconnectionController>,
    pub(super) coordinator: Arc<InvocationCoordinator>,
    pub(super) members: Arc<MemberList>,
    pub(super) lifecycle: Mutex<LifecycleState>,
    pub(super) started: AtomicBool,
}

impl std::fmt::Debug for Client {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.inner.config.cluster.client_name)
            .field("lifecycle", &*self.inner.lifecycle.lock())
            .field("connections", &self.connection_count())
            .finish()
    }
}

impl Client {
    /// Create a configured client builder
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Connects to the cluster.
    ///
    /// # Errors
    /// - `Error::Configuration` if a member belongs to another cluster
    /// - `Error::Fatal` if no member was reachable within the cluster connect timeout
    pub async fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            warn!(state = ?self.lifecycle_state(), "client already started");
            return Ok(());
        }
        self.inner.events.emit(ClientEvent::Lifecycle(LifecycleState::Starting));
        info!(
            client = %self.inner.config.cluster.client_name,
            cluster = %self.inner.config.cluster.cluster_name,
            "starting client"
        );

        self.inner.controller.spawn();
        let coordinator = self.inner.coordinator.clone();
        let connected = self
            .inner
            .controller
            .connect_initial_then(move || coordinator.mark_ready())
            .await;
        if let Err(e) = connected {
            warn!("client failed to start: {}", e);
            self.shutdown().await;
            return Err(e);
        }

        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if *lifecycle != LifecycleState::Starting {
                return Err(Error::ClientShutdown);
            }
            *lifecycle = LifecycleState::Started;
        }
        self.inner.events.emit(ClientEvent::Lifecycle(LifecycleState::Started));
        Ok(())
    }

    /// Submits an operation; retryable ones survive connection loss.
    pub async fn submit(
        &self,
        operation: Operation,
        retryable: bool,
    ) -> Result<OperationResult> {
        self.inner.coordinator.submit(operation, retryable).await
    }

    /// Creates (or looks up) the named map on the cluster.
    ///
    /// While the client is reconnecting this waits for the cluster to come back.
    pub async fn map(
        &self,
        name: &str,
    ) -> Result<MapProxy> {
        let operation = Operation::CreateProxy {
            service: MapProxy::SERVICE_NAME.to_string(),
            name: name.to_string(),
        };
        self.submit(operation, true).await?;
        Ok(MapProxy::new(name, self.clone()))
    }

    /// Membership event: a member joined the cluster
    pub fn member_added(
        &self,
        member: Member,
    ) {
        self.inner.members.member_added(member);
    }

    /// Membership event: a member left the cluster; its connection is closed
    pub fn member_removed(
        &self,
        uuid: &Uuid,
    ) {
        self.inner.members.member_removed(uuid);
        if let Some(connection) = self.inner.registry.connection_for_member(uuid) {
            self.inner.registry.remove(connection.id(), RemovalReason::MemberRemoved);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.inner.registry.count()
    }

    pub fn controller_state(&self) -> ControllerState {
        self.inner.controller.state()
    }

    pub fn pending_invocations(&self) -> usize {
        self.inner.coordinator.pending_invocations()
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        *self.inner.lifecycle.lock()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Stops reconnecting, closes every connection and fails queued operations.
    ///
    /// No event is emitted once this returns.
    pub async fn shutdown(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if matches!(*lifecycle, LifecycleState::ShuttingDown | LifecycleState::Shutdown) {
                return;
            }
            *lifecycle = LifecycleState::ShuttingDown;
        }
        self.inner.events.emit(ClientEvent::Lifecycle(LifecycleState::ShuttingDown));
        info!(client = %self.inner.config.cluster.client_name, "shutting down client");

        self.inner.controller.shutdown().await;
        self.inner.monitor.shutdown().await;
        self.inner.coordinator.shutdown();
        self.inner.registry.close_all(RemovalReason::Shutdown);

        *self.inner.lifecycle.lock() = LifecycleState::Shutdown;
        self.inner.events.emit(ClientEvent::Lifecycle(LifecycleState::Shutdown));
        self.inner.events.close();
        info!("client shut down");
    }
}
