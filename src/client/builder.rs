use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;

use super::Client;
use super::ClientInner;
use crate::metrics::register_custom_metrics;
use crate::network::tcp::TcpConnector;
use crate::ClientConfig;
use crate::ClientEvent;
use crate::ConnectionRegistry;
use crate::Connector;
use crate::EventBus;
use crate::EventListener;
use crate::HeartbeatMonitor;
use crate::InvocationCoordinator;
use crate::LifecycleState;
use crate::MemberDiscovery;
use crate::MemberList;
use crate::NoopSessionInitializer;
use crate::ReconnectionController;
use crate::Result;
use crate::SessionInitializer;

pub struct ClientBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    discovery: Option<Arc<dyn MemberDiscovery>>,
    session: Option<Arc<dyn SessionInitializer>>,
    listeners: Vec<Arc<dyn EventListener>>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            connector: None,
            discovery: None,
            session: None,
            listeners: Vec::new(),
        }
    }

    /// Replaces the TCP transport (default: [`TcpConnector`])
    pub fn connector(
        mut self,
        connector: Arc<dyn Connector>,
    ) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replaces the address source used while (re)connecting
    ///
    /// Default: members learned through [`Client::member_added`], then the
    /// configured seed addresses.
    pub fn discovery(
        mut self,
        discovery: Arc<dyn MemberDiscovery>,
    ) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Hook re-establishing session state after every reconnection
    pub fn session_initializer(
        mut self,
        session: Arc<dyn SessionInitializer>,
    ) -> Self {
        self.session = Some(session);
        self
    }

    /// Registers a synchronous event listener
    ///
    /// Listeners run inside the mutation that produced the event and must
    /// not block or call back into the client.
    pub fn listener(
        mut self,
        listener: Arc<dyn EventListener>,
    ) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Validates the configuration and wires the lifecycle components
    ///
    /// Nothing connects until [`Client::start`].
    pub fn build(self) -> Result<Client> {
        let config = self.config.validate()?;
        register_custom_metrics();

        let events = Arc::new(EventBus::new());
        let registry = Arc::new(ConnectionRegistry::new(events.clone()));
        let monitor = Arc::new(HeartbeatMonitor::new(registry.clone()));
        let members = Arc::new(MemberList::new(config.cluster.addresses.clone()));

        let connector = match self.connector {
            Some(connector) => connector,
            None => Arc::new(TcpConnector::from_config(&config)) as Arc<dyn Connector>,
        };
        let discovery = self
            .discovery
            .unwrap_or_else(|| members.clone() as Arc<dyn MemberDiscovery>);
        let session = self
            .session
            .unwrap_or_else(|| Arc::new(NoopSessionInitializer) as Arc<dyn SessionInitializer>);

        let controller = ReconnectionController::new(
            &config,
            registry.clone(),
            monitor.clone(),
            connector,
            discovery,
            session,
            events.clone(),
        );
        let coordinator = InvocationCoordinator::new(
            registry.clone(),
            config.invocation,
            config.reconnect.mode,
        );

        let weak_monitor = Arc::downgrade(&monitor);
        events.register(Arc::new(move |event: &ClientEvent| {
            if let ClientEvent::ConnectionRemoved { connection_id, .. } = event {
                if let Some(monitor) = weak_monitor.upgrade() {
                    monitor.stop(*connection_id);
                }
            }
        }));
        events.register(controller.listener());
        events.register(coordinator.listener());
        for listener in self.listeners {
            events.register(listener);
        }

        Ok(Client {
            inner: Arc::new(ClientInner {
                config,
                events,
                registry,
                monitor,
                controller,
                coordinator,
                members,
                lifecycle: Mutex::new(LifecycleState::Starting),
                started: AtomicBool::new(false),
            }),
        })
    }
}
