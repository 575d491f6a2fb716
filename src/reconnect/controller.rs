use std::fmt;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::SessionInitializer;
use crate::metrics::RECONNECT_ATTEMPTS;
use crate::utils::backoff::Backoff;
use crate::ClientConfig;
use crate::ClientEvent;
use crate::Connection;
use crate::ConnectionRegistry;
use crate::Connector;
use crate::Error;
use crate::EventBus;
use crate::EventListener;
use crate::HeartbeatConfig;
use crate::HeartbeatMonitor;
use crate::Member;
use crate::MemberDiscovery;
use crate::NetworkConfig;
use crate::NetworkError;
use crate::ReconnectConfig;
use crate::ReconnectMode;
use crate::RemovalReason;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControllerState {
    Idle = 0,
    Reconnecting = 1,
    Connected = 2,
    Shutdown = 3,
}

impl From<u8> for ControllerState {
    fn from(v: u8) -> Self {
        match v {
            0 => ControllerState::Idle,
            1 => ControllerState::Reconnecting,
            2 => ControllerState::Connected,
            _ => ControllerState::Shutdown,
        }
    }
}

/// Drives the client back onto the cluster after it lost every connection
///
/// Only one reconnection cycle runs at a time. A cycle ends in `Connected`
/// (after the session hook succeeded and `ClusterReconnected` was emitted)
/// or in `Shutdown`, either on request or because reconnecting became
/// impossible.
pub struct ReconnectionController {
    smart_routing: bool,
    network: NetworkConfig,
    heartbeat: HeartbeatConfig,
    reconnect: ReconnectConfig,

    registry: Arc<ConnectionRegistry>,
    monitor: Arc<HeartbeatMonitor>,
    connector: Arc<dyn Connector>,
    discovery: Arc<dyn MemberDiscovery>,
    session: Arc<dyn SessionInitializer>,
    events: Arc<EventBus>,

    state: Mutex<ControllerState>,
    snapshot: AtomicU8,
    wakeup: Notify,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    me: Weak<Self>,
}

impl fmt::Debug for ReconnectionController {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ReconnectionController")
            .field("state", &self.state())
            .field("mode", &self.reconnect.mode)
            .finish()
    }
}

impl ReconnectionController {
    pub fn new(
        config: &ClientConfig,
        registry: Arc<ConnectionRegistry>,
        monitor: Arc<HeartbeatMonitor>,
        connector: Arc<dyn Connector>,
        discovery: Arc<dyn MemberDiscovery>,
        session: Arc<dyn SessionInitializer>,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            smart_routing: config.cluster.smart_routing,
            network: config.network.clone(),
            heartbeat: config.heartbeat,
            reconnect: config.reconnect,
            registry,
            monitor,
            connector,
            discovery,
            session,
            events,
            state: Mutex::new(ControllerState::Idle),
            snapshot: AtomicU8::new(ControllerState::Idle as u8),
            wakeup: Notify::new(),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
            me: me.clone(),
        })
    }

    /// Lock-free view of the current state
    pub fn state(&self) -> ControllerState {
        self.snapshot.load(Ordering::Acquire).into()
    }

    fn set_state(
        &self,
        guard: &mut ControllerState,
        next: ControllerState,
    ) {
        debug!(from = ?*guard, to = ?next, "controller state change");
        *guard = next;
        self.snapshot.store(next as u8, Ordering::Release);
    }

    /// Listener through which the registry reports the loss of the last connection
    pub fn listener(&self) -> Arc<dyn EventListener> {
        let controller = self.me.clone();
        Arc::new(move |event: &ClientEvent| {
            if let ClientEvent::AllConnectionsLost = event {
                if let Some(controller) = controller.upgrade() {
                    controller.on_all_connections_lost();
                }
            }
        })
    }

    pub fn on_all_connections_lost(&self) {
        let mut state = self.state.lock();
        match *state {
            ControllerState::Idle | ControllerState::Connected => {}
            ControllerState::Reconnecting => {
                debug!("already reconnecting, ignoring connection loss");
                return;
            }
            ControllerState::Shutdown => return,
        }

        if self.reconnect.mode == ReconnectMode::Off {
            error!("lost every connection to the cluster and reconnection is off");
            self.set_state(&mut state, ControllerState::Shutdown);
            self.shutdown.cancel();
            self.events.emit(ClientEvent::ClientFatal {
                error: Arc::new(Error::Fatal(
                    "connection to the cluster lost and reconnect mode is off".to_string(),
                )),
            });
            return;
        }

        info!("lost every connection to the cluster, reconnecting");
        self.set_state(&mut state, ControllerState::Reconnecting);
        self.wakeup.notify_one();
    }

    /// Spawns the background task that runs reconnection cycles
    pub fn spawn(&self) {
        let Some(this) = self.me.upgrade() else {
            return;
        };
        let mut task = self.task.lock();
        if task.is_some() || self.shutdown.is_cancelled() {
            return;
        }
        *task = Some(tokio::spawn(this.run()));
    }

    async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.wakeup.notified() => {}
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.reconnect_until_connected() => {}
            }
        }
        debug!("reconnection task stopped");
    }

    /// Initial connection used while starting the client.
    ///
    /// Same attempt loop as a reconnection cycle, bounded by the cluster
    /// connect timeout. No session hook runs since there is no prior session.
    pub async fn connect_initial(&self) -> Result<Member> {
        self.connect_initial_then(|| {}).await
    }

    /// Like [`connect_initial`](Self::connect_initial), running `on_connected`
    /// in the same step as the `Idle -> Connected` transition.
    ///
    /// `on_connected` runs under the controller lock and only while a LIVE
    /// connection exists, so a loss racing the transition is always observed
    /// after it. It must not block or call back into the controller.
    pub async fn connect_initial_then<F>(
        &self,
        on_connected: F,
    ) -> Result<Member>
    where
        F: FnOnce() + Send,
    {
        let budget = self.network.cluster_connect_timeout();
        let connection = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(Error::ClientShutdown),
            result = tokio::time::timeout(budget, self.connect_with_backoff(false)) => match result {
                Ok(result) => result?,
                Err(_) => {
                    return Err(Error::Fatal(format!(
                        "unable to connect to any cluster member within {budget:?}"
                    )))
                }
            }
        };

        let member = connection.member().clone();
        {
            let mut state = self.state.lock();
            match *state {
                ControllerState::Idle => {
                    self.set_state(&mut state, ControllerState::Connected);
                    if self.registry.count() > 0 {
                        on_connected();
                    }
                }
                ControllerState::Shutdown => return Err(Error::ClientShutdown),
                // lost again already; the background cycle owns it now
                _ => {}
            }
        }
        info!(%member, "connected to cluster");

        if self.smart_routing {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(Error::ClientShutdown),
                _ = self.connect_remaining() => {}
            }
        }
        Ok(member)
    }

    async fn reconnect_until_connected(&self) {
        loop {
            match self.connect_with_backoff(true).await {
                Ok(connection) => {
                    let member = connection.member().clone();
                    {
                        let mut state = self.state.lock();
                        if *state == ControllerState::Shutdown {
                            return;
                        }
                        if self.registry.count() == 0 {
                            warn!(%member, "connection lost before the cycle completed, retrying");
                            continue;
                        }
                        self.set_state(&mut state, ControllerState::Connected);
                        info!(%member, "reconnected to cluster");
                        self.events.emit(ClientEvent::ClusterReconnected { member });
                    }
                    if self.smart_routing {
                        self.connect_remaining().await;
                    }
                    return;
                }
                Err(Error::ClientShutdown) => return,
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        }
    }

    /// Attempt loop of one cycle; returns the connection that completed it
    async fn connect_with_backoff(
        &self,
        initialize_session: bool,
    ) -> Result<Arc<Connection>> {
        let mut backoff = Backoff::new(self.reconnect.backoff);
        loop {
            if self.shutdown.is_cancelled() {
                return Err(Error::ClientShutdown);
            }
            let attempt = backoff.begin_attempt();
            RECONNECT_ATTEMPTS.inc();

            match self.try_connect_cluster(initialize_session).await {
                Ok(connection) => {
                    debug!(attempt, member = %connection.member(), "cluster connection attempt succeeded");
                    return Ok(connection);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(Error::ClientShutdown) => return Err(Error::ClientShutdown),
                Err(e) => debug!(attempt, "cluster connection attempt failed: {}", e),
            }

            let Some(delay) = backoff.next_delay() else {
                warn!(attempts = backoff.attempts(), "giving up on the cluster");
                return Err(Error::ReconnectionExhausted {
                    attempts: backoff.attempts(),
                });
            };
            debug!(?delay, "waiting before the next attempt");
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(Error::ClientShutdown),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Tries every discovered address once, in order
    async fn try_connect_cluster(
        &self,
        initialize_session: bool,
    ) -> Result<Arc<Connection>> {
        let addresses = self.discovery.addresses().await?;
        let mut last_error: Option<Error> = None;

        for address in addresses {
            if self.shutdown.is_cancelled() {
                return Err(Error::ClientShutdown);
            }
            let connection = match self.open_connection(&address).await {
                Ok(connection) => connection,
                Err(Error::ClientShutdown) => return Err(Error::ClientShutdown),
                Err(e @ Error::Configuration(_)) => {
                    error!(address, "member rejected the client: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    debug!(address, "unable to connect: {}", e);
                    last_error = Some(e);
                    continue;
                }
            };

            if initialize_session {
                if let Err(e) = self.session.initialize_on_cluster(&connection).await {
                    warn!(member = %connection.member(), "session initialization failed: {}", e);
                    self.registry.remove(connection.id(), RemovalReason::SessionInitFailed);
                    return Err(e);
                }
            }
            return Ok(connection);
        }

        Err(last_error.unwrap_or_else(|| NetworkError::Io("no member address to connect to".to_string()).into()))
    }

    /// Connects to one address, registers the connection and starts probing it
    pub(crate) async fn open_connection(
        &self,
        address: &str,
    ) -> Result<Arc<Connection>> {
        let timeout = self.network.connect_timeout();
        let channel = match tokio::time::timeout(timeout, self.connector.connect(address)).await {
            Ok(channel) => channel?,
            Err(_) => {
                return Err(NetworkError::Timeout {
                    address: address.to_string(),
                    duration: timeout,
                }
                .into())
            }
        };

        if self.shutdown.is_cancelled() {
            channel.close();
            return Err(Error::ClientShutdown);
        }

        let connection = Arc::new(Connection::new(self.registry.next_connection_id(), channel));
        if !self.registry.add(connection.clone()) {
            connection.channel().close();
            return self
                .registry
                .connection_for_member(&connection.member().uuid)
                .ok_or_else(|| NetworkError::Io(format!("connection to {address} was dropped")).into());
        }
        // shutdown may have swept the registry between the check above and the add
        if self.shutdown.is_cancelled() {
            self.registry.remove(connection.id(), RemovalReason::Shutdown);
            return Err(Error::ClientShutdown);
        }
        self.monitor.start_monitoring(
            connection.clone(),
            self.heartbeat.interval(),
            self.heartbeat.timeout(),
        );
        Ok(connection)
    }

    /// Best effort connections to every member not connected yet
    async fn connect_remaining(&self) {
        let addresses = match self.discovery.addresses().await {
            Ok(addresses) => addresses,
            Err(e) => {
                debug!("discovery failed: {}", e);
                return;
            }
        };
        for address in addresses {
            if self.shutdown.is_cancelled() {
                return;
            }
            let connected = self.registry.all().iter().any(|c| c.remote_address() == address);
            if connected {
                continue;
            }
            if let Err(e) = self.open_connection(&address).await {
                debug!(address, "optional member connection failed: {}", e);
            }
        }
    }

    fn fail(
        &self,
        error: Error,
    ) {
        let mut state = self.state.lock();
        if *state == ControllerState::Shutdown {
            return;
        }
        error!("reconnection failed permanently: {}", error);
        self.set_state(&mut state, ControllerState::Shutdown);
        self.shutdown.cancel();
        self.events.emit(ClientEvent::ClientFatal {
            error: Arc::new(error),
        });
    }

    /// Moves to `Shutdown`, cancels any pending backoff and waits for the task
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if *state != ControllerState::Shutdown {
                self.set_state(&mut state, ControllerState::Shutdown);
            }
        }
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        debug!("reconnection controller shut down");
    }
}
