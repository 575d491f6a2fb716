use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::Operation;
use super::OperationResult;
use crate::metrics::QUEUED_INVOCATIONS;
use crate::ClientEvent;
use crate::ConnectionRegistry;
use crate::Error;
use crate::EventListener;
use crate::InvocationConfig;
use crate::NetworkError;
use crate::ReconnectMode;
use crate::RemovalReason;
use crate::Result;

type Responder = oneshot::Sender<Result<OperationResult>>;

struct Invocation {
    id: u64,
    operation: Operation,
    retryable: bool,
    responder: Responder,
}

impl Invocation {
    fn complete(
        self,
        result: Result<OperationResult>,
    ) {
        if self.responder.send(result).is_err() {
            trace!(invocation_id = self.id, "caller went away before completion");
        }
    }
}

/// What happened to an invocation handed to a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatched {
    Completed,
    Requeued,
}

#[derive(Default)]
struct CoordinatorState {
    /// Keyed by submission id, so requeued invocations keep their place
    queue: BTreeMap<u64, Invocation>,
    ready: bool,
    draining: bool,
    closed: Option<Error>,
}

/// Routes operations to LIVE connections and parks them during outages
///
/// Retryable operations submitted while the cluster is unreachable wait in
/// the queue until the next `ClusterReconnected`; everything else fails fast.
/// Every invocation is completed exactly once.
pub struct InvocationCoordinator {
    registry: Arc<ConnectionRegistry>,
    config: InvocationConfig,
    mode: ReconnectMode,
    state: Mutex<CoordinatorState>,
    next_id: AtomicU64,
    in_flight: AtomicUsize,
    me: Weak<Self>,
}

impl std::fmt::Debug for InvocationCoordinator {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("InvocationCoordinator")
            .field("pending", &self.pending_invocations())
            .finish()
    }
}

impl InvocationCoordinator {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        config: InvocationConfig,
        mode: ReconnectMode,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            registry,
            config,
            mode,
            state: Mutex::new(CoordinatorState::default()),
            next_id: AtomicU64::new(1),
            in_flight: AtomicUsize::new(0),
            me: me.clone(),
        })
    }

    /// Listener feeding connectivity events back into the coordinator
    pub fn listener(&self) -> Arc<dyn EventListener> {
        let coordinator = self.me.clone();
        Arc::new(move |event: &ClientEvent| {
            if let Some(coordinator) = coordinator.upgrade() {
                coordinator.on_event(event);
            }
        })
    }

    pub fn on_event(
        &self,
        event: &ClientEvent,
    ) {
        match event {
            ClientEvent::AllConnectionsLost => {
                self.state.lock().ready = false;
                debug!("cluster unreachable, new invocations will wait or fail fast");
            }
            ClientEvent::ClusterReconnected { .. } => self.mark_ready(),
            ClientEvent::ClientFatal { error } => self.fail_all(error.duplicate()),
            _ => {}
        }
    }

    /// Opens the gate and drains whatever queued up while closed
    pub fn mark_ready(&self) {
        let mut state = self.state.lock();
        if state.closed.is_some() {
            return;
        }
        state.ready = true;
        if !state.queue.is_empty() && !state.draining {
            self.start_drain(&mut state);
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// Queued plus in-flight invocations
    pub fn pending_invocations(&self) -> usize {
        self.state.lock().queue.len() + self.in_flight.load(Ordering::Acquire)
    }

    /// Submits an operation and waits for its outcome.
    ///
    /// # Errors
    /// - `OperationRejectedDisconnected` for non-retryable operations while offline
    /// - `ConnectionLost` when the connection died with a non-resendable request in flight
    /// - `Remote` when the member rejected the operation
    /// - `ClientShutdown` or the fatal error once the client can no longer reconnect
    pub async fn submit(
        &self,
        operation: Operation,
        retryable: bool,
    ) -> Result<OperationResult> {
        let (tx, rx) = oneshot::channel();
        let invocation = Invocation {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            operation,
            retryable,
            responder: tx,
        };

        let direct = {
            let mut state = self.state.lock();
            if let Some(e) = &state.closed {
                return Err(e.duplicate());
            }
            let pending = state.queue.len() + self.in_flight.load(Ordering::Acquire);
            if pending >= self.config.max_pending_invocations {
                return Err(Error::TooManyPendingInvocations {
                    limit: self.config.max_pending_invocations,
                });
            }

            if state.ready && state.queue.is_empty() && !state.draining {
                Some(invocation)
            } else if !state.ready && (!retryable || self.mode == ReconnectMode::Async) {
                debug!(
                    operation = invocation.operation.name(),
                    "rejecting operation while disconnected"
                );
                return Err(Error::OperationRejectedDisconnected);
            } else {
                trace!(
                    invocation_id = invocation.id,
                    operation = invocation.operation.name(),
                    "queueing invocation"
                );
                state.queue.insert(invocation.id, invocation);
                QUEUED_INVOCATIONS.set(state.queue.len() as i64);
                if state.ready && !state.draining {
                    self.start_drain(&mut state);
                }
                None
            }
        };

        if let Some(invocation) = direct {
            self.dispatch(invocation).await;
        }

        match rx.await {
            Ok(result) => result,
            // responder dropped without an answer only when the coordinator is torn down
            Err(_) => Err(Error::ClientShutdown),
        }
    }

    /// Fails everything queued and refuses new work
    pub fn shutdown(&self) {
        self.fail_all(Error::ClientShutdown);
    }

    fn fail_all(
        &self,
        error: Error,
    ) {
        let queued = {
            let mut state = self.state.lock();
            if state.closed.is_some() {
                return;
            }
            state.ready = false;
            state.closed = Some(error.duplicate());
            QUEUED_INVOCATIONS.set(0);
            std::mem::take(&mut state.queue)
        };
        if !queued.is_empty() {
            warn!(count = queued.len(), %error, "failing queued invocations");
        }
        for (_, invocation) in queued {
            invocation.complete(Err(error.duplicate()));
        }
    }

    fn start_drain(
        &self,
        state: &mut CoordinatorState,
    ) {
        let Some(this) = self.me.upgrade() else {
            return;
        };
        state.draining = true;
        tokio::spawn(async move { this.drain().await });
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let batch = {
                let mut state = self.state.lock();
                if !state.ready || state.queue.is_empty() || state.closed.is_some() {
                    state.draining = false;
                    QUEUED_INVOCATIONS.set(state.queue.len() as i64);
                    return;
                }
                let batch = std::mem::take(&mut state.queue);
                QUEUED_INVOCATIONS.set(0);
                batch
            };
            debug!(count = batch.len(), "draining queued invocations");

            let lanes = lanes_by_key(batch.into_values());
            join_all(lanes.into_iter().map(|lane| self.run_lane(lane))).await;

            // a lane that stopped early put its remainder back; let removals settle first
            tokio::task::yield_now().await;
        }
    }

    /// Runs one key's invocations strictly in order
    async fn run_lane(
        &self,
        lane: Vec<Invocation>,
    ) {
        let mut lane = lane.into_iter();
        while let Some(invocation) = lane.next() {
            if self.dispatch(invocation).await == Dispatched::Requeued {
                // keep later operations on this key behind the requeued one
                for rest in lane.by_ref() {
                    self.requeue(rest);
                }
            }
        }
    }

    async fn dispatch(
        &self,
        invocation: Invocation,
    ) -> Dispatched {
        let Some(connection) = self.registry.pick(invocation.operation.routing_key()) else {
            self.suspend_if_disconnected();
            return self.requeue(invocation);
        };

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let result = connection.channel().invoke(invocation.operation.clone()).await;
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        match result {
            Ok(result) => {
                connection.touch();
                invocation.complete(Ok(result));
                Dispatched::Completed
            }
            Err(Error::Network(NetworkError::NotSent)) => {
                debug!(
                    invocation_id = invocation.id,
                    connection_id = connection.id(),
                    "request not sent, connection is gone"
                );
                self.registry.remove(connection.id(), RemovalReason::IoError);
                self.requeue(invocation)
            }
            Err(Error::Network(NetworkError::Disconnected)) => {
                self.registry.remove(connection.id(), RemovalReason::IoError);
                let resendable = invocation.operation.is_read_only() || self.config.redo_operation;
                if invocation.retryable && resendable {
                    debug!(invocation_id = invocation.id, "resending in-flight invocation");
                    self.requeue(invocation)
                } else {
                    warn!(
                        invocation_id = invocation.id,
                        operation = invocation.operation.name(),
                        member = %connection.member(),
                        "connection lost with invocation in flight"
                    );
                    invocation.complete(Err(Error::ConnectionLost {
                        member: connection.member().uuid,
                        reason: "connection closed while the request was in flight".to_string(),
                    }));
                    Dispatched::Completed
                }
            }
            Err(e) => {
                invocation.complete(Err(e));
                Dispatched::Completed
            }
        }
    }

    /// Puts an unsent invocation back in line, or fails it if it may not wait
    /// Closes the readiness gate when no LIVE connection is left, so the drain
    /// stops and waits for the next `ClusterReconnected`.
    fn suspend_if_disconnected(&self) {
        let mut state = self.state.lock();
        if state.ready && self.registry.count() == 0 {
            debug!("no live connection to dispatch on, suspending until reconnected");
            state.ready = false;
        }
    }

    fn requeue(
        &self,
        invocation: Invocation,
    ) -> Dispatched {
        let mut state = self.state.lock();
        if let Some(e) = &state.closed {
            let error = e.duplicate();
            drop(state);
            invocation.complete(Err(error));
            return Dispatched::Requeued;
        }
        if !invocation.retryable {
            drop(state);
            invocation.complete(Err(Error::OperationRejectedDisconnected));
            return Dispatched::Requeued;
        }
        state.queue.insert(invocation.id, invocation);
        QUEUED_INVOCATIONS.set(state.queue.len() as i64);
        // an active drain picks it up on its next pass; a direct dispatch needs one started
        if state.ready && !state.draining {
            self.start_drain(&mut state);
        }
        Dispatched::Requeued
    }
}

/// Groups invocations by routing key; keyless ones each get their own lane.
fn lanes_by_key(invocations: impl Iterator<Item = Invocation>) -> Vec<Vec<Invocation>> {
    let mut lanes: Vec<Vec<Invocation>> = Vec::new();
    let mut by_key: HashMap<Vec<u8>, usize> = HashMap::new();
    for invocation in invocations {
        match invocation.operation.routing_key() {
            Some(key) => {
                let index = *by_key.entry(key.to_vec()).or_insert_with(|| {
                    lanes.push(Vec::new());
                    lanes.len() - 1
                });
                lanes[index].push(invocation);
            }
            None => lanes.push(vec![invocation]),
        }
    }
    lanes
}
