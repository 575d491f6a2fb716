//! In-memory cluster used by unit tests.
//!
//! Members are addressed by their `host:port` string and keep a shared map
//! store, so a value written through one member can be read through another.
//! Dropping the [`MockCluster`] closes every channel it handed out.

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::Connector;
use crate::Error;
use crate::Member;
use crate::MemberChannel;
use crate::NetworkError;
use crate::Operation;
use crate::OperationResult;
use crate::Result;

#[derive(Debug)]
struct MemberSlot {
    member: Member,
    alive: bool,
    responsive: bool,
    hold_invocations: bool,
    reject: Option<String>,
    connect_delay: Duration,
    channels: Vec<CancellationToken>,
}

impl MemberSlot {
    fn close_channels(&mut self) {
        for token in self.channels.drain(..) {
            token.cancel();
        }
    }
}

#[derive(Debug)]
struct ClusterState {
    cluster_name: String,
    members: Mutex<HashMap<String, MemberSlot>>,
    store: Mutex<HashMap<(String, Vec<u8>), Vec<u8>>>,
    connect_attempts: AtomicUsize,
    invocations: AtomicUsize,
}

impl ClusterState {
    fn slot<R>(
        &self,
        address: &str,
        f: impl FnOnce(&mut MemberSlot) -> R,
    ) -> Option<R> {
        self.members.lock().get_mut(address).map(f)
    }

    fn apply(
        &self,
        operation: Operation,
    ) -> OperationResult {
        let mut store = self.store.lock();
        match operation {
            Operation::CreateProxy { .. } => OperationResult::Done,
            Operation::MapPut { name, key, value } => {
                OperationResult::Value(store.insert((name, key), value))
            }
            Operation::MapGet { name, key } => {
                OperationResult::Value(store.get(&(name, key)).cloned())
            }
            Operation::MapRemove { name, key } => {
                OperationResult::Value(store.remove(&(name, key)))
            }
        }
    }
}

#[derive(Debug)]
pub struct MockCluster {
    state: Arc<ClusterState>,
}

impl MockCluster {
    pub fn new(cluster_name: &str) -> Self {
        Self {
            state: Arc::new(ClusterState {
                cluster_name: cluster_name.to_string(),
                members: Mutex::new(HashMap::new()),
                store: Mutex::new(HashMap::new()),
                connect_attempts: AtomicUsize::new(0),
                invocations: AtomicUsize::new(0),
            }),
        }
    }

    /// Starts a member at `address`; an existing member there comes back with a new identity.
    pub fn start_member(
        &self,
        address: &str,
    ) -> Member {
        let member = Member::new(Uuid::new_v4(), address);
        let mut members = self.state.members.lock();
        if let Some(mut previous) = members.insert(
            address.to_string(),
            MemberSlot {
                member: member.clone(),
                alive: true,
                responsive: true,
                hold_invocations: false,
                reject: None,
                connect_delay: Duration::ZERO,
                channels: Vec::new(),
            },
        ) {
            previous.close_channels();
        }
        debug!(%member, "mock member started");
        member
    }

    /// Stops the member and closes every channel to it
    pub fn terminate_member(
        &self,
        address: &str,
    ) {
        self.state.slot(address, |slot| {
            slot.alive = false;
            slot.close_channels();
        });
        debug!(address, "mock member terminated");
    }

    pub fn restart_member(
        &self,
        address: &str,
    ) -> Member {
        self.terminate_member(address);
        self.start_member(address)
    }

    /// An unresponsive member keeps its channels open but never answers probes
    pub fn set_responsive(
        &self,
        address: &str,
        responsive: bool,
    ) {
        self.state.slot(address, |slot| slot.responsive = responsive);
    }

    /// Held invocations are written but never answered until the channel closes
    pub fn hold_invocations(
        &self,
        address: &str,
        hold: bool,
    ) {
        self.state.slot(address, |slot| slot.hold_invocations = hold);
    }

    pub fn reject_invocations(
        &self,
        address: &str,
        reason: Option<&str>,
    ) {
        self.state.slot(address, |slot| slot.reject = reason.map(str::to_string));
    }

    /// Delays every connect to `address` before the member accepts it
    pub fn set_connect_delay(
        &self,
        address: &str,
        delay: Duration,
    ) {
        self.state.slot(address, |slot| slot.connect_delay = delay);
    }

    pub fn member(
        &self,
        address: &str,
    ) -> Option<Member> {
        self.state.slot(address, |slot| slot.member.clone())
    }

    pub fn value(
        &self,
        map: &str,
        key: &[u8],
    ) -> Option<Vec<u8>> {
        self.state.store.lock().get(&(map.to_string(), key.to_vec())).cloned()
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> usize {
        self.state.invocations.load(Ordering::SeqCst)
    }

    /// Channels currently open to the member at `address`
    pub fn open_channels(
        &self,
        address: &str,
    ) -> usize {
        self.state
            .slot(address, |slot| {
                slot.channels.retain(|t| !t.is_cancelled());
                slot.channels.len()
            })
            .unwrap_or(0)
    }

    /// Connector reaching this cluster under its own name
    pub fn connector(&self) -> Arc<MockClusterConnector> {
        self.connector_as(&self.state.cluster_name.clone())
    }

    /// Connector that authenticates with `cluster_name`, which may not match
    pub fn connector_as(
        &self,
        cluster_name: &str,
    ) -> Arc<MockClusterConnector> {
        Arc::new(MockClusterConnector {
            state: self.state.clone(),
            cluster_name: cluster_name.to_string(),
        })
    }
}

impl Drop for MockCluster {
    fn drop(&mut self) {
        for slot in self.state.members.lock().values_mut() {
            slot.alive = false;
            slot.close_channels();
        }
    }
}

#[derive(Debug)]
pub struct MockClusterConnector {
    state: Arc<ClusterState>,
    cluster_name: String,
}

#[async_trait]
impl Connector for MockClusterConnector {
    async fn connect(
        &self,
        address: &str,
    ) -> Result<Arc<dyn MemberChannel>> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if self.cluster_name != self.state.cluster_name {
            return Err(Error::Configuration(format!(
                "member at {address} belongs to cluster {}, expected {}",
                self.state.cluster_name, self.cluster_name
            )));
        }

        let delay = self.state.slot(address, |slot| slot.connect_delay).unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let token = CancellationToken::new();
        let member = self
            .state
            .slot(address, |slot| {
                if !slot.alive {
                    return None;
                }
                slot.channels.push(token.clone());
                Some(slot.member.clone())
            })
            .flatten()
            .ok_or_else(|| NetworkError::Io(format!("connection refused by {address}")))?;

        Ok(Arc::new(MockClusterChannel {
            state: self.state.clone(),
            member,
            token,
        }))
    }
}

#[derive(Debug)]
pub struct MockClusterChannel {
    state: Arc<ClusterState>,
    member: Member,
    token: CancellationToken,
}

impl MockClusterChannel {
    fn flags(&self) -> (bool, bool, Option<String>) {
        self.state
            .slot(&self.member.address, |slot| {
                (slot.responsive, slot.hold_invocations, slot.reject.clone())
            })
            .unwrap_or((false, false, None))
    }
}

impl Drop for MockClusterChannel {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[async_trait]
impl MemberChannel for MockClusterChannel {
    fn member(&self) -> Member {
        self.member.clone()
    }

    fn local_address(&self) -> Option<String> {
        Some("127.0.0.1:0".to_string())
    }

    async fn ping(&self) -> std::result::Result<(), NetworkError> {
        if self.token.is_cancelled() {
            return Err(NetworkError::NotSent);
        }
        let (responsive, _, _) = self.flags();
        if !responsive {
            self.token.cancelled().await;
            return Err(NetworkError::Disconnected);
        }
        Ok(())
    }

    async fn invoke(
        &self,
        operation: Operation,
    ) -> Result<OperationResult> {
        if self.token.is_cancelled() {
            return Err(NetworkError::NotSent.into());
        }
        let (_, hold, reject) = self.flags();
        if hold {
            self.token.cancelled().await;
            return Err(NetworkError::Disconnected.into());
        }
        if let Some(reason) = reject {
            return Err(Error::Remote(reason));
        }
        self.state.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.apply(operation))
    }

    async fn closed(&self) {
        self.token.cancelled().await
    }

    fn close(&self) {
        self.token.cancel();
    }
}
