//! TCP member servers speaking the client protocol.
//!
//! A [`TestMember`] can be killed and restarted on the same port; the map
//! store lives in the [`TestCluster`] so data survives member restarts.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cluster_conn::network::tcp::decode_frame;
use cluster_conn::network::tcp::encode_frame;
use cluster_conn::network::tcp::framed;
use cluster_conn::network::tcp::ClientFrame;
use cluster_conn::network::tcp::FramedStream;
use cluster_conn::network::tcp::ServerFrame;
use cluster_conn::BackoffPolicy;
use cluster_conn::ClientConfig;
use cluster_conn::Member;
use cluster_conn::Operation;
use cluster_conn::OperationResult;
use futures::SinkExt;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

pub const CLUSTER_NAME: &str = "integration-cluster";

type Store = Arc<Mutex<HashMap<(String, Vec<u8>), Vec<u8>>>>;

#[derive(Default)]
pub struct TestCluster {
    store: Store,
}

impl TestCluster {
    /// Starts a member on an ephemeral port
    pub async fn start_member(&self) -> TestMember {
        self.start_member_at("127.0.0.1:0".parse().unwrap()).await
    }

    pub async fn start_member_at(
        &self,
        address: SocketAddr,
    ) -> TestMember {
        let listener = TcpListener::bind(address).await.unwrap();
        let address = listener.local_addr().unwrap();
        let member = Member::new(Uuid::new_v4(), address.to_string());
        let shutdown = CancellationToken::new();

        let store = self.store.clone();
        let token = shutdown.clone();
        let m = member.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        tokio::spawn(serve(framed(stream), m.clone(), store.clone(), token.child_token()));
                    }
                }
            }
            debug!(%m, "test member stopped");
        });

        TestMember {
            member,
            address,
            shutdown,
            task: Some(task),
        }
    }
}

pub struct TestMember {
    pub member: Member,
    pub address: SocketAddr,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TestMember {
    /// Closes every open connection and releases the port
    pub async fn kill(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestMember {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve(
    mut framed: FramedStream,
    member: Member,
    store: Store,
    shutdown: CancellationToken,
) {
    loop {
        let bytes = tokio::select! {
            _ = shutdown.cancelled() => return,
            next = framed.next() => match next {
                Some(Ok(bytes)) => bytes,
                _ => return,
            },
        };
        let reply = match decode_frame::<ClientFrame>(&bytes) {
            Ok(ClientFrame::Authenticate { cluster_name, .. }) if cluster_name != CLUSTER_NAME => {
                ServerFrame::AuthenticationFailed {
                    reason: format!("unknown cluster {cluster_name}"),
                }
            }
            Ok(ClientFrame::Authenticate { .. }) => ServerFrame::Authenticated {
                member: member.clone(),
            },
            Ok(ClientFrame::Ping { correlation_id }) => ServerFrame::Pong { correlation_id },
            Ok(ClientFrame::Invoke {
                correlation_id,
                operation,
            }) => ServerFrame::Response {
                correlation_id,
                result: Ok(apply(&store, operation)),
            },
            Err(_) => return,
        };
        if framed.send(encode_frame(&reply).unwrap()).await.is_err() {
            return;
        }
    }
}

fn apply(
    store: &Store,
    operation: Operation,
) -> OperationResult {
    let mut store = store.lock();
    match operation {
        Operation::CreateProxy { .. } => OperationResult::Done,
        Operation::MapPut { name, key, value } => OperationResult::Value(store.insert((name, key), value)),
        Operation::MapGet { name, key } => OperationResult::Value(store.get(&(name, key)).cloned()),
        Operation::MapRemove { name, key } => OperationResult::Value(store.remove(&(name, key))),
    }
}

pub fn client_config(addresses: &[SocketAddr]) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.cluster.cluster_name = CLUSTER_NAME.to_string();
    config.cluster.addresses = addresses.iter().map(|a| a.to_string()).collect();
    config.network.connect_timeout_in_ms = 500;
    config.network.cluster_connect_timeout_in_ms = 3_000;
    config.heartbeat.interval_in_ms = 100;
    config.heartbeat.timeout_in_ms = 1_000;
    config.reconnect.backoff = BackoffPolicy {
        max_attempts: 0,
        initial_backoff_in_ms: 50,
        max_backoff_in_ms: 200,
        multiplier: 2.0,
        jitter: 0.0,
    };
    config
}

#[allow(dead_code)]
pub async fn wait_until<F>(
    mut condition: F,
    within: Duration,
) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
