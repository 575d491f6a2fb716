use std::collections::HashMap;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpListener;
use uuid::Uuid;

use super::tcp::*;
use super::*;
use crate::Error;
use crate::Member;
use crate::NetworkError;
use crate::Operation;
use crate::OperationResult;

const CLUSTER: &str = "test-cluster";
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Normal,
    /// never answers the handshake
    Silent,
    /// closes the socket when an invocation arrives
    DropOnInvoke,
    RejectInvokes,
}

/// Single member speaking the client protocol on an ephemeral port
async fn spawn_member(behavior: Behavior) -> (String, Member) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let member = Member::new(Uuid::new_v4(), address.clone());

    let m = member.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(framed(stream), m.clone(), behavior));
        }
    });
    (address, member)
}

async fn serve(
    mut framed: FramedStream,
    member: Member,
    behavior: Behavior,
) {
    let mut store: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();
    while let Some(Ok(bytes)) = framed.next().await {
        let reply = match decode_frame::<ClientFrame>(&bytes).unwrap() {
            ClientFrame::Authenticate { .. } if behavior == Behavior::Silent => continue,
            ClientFrame::Authenticate { cluster_name, .. } if cluster_name != CLUSTER => {
                ServerFrame::AuthenticationFailed {
                    reason: format!("unknown cluster {cluster_name}"),
                }
            }
            ClientFrame::Authenticate { .. } => ServerFrame::Authenticated {
                member: member.clone(),
            },
            ClientFrame::Ping { correlation_id } => ServerFrame::Pong { correlation_id },
            ClientFrame::Invoke { .. } if behavior == Behavior::DropOnInvoke => return,
            ClientFrame::Invoke { correlation_id, .. } if behavior == Behavior::RejectInvokes => {
                ServerFrame::Response {
                    correlation_id,
                    result: Err("map is read only".to_string()),
                }
            }
            ClientFrame::Invoke {
                correlation_id,
                operation,
            } => {
                let result = match operation {
                    Operation::MapPut { key, value, .. } => OperationResult::Value(store.insert(key, value)),
                    Operation::MapGet { key, .. } => OperationResult::Value(store.get(&key).cloned()),
                    Operation::MapRemove { key, .. } => OperationResult::Value(store.remove(&key)),
                    Operation::CreateProxy { .. } => OperationResult::Done,
                };
                ServerFrame::Response {
                    correlation_id,
                    result: Ok(result),
                }
            }
        };
        if framed.send(encode_frame(&reply).unwrap()).await.is_err() {
            return;
        }
    }
}

fn connector(cluster_name: &str) -> TcpConnector {
    TcpConnector::new(cluster_name, "test-client", CONNECT_TIMEOUT)
}

fn put(
    key: &str,
    value: &str,
) -> Operation {
    Operation::MapPut {
        name: "m".to_string(),
        key: key.as_bytes().to_vec(),
        value: value.as_bytes().to_vec(),
    }
}

fn get(key: &str) -> Operation {
    Operation::MapGet {
        name: "m".to_string(),
        key: key.as_bytes().to_vec(),
    }
}

#[tokio::test]
async fn test_handshake_reports_member_identity() {
    let (address, member) = spawn_member(Behavior::Normal).await;

    let channel = connector(CLUSTER).connect(&address).await.unwrap();

    assert_eq!(channel.member(), member);
    assert!(channel.local_address().is_some());
    channel.ping().await.unwrap();
}

#[tokio::test]
async fn test_invocations_round_trip() {
    let (address, _) = spawn_member(Behavior::Normal).await;
    let channel = connector(CLUSTER).connect(&address).await.unwrap();

    assert_eq!(channel.invoke(put("a", "1")).await.unwrap(), OperationResult::Value(None));
    assert_eq!(
        channel.invoke(get("a")).await.unwrap(),
        OperationResult::Value(Some(b"1".to_vec()))
    );
}

#[tokio::test]
async fn test_concurrent_requests_are_matched_by_correlation_id() {
    let (address, _) = spawn_member(Behavior::Normal).await;
    let channel = connector(CLUSTER).connect(&address).await.unwrap();
    channel.invoke(put("a", "1")).await.unwrap();
    channel.invoke(put("b", "2")).await.unwrap();

    let (a, b, ping) = tokio::join!(channel.invoke(get("a")), channel.invoke(get("b")), channel.ping());

    assert_eq!(a.unwrap().into_value(), Some(b"1".to_vec()));
    assert_eq!(b.unwrap().into_value(), Some(b"2".to_vec()));
    ping.unwrap();
}

#[tokio::test]
async fn test_cluster_name_mismatch_is_a_configuration_error() {
    let (address, _) = spawn_member(Behavior::Normal).await;

    let result = connector("other-cluster").connect(&address).await;

    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[tokio::test]
async fn test_unreachable_address_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = connector(CLUSTER).connect(&address).await.err().unwrap();

    assert!(err.is_transient(), "{err:?}");
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_silent_member_times_out_handshake() {
    let (address, _) = spawn_member(Behavior::Silent).await;

    let result = connector(CLUSTER).connect(&address).await;

    assert!(matches!(
        result,
        Err(Error::Network(NetworkError::Timeout { .. }))
    ));
}

#[tokio::test]
async fn test_remote_rejection_is_surfaced() {
    let (address, _) = spawn_member(Behavior::RejectInvokes).await;
    let channel = connector(CLUSTER).connect(&address).await.unwrap();

    let result = channel.invoke(get("a")).await;

    assert!(matches!(result, Err(Error::Remote(reason)) if reason == "map is read only"));
}

#[tokio::test]
async fn test_peer_close_fails_in_flight_request_and_closes_channel() {
    let (address, _) = spawn_member(Behavior::DropOnInvoke).await;
    let channel = connector(CLUSTER).connect(&address).await.unwrap();

    let result = channel.invoke(get("a")).await;
    assert!(matches!(
        result,
        Err(Error::Network(NetworkError::Disconnected))
    ));

    tokio::time::timeout(Duration::from_secs(2), channel.closed())
        .await
        .expect("channel should observe the peer close");
    assert!(matches!(
        channel.invoke(get("a")).await,
        Err(Error::Network(NetworkError::NotSent))
    ));
}

#[tokio::test]
async fn test_local_close_resolves_closed_and_rejects_requests() {
    let (address, _) = spawn_member(Behavior::Normal).await;
    let channel = connector(CLUSTER).connect(&address).await.unwrap();

    channel.close();
    channel.closed().await;

    assert_eq!(channel.ping().await, Err(NetworkError::NotSent));
}
