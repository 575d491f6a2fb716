use std::sync::Arc;
use std::time::Duration;

use cluster_conn::Client;
use cluster_conn::ClientEvent;
use cluster_conn::ControllerState;
use cluster_conn::Error;
use cluster_conn::EventListener;
use cluster_conn::Operation;
use parking_lot::Mutex;
use tracing_test::traced_test;

use crate::common::client_config;
use crate::common::wait_until;
use crate::common::TestCluster;

const WITHIN: Duration = Duration::from_secs(10);

fn recorder() -> (Arc<Mutex<Vec<ClientEvent>>>, Arc<dyn EventListener>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let e = events.clone();
    (events, Arc::new(move |event: &ClientEvent| e.lock().push(event.clone())))
}

fn reconnected(events: &Mutex<Vec<ClientEvent>>) -> usize {
    events
        .lock()
        .iter()
        .filter(|e| matches!(e, ClientEvent::ClusterReconnected { .. }))
        .count()
}

#[tokio::test]
#[traced_test]
async fn test_client_survives_member_restart_on_same_port() {
    let cluster = TestCluster::default();
    let member = cluster.start_member().await;
    let address = member.address;
    let (events, listener) = recorder();
    let client = Client::builder(client_config(&[address]))
        .listener(listener)
        .build()
        .unwrap();

    client.start().await.unwrap();
    let map = client.map("users").await.unwrap();
    map.put("user:1", "alice").await.unwrap();

    member.kill().await;
    assert!(wait_until(|| client.connection_count() == 0, WITHIN).await);

    let writer = map.clone();
    let pending = tokio::spawn(async move { writer.put("user:2", "bob").await });
    assert!(wait_until(|| client.pending_invocations() == 1, WITHIN).await);

    let restarted = cluster.start_member_at(address).await;
    tokio::time::timeout(WITHIN, pending)
        .await
        .expect("queued write should complete after the restart")
        .unwrap()
        .unwrap();

    assert_eq!(reconnected(&events), 1);
    assert_eq!(client.controller_state(), ControllerState::Connected);
    assert_eq!(map.get("user:1").await.unwrap(), Some(b"alice".to_vec()));
    assert_eq!(map.get("user:2").await.unwrap(), Some(b"bob".to_vec()));
    assert!(events.lock().iter().any(
        |e| matches!(e, ClientEvent::ClusterReconnected { member } if member.uuid == restarted.member.uuid)
    ));

    client.shutdown().await;
}

#[tokio::test]
async fn test_non_retryable_is_rejected_while_member_is_down() {
    let cluster = TestCluster::default();
    let member = cluster.start_member().await;
    let client = Client::builder(client_config(&[member.address])).build().unwrap();
    client.start().await.unwrap();

    member.kill().await;
    assert!(wait_until(|| client.connection_count() == 0, WITHIN).await);

    let operation = Operation::MapPut {
        name: "m".to_string(),
        key: b"k".to_vec(),
        value: b"v".to_vec(),
    };
    let result = client.submit(operation, false).await;

    assert!(matches!(result, Err(Error::OperationRejectedDisconnected)));
    client.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_while_reconnecting_fails_queued_work() {
    let cluster = TestCluster::default();
    let member = cluster.start_member().await;
    let client = Client::builder(client_config(&[member.address])).build().unwrap();
    client.start().await.unwrap();
    let map = client.map("m").await.unwrap();

    member.kill().await;
    assert!(wait_until(|| client.controller_state() == ControllerState::Reconnecting, WITHIN).await);
    let pending = tokio::spawn(async move { map.put("k", "v").await });
    assert!(wait_until(|| client.pending_invocations() == 1, WITHIN).await);

    tokio::time::timeout(Duration::from_secs(2), client.shutdown())
        .await
        .expect("shutdown should not wait for reconnection");

    assert!(matches!(pending.await.unwrap(), Err(Error::ClientShutdown)));
    assert_eq!(client.controller_state(), ControllerState::Shutdown);
}

#[tokio::test]
async fn test_start_against_foreign_cluster_fails() {
    let cluster = TestCluster::default();
    let member = cluster.start_member().await;
    let mut config = client_config(&[member.address]);
    config.cluster.cluster_name = "someone-else".to_string();
    let client = Client::builder(config).build().unwrap();

    let result = client.start().await;

    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[tokio::test]
async fn test_start_without_reachable_member_times_out() {
    let cluster = TestCluster::default();
    let member = cluster.start_member().await;
    let address = member.address;
    member.kill().await;
    let client = Client::builder(client_config(&[address])).build().unwrap();

    let result = client.start().await;

    assert!(matches!(result, Err(Error::Fatal(_))));
}
