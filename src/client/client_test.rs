use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::*;
use crate::test_utils::fast_config;
use crate::test_utils::wait_until;
use crate::test_utils::MockCluster;
use crate::ClientConfig;
use crate::MockSessionInitializer;
use crate::ReconnectMode;

const A: &str = "10.0.0.1:5701";
const B: &str = "10.0.0.2:5701";
const C: &str = "10.0.0.3:5701";
const WITHIN: Duration = Duration::from_secs(30);

type Recorded = Arc<Mutex<Vec<ClientEvent>>>;

fn recorder() -> (Recorded, Arc<dyn crate::EventListener>) {
    let events: Recorded = Arc::new(Mutex::new(Vec::new()));
    let e = events.clone();
    (events, Arc::new(move |event: &ClientEvent| e.lock().push(event.clone())))
}

fn count(
    events: &Recorded,
    f: impl Fn(&ClientEvent) -> bool,
) -> usize {
    events.lock().iter().filter(|e| f(e)).count()
}

fn reconnected(events: &Recorded) -> usize {
    count(events, |e| matches!(e, ClientEvent::ClusterReconnected { .. }))
}

fn client(
    config: ClientConfig,
    cluster: &MockCluster,
    session: MockSessionInitializer,
) -> (Client, Recorded) {
    let (events, listener) = recorder();
    let client = Client::builder(config)
        .connector(cluster.connector())
        .session_initializer(Arc::new(session))
        .listener(listener)
        .build()
        .unwrap();
    (client, events)
}

fn session_called(times: usize) -> MockSessionInitializer {
    let mut session = MockSessionInitializer::new();
    session.expect_initialize_on_cluster().times(times).returning(|_| Ok(()));
    session
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

async fn wait_for(
    what: &str,
    condition: impl FnMut() -> bool,
) {
    assert!(wait_until(condition, WITHIN).await, "timed out waiting for {what}");
}

#[tokio::test(start_paused = true)]
async fn test_start_connects_and_serves_map_operations() {
    let cluster = MockCluster::new("test-cluster");
    cluster.start_member(A);
    let (client, events) = client(fast_config(&[A]), &cluster, session_called(0));

    client.start().await.unwrap();
    assert_eq!(client.lifecycle_state(), LifecycleState::Started);
    assert_eq!(client.controller_state(), ControllerState::Connected);
    assert_eq!(client.connection_count(), 1);

    let map = client.map("users").await.unwrap();
    assert_eq!(map.name(), "users");
    assert_eq!(map.put("user:1", "alice").await.unwrap(), None);
    assert_eq!(map.get("user:1").await.unwrap(), Some(b"alice".to_vec()));
    assert_eq!(map.remove("user:1").await.unwrap(), Some(b"alice".to_vec()));
    assert_eq!(map.get("user:1").await.unwrap(), None);

    let lifecycle: Vec<_> = events
        .lock()
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Lifecycle(state) => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(lifecycle, vec![LifecycleState::Starting, LifecycleState::Started]);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_a_no_op() {
    let cluster = MockCluster::new("test-cluster");
    cluster.start_member(A);
    let (client, _) = client(fast_config(&[A]), &cluster, session_called(0));

    client.start().await.unwrap();
    client.start().await.unwrap();

    assert_eq!(cluster.connect_attempts(), 1);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_every_restoration_is_announced_once_and_reinitializes_session() {
    let cluster = MockCluster::new("test-cluster");
    cluster.start_member(A);
    let (client, events) = client(fast_config(&[A]), &cluster, session_called(3));
    client.start().await.unwrap();

    for round in 1..=3 {
        cluster.terminate_member(A);
        wait_for("disconnect", || client.connection_count() == 0).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(client.controller_state(), ControllerState::Reconnecting);

        cluster.start_member(A);
        wait_for("reconnect", || reconnected(&events) == round).await;
        assert_eq!(client.connection_count(), 1);
    }

    assert_eq!(count(&events, |e| matches!(e, ClientEvent::AllConnectionsLost)), 3);
    assert_eq!(count(&events, |e| matches!(e, ClientEvent::ConnectionRestored)), 4);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_retryable_write_during_outage_completes_after_reconnect() {
    let cluster = MockCluster::new("test-cluster");
    cluster.start_member(A);
    let (client, events) = client(fast_config(&[A]), &cluster, session_called(1));
    client.start().await.unwrap();
    let map = client.map("m").await.unwrap();

    cluster.terminate_member(A);
    wait_for("disconnect", || client.connection_count() == 0).await;

    let writer = map.clone();
    let pending = tokio::spawn(async move { writer.put("k", "v").await });
    wait_for("queued", || client.pending_invocations() == 1).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!pending.is_finished());

    cluster.start_member(A);
    let previous = tokio::time::timeout(WITHIN, pending).await.unwrap().unwrap().unwrap();

    assert_eq!(previous, None);
    assert_eq!(reconnected(&events), 1);
    assert_eq!(map.get("k").await.unwrap(), Some(b"v".to_vec()));
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_submission_during_outage_is_rejected() {
    let cluster = MockCluster::new("test-cluster");
    cluster.start_member(A);
    let (client, _) = client(fast_config(&[A]), &cluster, session_called(0));
    client.start().await.unwrap();

    cluster.terminate_member(A);
    wait_for("disconnect", || client.connection_count() == 0).await;

    let result = client.submit(put("k", "v"), false).await;

    assert!(matches!(result, Err(Error::OperationRejectedDisconnected)));
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_non_retryable_fails_instead_of_hanging() {
    let cluster = MockCluster::new("test-cluster");
    let member = cluster.start_member(A);
    let (client, _) = client(fast_config(&[A]), &cluster, session_called(0));
    client.start().await.unwrap();
    cluster.hold_invocations(A, true);

    let c = client.clone();
    let pending = tokio::spawn(async move { c.submit(put("k", "v"), false).await });
    wait_for("in flight", || client.pending_invocations() == 1).await;
    cluster.terminate_member(A);

    let result = tokio::time::timeout(WITHIN, pending).await.unwrap().unwrap();
    assert!(
        matches!(result, Err(Error::ConnectionLost { member: uuid, .. }) if uuid == member.uuid)
    );
    assert_eq!(client.pending_invocations(), 0);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_proxy_creation_during_outage_waits_for_reconnection() {
    let cluster = MockCluster::new("test-cluster");
    cluster.start_member(A);
    let (client, events) = client(fast_config(&[A]), &cluster, session_called(1));
    client.start().await.unwrap();

    cluster.terminate_member(A);
    wait_for("disconnect", || client.connection_count() == 0).await;

    let c = client.clone();
    let pending = tokio::spawn(async move { c.map("orders").await });
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!pending.is_finished());
    assert_eq!(reconnected(&events), 0);

    cluster.start_member(A);
    let map = tokio::time::timeout(WITHIN, pending).await.unwrap().unwrap().unwrap();

    assert_eq!(map.name(), "orders");
    assert_eq!(reconnected(&events), 1);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_backoff_stops_everything() {
    let cluster = MockCluster::new("test-cluster");
    cluster.start_member(A);
    let mut config = fast_config(&[A]);
    config.reconnect.backoff.initial_backoff_in_ms = 10_000;
    config.reconnect.backoff.max_backoff_in_ms = 10_000;
    let (client, events) = client(config, &cluster, session_called(0));
    client.start().await.unwrap();

    cluster.terminate_member(A);
    wait_for("first attempt", || cluster.connect_attempts() == 2).await;
    let c = client.clone();
    let pending = tokio::spawn(async move { c.submit(put("k", "v"), true).await });
    wait_for("queued", || client.pending_invocations() == 1).await;

    tokio::time::timeout(Duration::from_secs(1), client.shutdown())
        .await
        .expect("shutdown must not wait for the backoff timer");

    assert!(matches!(pending.await.unwrap(), Err(Error::ClientShutdown)));
    assert_eq!(client.lifecycle_state(), LifecycleState::Shutdown);
    assert_eq!(client.controller_state(), ControllerState::Shutdown);
    assert!(matches!(
        client.submit(put("k", "v"), true).await,
        Err(Error::ClientShutdown)
    ));

    let seen = events.lock().len();
    cluster.start_member(A);
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(cluster.connect_attempts(), 2);
    assert_eq!(events.lock().len(), seen);
    assert!(matches!(
        events.lock().last(),
        Some(ClientEvent::Lifecycle(LifecycleState::Shutdown))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_is_idempotent_and_closes_connections() {
    let cluster = MockCluster::new("test-cluster");
    cluster.start_member(A);
    cluster.start_member(B);
    let (client, events) = client(fast_config(&[A, B]), &cluster, session_called(0));
    client.start().await.unwrap();
    assert_eq!(client.connection_count(), 2);

    client.shutdown().await;
    client.shutdown().await;

    assert_eq!(client.connection_count(), 0);
    assert_eq!(cluster.open_channels(A), 0);
    assert_eq!(cluster.open_channels(B), 0);
    assert_eq!(
        count(&events, |e| matches!(e, ClientEvent::Lifecycle(LifecycleState::Shutdown))),
        1
    );
    assert_eq!(reconnected(&events), 0);
}

#[tokio::test(start_paused = true)]
async fn test_member_removed_closes_its_connection() {
    let cluster = MockCluster::new("test-cluster");
    let a = cluster.start_member(A);
    cluster.start_member(B);
    let (client, events) = client(fast_config(&[A, B]), &cluster, session_called(0));
    client.start().await.unwrap();

    client.member_removed(&a.uuid);

    assert_eq!(client.connection_count(), 1);
    assert_eq!(cluster.open_channels(A), 0);
    assert_eq!(
        count(&events, |e| matches!(
            e,
            ClientEvent::ConnectionRemoved {
                reason: RemovalReason::MemberRemoved,
                ..
            }
        )),
        1
    );
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_prefers_members_learned_from_membership() {
    let cluster = MockCluster::new("test-cluster");
    cluster.start_member(A);
    let c = cluster.start_member(C);
    let mut config = fast_config(&[A]);
    config.cluster.smart_routing = false;
    let (client, events) = client(config, &cluster, session_called(1));
    client.start().await.unwrap();
    client.member_added(c.clone());

    cluster.terminate_member(A);
    wait_for("reconnect", || reconnected(&events) == 1).await;

    assert!(events.lock().iter().any(
        |e| matches!(e, ClientEvent::ClusterReconnected { member } if member.uuid == c.uuid)
    ));
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_start_fails_on_cluster_name_mismatch() {
    let cluster = MockCluster::new("test-cluster");
    cluster.start_member(A);
    let client = Client::builder(fast_config(&[A]))
        .connector(cluster.connector_as("other-cluster"))
        .build()
        .unwrap();

    let result = client.start().await;

    assert!(matches!(result, Err(Error::Configuration(_))));
    assert_eq!(client.lifecycle_state(), LifecycleState::Shutdown);
    assert_eq!(cluster.connect_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_off_fails_queued_work_with_fatal_error() {
    let cluster = MockCluster::new("test-cluster");
    cluster.start_member(A);
    let mut config = fast_config(&[A]);
    config.reconnect.mode = ReconnectMode::Off;
    let (client, events) = client(config, &cluster, session_called(0));
    client.start().await.unwrap();
    cluster.hold_invocations(A, true);

    let c = client.clone();
    let pending = tokio::spawn(async move { c.submit(put("k", "v"), true).await });
    wait_for("in flight", || client.pending_invocations() == 1).await;
    cluster.terminate_member(A);

    let result = tokio::time::timeout(WITHIN, pending).await.unwrap().unwrap();
    assert!(result.is_err());
    assert_eq!(client.controller_state(), ControllerState::Shutdown);
    assert_eq!(count(&events, |e| matches!(e, ClientEvent::ClientFatal { .. })), 1);
    client.shutdown().await;
}

#[test]
fn test_build_rejects_invalid_config() {
    let mut config = fast_config(&[A]);
    config.reconnect.backoff.multiplier = 0.5;

    let result = Client::builder(config).build();

    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_start_connects_remaining_members_leaves_nothing_open() {
    let cluster = MockCluster::new("test-cluster");
    cluster.start_member(A);
    cluster.start_member(B);
    cluster.set_connect_delay(B, Duration::from_millis(150));
    let (client, events) = client(fast_config(&[A, B]), &cluster, session_called(0));

    let c = client.clone();
    let starting = tokio::spawn(async move { c.start().await });
    wait_for("first member", || client.connection_count() == 1).await;
    assert!(!starting.is_finished());

    client.shutdown().await;
    let result = tokio::time::timeout(WITHIN, starting).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(matches!(result, Err(Error::ClientShutdown)));
    assert_eq!(client.connection_count(), 0);
    assert_eq!(cluster.open_channels(A), 0);
    assert_eq!(cluster.open_channels(B), 0);
    assert_eq!(client.lifecycle_state(), LifecycleState::Shutdown);
    assert_eq!(client.controller_state(), ControllerState::Shutdown);
    assert_eq!(count(&events, |e| matches!(e, ClientEvent::Lifecycle(LifecycleState::Started))), 0);
}

#[tokio::test(start_paused = true)]
async fn test_losing_last_connection_during_start_keeps_queue_closed_until_reconnected() {
    let cluster = MockCluster::new("test-cluster");
    cluster.start_member(A);
    cluster.start_member(B);
    cluster.set_connect_delay(B, Duration::from_millis(150));
    let (client, events) = client(fast_config(&[A, B]), &cluster, session_called(1));

    let c = client.clone();
    let starting = tokio::spawn(async move { c.start().await });
    wait_for("first member", || client.connection_count() == 1).await;
    cluster.terminate_member(A);
    wait_for("disconnect", || client.connection_count() == 0).await;
    assert!(!client.inner.coordinator.is_ready());

    let c = client.clone();
    let pending = tokio::spawn(async move { c.submit(put("k", "v"), true).await });
    wait_for("queued", || client.pending_invocations() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!pending.is_finished());
    assert_eq!(cluster.invocations(), 0);
    assert_eq!(reconnected(&events), 0);

    tokio::time::timeout(WITHIN, pending).await.unwrap().unwrap().unwrap();
    tokio::time::timeout(WITHIN, starting).await.unwrap().unwrap().unwrap();

    assert_eq!(reconnected(&events), 1);
    assert!(client.inner.coordinator.is_ready());
    assert_eq!(cluster.value("m", b"k"), Some(b"v".to_vec()));
    assert_eq!(client.lifecycle_state(), LifecycleState::Started);
    client.shutdown().await;
}
