use std::sync::Arc;

use parking_lot::Mutex;

use crate::ClientEvent;
use crate::EventBus;
use crate::LifecycleState;

#[tokio::test]
async fn test_listeners_run_in_registration_order_before_subscribers() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let first = seen.clone();
    bus.register(Arc::new(move |_: &ClientEvent| first.lock().push("first")));
    let second = seen.clone();
    bus.register(Arc::new(move |_: &ClientEvent| second.lock().push("second")));

    let mut rx = bus.subscribe();
    bus.emit(ClientEvent::AllConnectionsLost);

    assert_eq!(*seen.lock(), vec!["first", "second"]);
    assert!(matches!(rx.recv().await.unwrap(), ClientEvent::AllConnectionsLost));
}

#[tokio::test]
async fn test_closed_bus_emits_nothing() {
    let bus = EventBus::new();
    let count = Arc::new(Mutex::new(0));
    let c = count.clone();
    bus.register(Arc::new(move |_: &ClientEvent| *c.lock() += 1));
    let mut rx = bus.subscribe();

    bus.emit(ClientEvent::Lifecycle(LifecycleState::Shutdown));
    bus.close();
    bus.emit(ClientEvent::ConnectionRestored);

    assert!(bus.is_closed());
    assert_eq!(*count.lock(), 1);
    assert!(matches!(
        rx.recv().await.unwrap(),
        ClientEvent::Lifecycle(LifecycleState::Shutdown)
    ));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_emit_without_subscribers_does_not_fail() {
    let bus = EventBus::new();
    bus.emit(ClientEvent::ConnectionRestored);
}
