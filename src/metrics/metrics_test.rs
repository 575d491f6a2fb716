use super::*;

#[test]
fn test_registry_exposes_client_metrics() {
    register_custom_metrics();
    // registering twice must not panic
    register_custom_metrics();

    RECONNECT_ATTEMPTS.inc();
    let metrics = REGISTRY.gather();
    let metric_names: Vec<_> = metrics.iter().map(|m| m.get_name()).collect();

    assert!(
        metric_names.contains(&"client_reconnect_attempts"),
        "Missing client_reconnect_attempts"
    );
    assert!(metric_names.contains(&"client_live_connections"));
}

#[test]
fn test_counter_increment() {
    CONNECTIONS_REMOVED.with_label_values(&["metrics_test"]).reset();

    CONNECTIONS_REMOVED.with_label_values(&["metrics_test"]).inc();
    CONNECTIONS_REMOVED.with_label_values(&["metrics_test"]).inc();

    let value = CONNECTIONS_REMOVED.with_label_values(&["metrics_test"]).get();
    assert_eq!(value, 2, "Counter should increment correctly");
}

#[test]
fn test_gather_metrics_renders_text_format() {
    HEARTBEAT_TIMEOUTS.inc();
    let text = gather_metrics();
    assert!(text.contains("client_heartbeat_timeouts"));
}
