use std::time::Duration;

use plantwatch::models::WeatherReport;
use plantwatch::{ConnectionState, RealtimeHandle, RealtimeOptions};
use plantwatch_devkit::telemetry_builders::{weather_snapshot, TelemetryBuilder};
use plantwatch_devkit::test_utils::eventually;
use plantwatch_devkit::StubSocket;

const WAIT: Duration = Duration::from_secs(5);

fn options(socket: &StubSocket, attempts: u32) -> RealtimeOptions {
    RealtimeOptions {
        reconnect_attempts: attempts,
        reconnect_delay: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(2),
        ..RealtimeOptions::new(socket.url())
    }
}

async fn connected(socket: &StubSocket, attempts: u32) -> RealtimeHandle {
    let handle = RealtimeHandle::spawn(options(socket, attempts));
    let h = &handle;
    assert!(eventually(WAIT, || async move { h.is_connected() }).await);
    handle
}

#[tokio::test]
async fn test_metrics_arrive_as_object_or_json_text() {
    let socket = StubSocket::spawn().await.unwrap();
    let handle = connected(&socket, 3).await;
    let h = &handle;

    socket.emit("new_metric", TelemetryBuilder::new(7).owner(2).system(12.0, 40.0, 70.0).build());
    assert!(eventually(WAIT, || async move { h.latest_metric().is_some() }).await);
    let first = handle.latest_metric().unwrap();
    assert_eq!(first.device_id, "7");
    assert_eq!(first.value, 12.0);
    assert_eq!(first.owner_id, Some(2));

    let text = TelemetryBuilder::new("8").nested(5.0, 6.0, 7.0).build();
    socket.emit_text_payload("new_metric", &text);
    assert!(eventually(WAIT, || async move { h.latest_metric().is_some_and(|m| m.device_id == "8") }).await);
    assert_eq!(handle.latest_metric().unwrap().disk, Some(7.0));

    // unreadable payload leaves the retained value alone
    socket.emit("new_metric", serde_json::json!({ "data": { "cpu": 1 } }));
    socket.emit("weather_update", weather_snapshot("Lyon", 18.5, 12.0, 3));
    assert!(eventually(WAIT, || async move { h.latest_weather().is_some() }).await);
    assert_eq!(handle.latest_metric().unwrap().device_id, "8");

    match handle.latest_weather().unwrap() {
        WeatherReport::Snapshot(snapshot) => assert_eq!(snapshot.city.as_deref(), Some("Lyon")),
        other => panic!("unexpected weather {other:?}"),
    }

    handle.shutdown().await;
}

#[tokio::test]
async fn test_lost_connection_is_reestablished() {
    let socket = StubSocket::spawn().await.unwrap();
    let handle = connected(&socket, 3).await;

    socket.drop_all();
    assert!(socket.wait_for_connections(2, WAIT).await);
    let h = &handle;
    assert!(eventually(WAIT, || async move { h.is_connected() }).await);
    assert!(!handle.is_exhausted());
}

#[tokio::test]
async fn test_pongs_keep_session_alive_and_silence_reconnects() {
    let socket = StubSocket::spawn_with_ping(Duration::from_millis(100), Duration::from_millis(100)).await.unwrap();
    let handle = connected(&socket, 3).await;

    // several liveness windows pass while the server keeps pinging
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(socket.pong_count() >= 3);
    assert!(handle.is_connected());
    assert_eq!(socket.connection_count(), 1);
    assert_eq!(socket.attempt_count(), 1);

    socket.go_silent(true);
    assert!(socket.wait_for_connections(2, WAIT).await);

    socket.go_silent(false);
    let h = &handle;
    assert!(eventually(WAIT, || async move { h.is_connected() }).await);
    assert!(!handle.is_exhausted());
    handle.shutdown().await;
}

#[tokio::test]
async fn test_server_disconnect_is_not_retried() {
    let socket = StubSocket::spawn().await.unwrap();
    let handle = connected(&socket, 3).await;
    let h = &handle;

    socket.disconnect_all();
    assert!(eventually(WAIT, || async move { h.state() == ConnectionState::Disconnected }).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(socket.attempt_count(), 1);
    assert!(!handle.is_exhausted());
}

#[tokio::test]
async fn test_reconnect_budget_exhausts_then_restart_recovers() {
    let socket = StubSocket::spawn().await.unwrap();
    let mut handle = connected(&socket, 2).await;

    socket.refuse_new(true);
    socket.drop_all();
    {
        let h = &handle;
        assert!(eventually(WAIT, || async move { h.is_exhausted() }).await);
    }
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    // first connection plus two refused retries
    assert_eq!(socket.attempt_count(), 3);

    socket.refuse_new(false);
    assert!(handle.restart());
    assert!(!handle.is_exhausted());
    assert!(socket.wait_for_connections(2, WAIT).await);
    let h = &handle;
    assert!(eventually(WAIT, || async move { h.is_connected() }).await);
    assert!(!handle.restart());
}

#[tokio::test]
async fn test_state_updates_are_observable() {
    let socket = StubSocket::spawn().await.unwrap();
    let handle = RealtimeHandle::spawn(options(&socket, 1));
    let mut states = handle.subscribe_state();

    let reached = tokio::time::timeout(WAIT, states.wait_for(|s| *s == ConnectionState::Connected)).await;
    assert!(matches!(reached, Ok(Ok(_))));
    drop(reached);

    handle.shutdown().await;
    assert_eq!(*states.borrow(), ConnectionState::Disconnected);
}
