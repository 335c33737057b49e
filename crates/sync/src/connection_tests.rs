// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::test_helpers::{eventually, test_connection_config, within, MockBackend};
use pillar_core::protocol::KIND_ERROR;
use yare::parameterized;

#[derive(Default)]
struct Recorder {
    log: Mutex<Vec<String>>,
}

impl Recorder {
    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn has(&self, prefix: &str) -> bool {
        self.entries().iter().any(|e| e.starts_with(prefix))
    }

    fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

impl ConnectionObserver for Recorder {
    fn on_connect(&self) {
        self.push("connect".into());
    }

    fn on_disconnect(&self, reason: &str) {
        self.push(format!("disconnect: {reason}"));
    }

    fn on_error(&self, error: &ConnectError) {
        self.push(format!("error: {error}"));
    }

    fn on_reconnecting(&self, attempt: u32, _delay: Duration) {
        self.push(format!("reconnecting {attempt}"));
    }

    fn on_message(&self, envelope: &Envelope) {
        self.push(format!("message: {}", envelope.payload["message"]));
    }
}

fn manager(backend: &MockBackend, config: ConnectionConfig) -> (ConnectionManager, Arc<Recorder>) {
    let manager = ConnectionManager::new(config, backend.factory());
    let recorder = Arc::new(Recorder::default());
    manager.add_observer(recorder.clone());
    (manager, recorder)
}

#[test]
fn shared_state_initial_values() {
    let state = SharedConnectionState::new();
    assert_eq!(state.get(), ConnectionState::Disconnected);
    assert_eq!(state.attempt(), 0);
    assert!(!state.is_connected());
    assert!(!state.is_connecting());
}

#[test]
fn shared_state_status_string() {
    let state = SharedConnectionState::new();
    assert_eq!(state.status_string(), "disconnected");

    state.set(ConnectionState::Connecting);
    assert_eq!(state.status_string(), "connecting");

    state.set_attempt(3);
    assert_eq!(state.status_string(), "connecting (attempt 3)");

    state.set(ConnectionState::Connected);
    assert_eq!(state.status_string(), "connected");

    state.set(ConnectionState::Closing);
    assert_eq!(state.status_string(), "closing");
}

#[test]
fn begin_connect_only_from_disconnected() {
    let state = SharedConnectionState::new();
    assert!(state.begin_connect());
    assert!(state.is_connecting());
    assert!(!state.begin_connect());

    state.set(ConnectionState::Connected);
    assert!(!state.begin_connect());
}

#[parameterized(
    first = { 1, 500 },
    second = { 2, 1000 },
    third = { 3, 2000 },
    capped = { 8, 30_000 },
    huge = { 200, 30_000 },
)]
fn backoff_delay_doubles_up_to_cap(attempt: u32, expected_ms: u64) {
    let config = ConnectionConfig::default();
    assert_eq!(config.backoff_delay(attempt), Duration::from_millis(expected_ms));
}

#[test]
fn backoff_delay_is_non_decreasing() {
    let config = ConnectionConfig::default();
    let delays: Vec<Duration> = (1..40).map(|n| config.backoff_delay(n)).collect();
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert!(delays.iter().all(|d| *d <= config.max_delay));
}

#[tokio::test]
async fn connect_succeeds_and_notifies() {
    let backend = MockBackend::new();
    let (conn, recorder) = manager(&backend, test_connection_config());

    within(conn.connect()).await.unwrap();

    assert!(conn.is_connected());
    assert_eq!(conn.reconnect_attempt(), 0);
    assert_eq!(recorder.entries(), vec!["connect"]);
    conn.disconnect().await;
}

#[tokio::test]
async fn repeated_connect_is_a_no_op() {
    let backend = MockBackend::new();
    let (conn, _) = manager(&backend, test_connection_config());

    within(conn.connect()).await.unwrap();
    within(conn.connect()).await.unwrap();
    within(conn.connect()).await.unwrap();

    assert_eq!(backend.connects(), 1);
    conn.disconnect().await;
}

#[tokio::test]
async fn connect_fails_fast_when_offline() {
    let backend = MockBackend::new();
    let (conn, recorder) = manager(&backend, test_connection_config());
    conn.set_network_available(false);

    let result = within(conn.connect()).await;

    assert_eq!(result, Err(ConnectError::Offline));
    assert_eq!(backend.connects(), 0);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(recorder.has("error: network is offline"));
}

#[tokio::test]
async fn sends_while_disconnected_flush_in_order_after_connect() {
    let backend = MockBackend::new();
    let (conn, _) = manager(&backend, test_connection_config());

    for n in 0..5 {
        conn.send(Envelope::error(format!("m{n}")));
    }
    assert_eq!(conn.pending_sends(), 5);
    assert!(backend.sent().is_empty());

    within(conn.connect()).await.unwrap();
    eventually(|| backend.sent().len() == 5).await;

    let order: Vec<String> = backend
        .sent()
        .iter()
        .map(|e| e.payload["message"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(order, vec!["m0", "m1", "m2", "m3", "m4"]);
    assert_eq!(conn.pending_sends(), 0);
    conn.disconnect().await;
}

#[tokio::test]
async fn transmit_requires_connection() {
    let backend = MockBackend::new();
    let (conn, _) = manager(&backend, test_connection_config());

    let result = conn.transmit(Envelope::error("x")).await;

    assert_eq!(result, Err(SendFailure::NotConnected));
    assert_eq!(conn.pending_sends(), 0);
}

#[tokio::test]
async fn transmit_resolves_after_write() {
    let backend = MockBackend::new();
    let (conn, _) = manager(&backend, test_connection_config());
    within(conn.connect()).await.unwrap();

    within(conn.transmit(Envelope::error("acked"))).await.unwrap();

    assert_eq!(backend.sent().len(), 1);
    conn.disconnect().await;
}

#[tokio::test]
async fn transmit_reports_send_failure() {
    let backend = MockBackend::new();
    let (conn, recorder) = manager(&backend, test_connection_config());
    within(conn.connect()).await.unwrap();
    backend.fail_next_sends(1);

    let result = within(conn.transmit(Envelope::error("lost"))).await;

    assert!(matches!(result, Err(SendFailure::Transport(_))));
    eventually(|| recorder.has("disconnect")).await;
    // The failed frame is not resent on reconnect
    eventually(|| backend.connects() == 2 && conn.is_connected()).await;
    assert!(backend.sent().is_empty());
    conn.disconnect().await;
}

#[tokio::test]
async fn failed_plain_send_stays_queued_until_reconnect() {
    let backend = MockBackend::new();
    let (conn, _) = manager(&backend, test_connection_config());
    within(conn.connect()).await.unwrap();
    backend.fail_next_sends(1);

    conn.send(Envelope::error("retry me"));

    eventually(|| backend.sent().len() == 1).await;
    assert_eq!(backend.connects(), 2);
    assert_eq!(backend.sent()[0].payload["message"], "retry me");
    conn.disconnect().await;
}

#[tokio::test]
async fn inbound_messages_dispatch_in_order() {
    let backend = MockBackend::new();
    let (conn, recorder) = manager(&backend, test_connection_config());
    within(conn.connect()).await.unwrap();

    for n in 0..3 {
        assert!(backend.push(Envelope::error(format!("in{n}"))));
    }

    eventually(|| recorder.entries().len() == 4).await;
    assert_eq!(
        recorder.entries(),
        vec![
            "connect",
            "message: \"in0\"",
            "message: \"in1\"",
            "message: \"in2\""
        ]
    );
    conn.disconnect().await;
}

#[tokio::test]
async fn keepalives_are_not_dispatched() {
    let backend = MockBackend::new();
    let (conn, recorder) = manager(&backend, test_connection_config());
    within(conn.connect()).await.unwrap();

    backend.push(Envelope::pong(1));
    backend.push(Envelope::ping(7));
    backend.push(Envelope::error("after"));

    eventually(|| recorder.has("message")).await;
    assert_eq!(recorder.entries(), vec!["connect", "message: \"after\""]);
    let pong = backend.sent().into_iter().find(|e| e.kind == KIND_PONG).unwrap();
    assert_eq!(pong.payload["id"], 7);
    conn.disconnect().await;
}

#[tokio::test]
async fn heartbeat_sends_pings_while_connected() {
    let backend = MockBackend::new();
    let config = ConnectionConfig {
        heartbeat_interval: Some(Duration::from_millis(20)),
        ..test_connection_config()
    };
    let (conn, _) = manager(&backend, config);
    within(conn.connect()).await.unwrap();

    eventually(|| backend.sent_kinds().iter().filter(|k| *k == KIND_PING).count() >= 2).await;
    conn.disconnect().await;
}

#[tokio::test]
async fn reconnects_after_connection_loss() {
    let backend = MockBackend::new();
    let (conn, recorder) = manager(&backend, test_connection_config());
    within(conn.connect()).await.unwrap();

    backend.drop_connection();

    eventually(|| backend.connects() == 2 && conn.is_connected()).await;
    assert_eq!(conn.reconnect_attempt(), 0);
    let entries = recorder.entries();
    assert_eq!(entries[0], "connect");
    assert!(entries[1].starts_with("disconnect: connection closed by peer"));
    assert_eq!(entries[2], "reconnecting 1");
    assert_eq!(entries[3], "connect");
    conn.disconnect().await;
}

#[tokio::test]
async fn reconnection_is_bounded() {
    let backend = MockBackend::new();
    backend.set_unreachable(true);
    let (conn, recorder) = manager(&backend, test_connection_config());

    let first = within(conn.connect()).await;
    assert!(matches!(first, Err(ConnectError::Unreachable(_))));

    eventually(|| recorder.has("error: gave up reconnecting")).await;
    eventually(|| conn.state() == ConnectionState::Disconnected).await;
    assert_eq!(backend.connects(), 3);

    // Settled: no silent retries
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.connects(), 3);

    // An explicit connect() resumes
    backend.set_unreachable(false);
    within(conn.connect()).await.unwrap();
    assert_eq!(backend.connects(), 4);
    conn.disconnect().await;
}

#[tokio::test]
async fn recovers_when_backend_comes_back_before_exhaustion() {
    let backend = MockBackend::new();
    backend.fail_next_connects(2);
    let (conn, recorder) = manager(&backend, test_connection_config());

    assert!(within(conn.connect()).await.is_err());

    eventually(|| conn.is_connected()).await;
    assert_eq!(backend.connects(), 3);
    assert_eq!(conn.reconnect_attempt(), 0);
    assert!(recorder.has("reconnecting 2"));
    conn.disconnect().await;
}

#[tokio::test]
async fn disconnect_cancels_pending_reconnection() {
    let backend = MockBackend::new();
    backend.set_unreachable(true);
    let config = ConnectionConfig {
        initial_delay: Duration::from_millis(200),
        max_delay: Duration::from_millis(200),
        ..test_connection_config()
    };
    let (conn, _) = manager(&backend, config);

    assert!(within(conn.connect()).await.is_err());
    within(conn.disconnect()).await;

    assert_eq!(conn.state(), ConnectionState::Disconnected);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(backend.connects(), 1);
}

#[tokio::test]
async fn disconnect_keeps_queued_sends() {
    let backend = MockBackend::new();
    let (conn, recorder) = manager(&backend, test_connection_config());
    within(conn.connect()).await.unwrap();
    within(conn.disconnect()).await;
    assert!(recorder.has("disconnect: disconnected by client"));

    conn.send(Envelope::error("later"));
    assert_eq!(conn.pending_sends(), 1);

    within(conn.connect()).await.unwrap();
    eventually(|| backend.sent().iter().any(|e| e.kind == KIND_ERROR)).await;
    conn.disconnect().await;
}

#[tokio::test]
async fn going_offline_stops_reconnection() {
    let backend = MockBackend::new();
    let (conn, recorder) = manager(&backend, test_connection_config());
    within(conn.connect()).await.unwrap();

    conn.set_network_available(false);
    backend.drop_connection();

    eventually(|| recorder.has("error: network is offline")).await;
    eventually(|| conn.state() == ConnectionState::Disconnected).await;
    assert_eq!(backend.connects(), 1);
}
