// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the pillar-relay binary.

#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Helper to spawn a relay process and clean it up on drop.
struct RelayProcess {
    child: Child,
    port: u16,
}

impl RelayProcess {
    fn spawn(data: &Path, port: u16) -> Self {
        let child = Command::new(env!("CARGO_BIN_EXE_pillar-relay"))
            .arg("--bind")
            .arg(format!("127.0.0.1:{}", port))
            .arg("--data")
            .arg(data)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn relay process");
        RelayProcess { child, port }
    }

    fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Retries until the relay accepts; CI runners can be slow.
    async fn connect(&self) -> Ws {
        for _ in 0..20 {
            if let Ok(Ok((stream, _))) =
                tokio::time::timeout(Duration::from_millis(500), connect_async(self.ws_url())).await
            {
                return stream;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        panic!("relay did not accept connections");
    }
}

impl Drop for RelayProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn test_port(offset: u16) -> u16 {
    49152 + (std::process::id() % 1000) as u16 * 2 + offset
}

async fn request(ws: &mut Ws, frame: serde_json::Value) -> serde_json::Value {
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .expect("send frame");
    match tokio::time::timeout(Duration::from_secs(5), ws.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("Expected text frame, got {:?}", other),
    }
}

#[tokio::test]
async fn relay_answers_ping() {
    let temp_dir = tempfile::tempdir().expect("create temp dir");
    let relay = RelayProcess::spawn(temp_dir.path(), test_port(0));
    let mut ws = relay.connect().await;

    let reply = request(
        &mut ws,
        serde_json::json!({
            "type": "ping",
            "payload": {"id": 12345},
            "timestamp": "2026-03-01T10:00:00Z"
        }),
    )
    .await;

    assert_eq!(reply["type"], "pong");
    assert_eq!(reply["payload"]["id"], 12345);
}

#[tokio::test]
async fn relay_reloads_event_log_on_restart() {
    let temp_dir = tempfile::tempdir().expect("create temp dir");
    let event = serde_json::json!({
        "type": "event",
        "payload": {
            "entityType": "project",
            "operation": "create",
            "payload": {"id": "p1", "name": "Garden"},
            "originUserId": "u1",
            "timestamp": "2026-03-01T10:00:00Z",
            "source": "local"
        },
        "timestamp": "2026-03-01T10:00:00Z",
        "userId": "u1"
    });
    let full_sync = serde_json::json!({
        "type": "full_sync_request",
        "payload": {"since": null},
        "timestamp": "2026-03-01T10:00:01Z"
    });

    {
        let relay = RelayProcess::spawn(temp_dir.path(), test_port(1));
        let mut ws = relay.connect().await;
        ws.send(Message::Text(event.to_string().into()))
            .await
            .expect("send event");
        let reply = request(&mut ws, full_sync.clone()).await;
        assert_eq!(reply["payload"]["collections"]["project"]["p1"]["name"], "Garden");
    }

    assert!(temp_dir.path().join("events.jsonl").exists());

    let relay = RelayProcess::spawn(temp_dir.path(), test_port(1));
    let mut ws = relay.connect().await;
    let reply = request(&mut ws, full_sync).await;
    assert_eq!(reply["type"], "full_sync_response");
    assert_eq!(reply["payload"]["collections"]["project"]["p1"]["name"], "Garden");
}
