// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::event::{EntityType, Operation};
use chrono::TimeZone;

fn at(secs: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, secs).unwrap()
}

fn task_event() -> SyncEvent {
    SyncEvent::new(
        EntityType::Task,
        Operation::Update,
        json!({"id": "t1", "status": "done"}),
        "user-1",
        at(5),
    )
}

#[test]
fn event_envelope_wire_shape() {
    let envelope = Envelope::event(&task_event()).unwrap();
    let value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();

    assert_eq!(value["type"], "event");
    assert_eq!(value["userId"], "user-1");
    assert_eq!(value["payload"]["entityType"], "task");
    assert_eq!(value["payload"]["payload"]["id"], "t1");
    assert!(value["timestamp"].as_str().unwrap().starts_with("2026-03-01T10:00:05"));
}

#[test]
fn event_envelope_decodes_to_event() {
    let event = task_event();
    let json = Envelope::event(&event).unwrap().to_json().unwrap();

    let decoded = Envelope::from_json(&json).unwrap().decode().unwrap();
    assert_eq!(decoded, Message::Event(event));
}

#[test]
fn full_sync_response_uses_camel_case_payload() {
    let collections =
        Collections::from_entities(EntityType::Pillar, vec![json!({"id": "p1", "name": "Health"})])
            .unwrap();
    let message = Message::FullSyncResponse {
        collections: collections.clone(),
        as_of: at(7),
    };
    let envelope = Envelope::new(&message, None).unwrap();

    assert_eq!(envelope.kind, KIND_FULL_SYNC_RESPONSE);
    assert!(envelope.payload.get("asOf").is_some());
    assert_eq!(envelope.decode().unwrap(), message);
}

#[test]
fn full_sync_request_carries_since() {
    let envelope = Envelope::new(&Message::FullSyncRequest { since: None }, Some("u1")).unwrap();
    assert_eq!(envelope.user_id.as_deref(), Some("u1"));
    assert_eq!(
        envelope.decode().unwrap(),
        Message::FullSyncRequest { since: None }
    );
}

#[test]
fn keepalive_frames() {
    let ping = Envelope::ping(42);
    assert!(ping.is_keepalive());
    assert_eq!(ping.decode().unwrap(), Message::Ping { id: 42 });
    assert_eq!(Envelope::pong(42).decode().unwrap(), Message::Pong { id: 42 });
    assert!(!Envelope::error("boom").is_keepalive());
}

#[test]
fn error_frame_decodes_message() {
    let decoded = Envelope::error("quota exceeded").decode().unwrap();
    assert_eq!(
        decoded,
        Message::Error {
            message: "quota exceeded".into()
        }
    );
}

#[test]
fn unknown_kind_parses_but_fails_to_decode() {
    let json = r#"{"type":"presence","payload":{"online":true},"timestamp":"2026-03-01T10:00:00Z"}"#;
    let envelope = Envelope::from_json(json).unwrap();

    assert!(envelope.user_id.is_none());
    assert!(matches!(
        envelope.decode(),
        Err(Error::UnknownMessage(kind)) if kind == "presence"
    ));
}

#[test]
fn malformed_event_payload_is_a_json_error() {
    let json = r#"{"type":"event","payload":{"entityType":"goal"},"timestamp":"2026-03-01T10:00:00Z"}"#;
    let envelope = Envelope::from_json(json).unwrap();
    assert!(matches!(envelope.decode(), Err(Error::Json(_))));
}
