// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use chrono::TimeZone;
use serde_json::json;

fn at(secs: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, secs).unwrap()
}

fn event(operation: Operation, payload: Value) -> SyncEvent {
    SyncEvent::new(EntityType::Task, operation, payload, "me", at(0))
}

fn tasks(entities: Vec<Value>) -> Collections {
    Collections::from_entities(EntityType::Task, entities).unwrap()
}

#[test]
fn merge_same_partial_twice_is_idempotent() {
    let mut once = OfflineSnapshot::new();
    let mut twice = OfflineSnapshot::new();
    let partial = tasks(vec![
        json!({"id": "t1", "title": "Plan week"}),
        json!({"id": "t2", "title": "Review"}),
    ]);

    once.merge(&partial, at(5));
    twice.merge(&partial, at(5));
    twice.merge(&partial, at(5));

    assert_eq!(once, twice);
    assert_eq!(twice.last_sync, Some(at(5)));
    assert_eq!(twice.collections.len(), 2);
}

#[test]
fn merge_keeps_entities_absent_from_partial() {
    let mut snapshot = OfflineSnapshot::new();
    snapshot.merge(&tasks(vec![json!({"id": "t1"})]), at(1));
    snapshot.merge(&tasks(vec![json!({"id": "t2"})]), at(2));

    assert!(snapshot.collections.get(EntityType::Task, "t1").is_some());
    assert!(snapshot.collections.get(EntityType::Task, "t2").is_some());
}

#[test]
fn merge_never_moves_last_sync_backwards() {
    let mut snapshot = OfflineSnapshot::new();
    snapshot.merge(&Collections::new(), at(9));
    snapshot.merge(&Collections::new(), at(3));
    assert_eq!(snapshot.last_sync, Some(at(9)));
}

#[test]
fn replace_overwrites_wholesale() {
    let mut snapshot = OfflineSnapshot::new();
    snapshot.merge(&tasks(vec![json!({"id": "t1"})]), at(1));

    let areas = Collections::from_entities(EntityType::Area, vec![json!({"id": "a1"})]).unwrap();
    snapshot.replace(areas, at(2));

    assert!(snapshot.collections.get(EntityType::Task, "t1").is_none());
    assert!(snapshot.collections.get(EntityType::Area, "a1").is_some());
    assert_eq!(snapshot.last_sync, Some(at(2)));
}

#[test]
fn apply_create_update_delete() {
    let mut collections = Collections::new();

    assert!(collections.apply(&event(
        Operation::Create,
        json!({"id": "t1", "title": "Stretch", "status": "todo"})
    )));
    assert!(collections.apply(&event(
        Operation::Update,
        json!({"id": "t1", "status": "done"})
    )));
    assert_eq!(
        collections.get(EntityType::Task, "t1"),
        Some(&json!({"id": "t1", "title": "Stretch", "status": "done"}))
    );

    assert!(collections.apply(&event(Operation::Delete, json!({"id": "t1"}))));
    assert!(collections.get(EntityType::Task, "t1").is_none());
    assert!(!collections.apply(&event(Operation::Delete, json!({"id": "t1"}))));
}

#[test]
fn apply_update_inserts_unknown_entity() {
    let mut collections = Collections::new();
    collections.apply(&event(Operation::Update, json!({"id": "t9", "status": "done"})));
    assert_eq!(
        collections.get(EntityType::Task, "t9"),
        Some(&json!({"id": "t9", "status": "done"}))
    );
}

#[test]
fn apply_bulk_update_merges_each_item() {
    let mut collections = tasks(vec![
        json!({"id": "t1", "title": "A", "status": "todo"}),
        json!({"id": "t2", "title": "B", "status": "todo"}),
    ]);

    let applied = collections.apply(&event(
        Operation::BulkUpdate,
        json!({"items": [{"id": "t1", "status": "done"}, {"id": "t2", "status": "done"}]}),
    ));

    assert!(applied);
    assert_eq!(collections.get(EntityType::Task, "t1").unwrap()["status"], "done");
    assert_eq!(collections.get(EntityType::Task, "t2").unwrap()["title"], "B");
}

#[test]
fn apply_create_without_id_is_a_no_op() {
    let mut collections = Collections::new();
    assert!(!collections.apply(&event(Operation::Create, json!({"title": "x"}))));
    assert!(collections.is_empty());
}

#[test]
fn insert_requires_id() {
    let mut collections = Collections::new();
    assert!(collections.insert(EntityType::Pillar, json!({"name": "Health"})).is_err());
}

#[test]
fn counts_skip_empty_types() {
    let mut collections = tasks(vec![json!({"id": "t1"}), json!({"id": "t2"})]);
    collections.apply(&SyncEvent::new(
        EntityType::Project,
        Operation::Delete,
        json!({"id": "p1"}),
        "me",
        at(0),
    ));
    assert_eq!(collections.counts(), vec![(EntityType::Task, 2)]);
}

#[test]
fn snapshot_serializes_with_entity_type_keys() {
    let mut snapshot = OfflineSnapshot::new();
    snapshot.merge(&tasks(vec![json!({"id": "t1"})]), at(1));

    let value = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(value["collections"]["task"]["t1"]["id"], "t1");
    assert!(value["lastSync"].is_string());

    let back: OfflineSnapshot = serde_json::from_value(value).unwrap();
    assert_eq!(back, snapshot);
}
