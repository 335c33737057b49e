// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::event::EntityType;
use chrono::TimeZone;
use serde_json::json;
use yare::parameterized;

fn at(secs: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, secs).unwrap()
}

fn local(payload: Value, secs: u32) -> SyncEvent {
    SyncEvent::new(EntityType::Task, Operation::Update, payload, "me", at(secs))
}

fn remote(payload: Value, secs: u32) -> SyncEvent {
    SyncEvent::new(EntityType::Task, Operation::Update, payload, "them", at(secs))
        .with_source(Source::Remote)
}

#[parameterized(
    local_newer = { 5, 2, true },
    same_instant = { 3, 3, true },
    local_older = { 2, 5, false },
)]
fn detection_requires_local_not_older(local_secs: u32, remote_secs: u32, expected: bool) {
    let l = local(json!({"id": "t1"}), local_secs);
    let r = remote(json!({"id": "t1"}), remote_secs);
    assert_eq!(conflicts(&l, &r), expected);
}

#[test]
fn different_entities_never_conflict() {
    let l = local(json!({"id": "t1"}), 5);
    let r = remote(json!({"id": "t2"}), 2);
    assert!(!conflicts(&l, &r));

    let mut other_type = remote(json!({"id": "t1"}), 2);
    other_type.entity_type = EntityType::Project;
    assert!(!conflicts(&l, &other_type));
}

fn bulk(items: Value, secs: u32) -> SyncEvent {
    SyncEvent::new(
        EntityType::Task,
        Operation::BulkUpdate,
        json!({ "items": items }),
        "them",
        at(secs),
    )
}

#[test]
fn bulk_updates_conflict_through_any_item() {
    let pending = local(json!({"id": "t2", "v": 1}), 5);
    let incoming = bulk(json!([{"id": "t1"}, {"id": "t2"}]), 2).with_source(Source::Remote);
    assert!(conflicts(&pending, &incoming));
    assert_eq!(
        Conflict::new(pending, incoming).key(),
        Some(EntityKey::new(EntityType::Task, "t2"))
    );

    let pending_bulk = bulk(json!([{"id": "t1"}, {"id": "t2"}]), 5);
    assert!(conflicts(&pending_bulk, &remote(json!({"id": "t1"}), 2)));
    assert!(!conflicts(&pending_bulk, &remote(json!({"id": "t3"}), 2)));
    assert!(!conflicts(&pending_bulk, &remote(json!({"id": "t1"}), 7)));
}

#[test]
fn merge_with_bulk_update_falls_back_to_latest_wins() {
    let pending = local(json!({"id": "t1", "v": 1}), 5);
    let incoming = bulk(json!([{"id": "t1", "v": 2}]), 2).with_source(Source::Remote);
    let conflict = Conflict::new(pending, incoming);

    assert_eq!(
        ConflictPolicy::Merge.resolve(&conflict, at(9)),
        Resolution::KeepLocal
    );
}

#[test]
fn latest_wins_keeps_newer_local() {
    // local 10:00:05 vs remote 10:00:02: local wins, remote discarded
    let conflict = Conflict::new(
        local(json!({"id": "t1", "status": "done"}), 5),
        remote(json!({"id": "t1", "status": "todo"}), 2),
    );
    let resolution = ConflictPolicy::LatestWins.resolve(&conflict, at(9));
    assert_eq!(resolution, Resolution::KeepLocal);
}

#[test]
fn latest_wins_applies_newer_remote() {
    let conflict = Conflict::new(
        local(json!({"id": "t1", "status": "done"}), 2),
        remote(json!({"id": "t1", "status": "todo"}), 5),
    );
    let resolution = ConflictPolicy::LatestWins.resolve(&conflict, at(9));
    assert_eq!(resolution, Resolution::ApplyRemote);
}

#[test]
fn latest_wins_tie_goes_to_local() {
    let conflict = Conflict::new(local(json!({"id": "t1"}), 3), remote(json!({"id": "t1"}), 3));
    assert_eq!(
        ConflictPolicy::LatestWins.resolve(&conflict, at(9)),
        Resolution::KeepLocal
    );
}

#[test]
fn merge_prefers_local_fields() {
    let conflict = Conflict::new(
        local(json!({"id": "t1", "status": "done"}), 5),
        remote(json!({"id": "t1", "status": "todo", "title": "Water plants"}), 2),
    );

    let Resolution::Merged(merged) = ConflictPolicy::Merge.resolve(&conflict, at(9)) else {
        unreachable!("merge policy must merge two updates");
    };

    assert_eq!(
        merged.payload,
        json!({"id": "t1", "status": "done", "title": "Water plants"})
    );
    assert_eq!(merged.source, Source::Local);
    assert_eq!(merged.operation, Operation::Update);
    assert_eq!(merged.timestamp, at(9));
    assert_eq!(merged.origin_user_id, "me");
}

#[test]
fn merge_with_delete_falls_back_to_latest_wins() {
    let mut deleted = local(json!({"id": "t1"}), 5);
    deleted.operation = Operation::Delete;
    let conflict = Conflict::new(deleted, remote(json!({"id": "t1", "title": "x"}), 2));

    assert_eq!(
        ConflictPolicy::Merge.resolve(&conflict, at(9)),
        Resolution::KeepLocal
    );
}

#[test]
fn manual_defers() {
    let conflict = Conflict::new(local(json!({"id": "t1"}), 5), remote(json!({"id": "t1"}), 2));
    assert_eq!(
        ConflictPolicy::Manual.resolve(&conflict, at(9)),
        Resolution::Deferred
    );
    assert_eq!(conflict.key().unwrap().to_string(), "task:t1");
}

#[parameterized(
    latest = { "latest_wins", ConflictPolicy::LatestWins },
    latest_kebab = { "latest-wins", ConflictPolicy::LatestWins },
    merge = { "merge", ConflictPolicy::Merge },
    manual = { "MANUAL", ConflictPolicy::Manual },
)]
fn policy_from_str(input: &str, expected: ConflictPolicy) {
    assert_eq!(input.parse::<ConflictPolicy>().unwrap(), expected);
}

#[test]
fn policy_defaults_to_latest_wins() {
    assert_eq!(ConflictPolicy::default(), ConflictPolicy::LatestWins);
}

#[test]
fn shallow_merge_non_objects_take_overlay() {
    assert_eq!(shallow_merge(&json!(1), &json!({"a": 1})), json!({"a": 1}));
    assert_eq!(shallow_merge(&json!({"a": 1}), &json!(null)), json!(null));
}
