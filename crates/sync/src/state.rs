// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted synchronization state.

use chrono::{DateTime, Utc};
use pillar_core::store::{load_json, save_json};
use pillar_core::{conflict, ConflictPolicy, EntityKey, KeyValueStore, Operation, SyncEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Store key for [`SyncState`].
pub const SYNC_STATE_KEY: &str = "sync_state";

/// Process-wide sync state, owned by the coordinator.
///
/// Every entry of `pending_changes` is a local event not yet acknowledged
/// by the transport; insertion order is send order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pending_changes: Vec<SyncEvent>,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

impl SyncState {
    pub fn new(conflict_policy: ConflictPolicy) -> Self {
        SyncState {
            conflict_policy,
            ..Self::default()
        }
    }

    pub fn load(store: &dyn KeyValueStore) -> pillar_core::Result<Option<Self>> {
        load_json(store, SYNC_STATE_KEY)
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> pillar_core::Result<()> {
        save_json(store, SYNC_STATE_KEY, self)
    }

    /// Index of the newest pending event that `remote` collides with.
    pub fn conflicting_pending(&self, remote: &SyncEvent) -> Option<usize> {
        self.pending_changes
            .iter()
            .rposition(|local| conflict::conflicts(local, remote))
    }

    /// Removes the first pending entry equal to `event`.
    pub fn remove_pending(&mut self, event: &SyncEvent) -> bool {
        match self.pending_changes.iter().position(|p| p == event) {
            Some(index) => {
                self.pending_changes.remove(index);
                true
            }
            None => false,
        }
    }

    /// Drops pending changes to the same entities that are strictly older
    /// than `remote`. A bulk update only loses its superseded items. Returns
    /// how many entries were dropped entirely.
    pub fn drop_superseded(&mut self, remote: &SyncEvent) -> usize {
        let keys = remote.keys();
        if keys.is_empty() {
            return 0;
        }
        self.retain_stripped(&keys, |local| local.timestamp < remote.timestamp)
    }

    /// Drops every pending change to `key`, trimming bulk updates that
    /// also touch other entities. Returns how many entries were dropped.
    pub fn discard_entity(&mut self, key: &EntityKey) -> usize {
        self.retain_stripped(std::slice::from_ref(key), |_| true)
    }

    fn retain_stripped(
        &mut self,
        gone: &[EntityKey],
        applies: impl Fn(&SyncEvent) -> bool,
    ) -> usize {
        let before = self.pending_changes.len();
        self.pending_changes = std::mem::take(&mut self.pending_changes)
            .into_iter()
            .filter_map(|local| {
                if applies(&local) {
                    strip_keys(local, gone)
                } else {
                    Some(local)
                }
            })
            .collect();
        before - self.pending_changes.len()
    }

    /// Moves `last_sync_time` forward; never backwards.
    pub fn advance(&mut self, seen: DateTime<Utc>) {
        match self.last_sync_time {
            Some(last) if last >= seen => {}
            _ => self.last_sync_time = Some(seen),
        }
    }
}

/// `event` without the parts addressing `gone`; `None` when nothing is left.
fn strip_keys(mut event: SyncEvent, gone: &[EntityKey]) -> Option<SyncEvent> {
    if event.operation != Operation::BulkUpdate {
        return match event.key() {
            Some(key) if gone.contains(&key) => None,
            _ => Some(event),
        };
    }

    let entity_type = event.entity_type;
    let items: Vec<Value> = event
        .bulk_items()
        .iter()
        .filter(|item| {
            item.get("id")
                .and_then(Value::as_str)
                .is_none_or(|id| !gone.contains(&EntityKey::new(entity_type, id)))
        })
        .cloned()
        .collect();
    if items.is_empty() {
        return None;
    }
    if let Some(fields) = event.payload.as_object_mut() {
        fields.insert("items".to_string(), Value::Array(items));
    }
    Some(event)
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
