// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Conflict detection and resolution between pending local events and
//! incoming remote events.
//!
//! Detection rule: a remote event conflicts with a pending local event when
//! both address the same entity and the local timestamp is not older than
//! the remote one. A bulk update addresses every entity in its items, and
//! collides as a whole when any of them is shared.
//!
//! Resolution rules, per policy:
//! - `latest_wins`: the event ordering later by [`SyncEvent::conflict_order`] survives
//! - `merge`: remote fields overlaid by local fields, re-issued as a new local event
//! - `manual`: nothing is decided; the conflict is handed to the caller
//!
//! Deletes and bulk updates cannot be merged field by field, so `merge`
//! falls back to `latest_wins` whenever either side is one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::event::{EntityKey, Operation, Source, SyncEvent};

/// How conflicting local and remote writes are reconciled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    LatestWins,
    Merge,
    Manual,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::LatestWins => "latest_wins",
            ConflictPolicy::Merge => "merge",
            ConflictPolicy::Manual => "manual",
        }
    }

    /// Decides a conflict. `merged_at` stamps the event produced by `merge`.
    pub fn resolve(&self, conflict: &Conflict, merged_at: DateTime<Utc>) -> Resolution {
        match self {
            ConflictPolicy::LatestWins => resolve_latest_wins(conflict),
            ConflictPolicy::Merge => resolve_merge(conflict, merged_at),
            ConflictPolicy::Manual => Resolution::Deferred,
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "latest_wins" => Ok(ConflictPolicy::LatestWins),
            "merge" => Ok(ConflictPolicy::Merge),
            "manual" => Ok(ConflictPolicy::Manual),
            _ => Err(Error::InvalidPolicy(s.to_string())),
        }
    }
}

/// A pending local event and the remote event that collided with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub local: SyncEvent,
    pub remote: SyncEvent,
}

impl Conflict {
    pub fn new(local: SyncEvent, remote: SyncEvent) -> Self {
        Conflict { local, remote }
    }

    /// The entity both sides address; the first shared one for bulk updates.
    pub fn key(&self) -> Option<EntityKey> {
        let remote = self.remote.keys();
        self.local.keys().into_iter().find(|key| remote.contains(key))
    }
}

/// Outcome of applying a policy to a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Local wins: the pending entry stays queued and the remote event is dropped.
    KeepLocal,
    /// Remote wins: the remote event is applied and the pending entry dropped.
    ApplyRemote,
    /// A new local event replacing the pending entry.
    Merged(SyncEvent),
    /// Left for arbitration; the pending entry stays queued.
    Deferred,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::KeepLocal => "keep_local",
            Resolution::ApplyRemote => "apply_remote",
            Resolution::Merged(_) => "merged",
            Resolution::Deferred => "deferred",
        }
    }
}

/// Returns true if `remote` collides with the pending `local` event.
pub fn conflicts(local: &SyncEvent, remote: &SyncEvent) -> bool {
    if local.timestamp < remote.timestamp {
        return false;
    }
    let remote_keys = remote.keys();
    local.keys().iter().any(|key| remote_keys.contains(key))
}

fn resolve_latest_wins(conflict: &Conflict) -> Resolution {
    match conflict.local.conflict_order(&conflict.remote) {
        Ordering::Less => Resolution::ApplyRemote,
        Ordering::Equal | Ordering::Greater => Resolution::KeepLocal,
    }
}

fn resolve_merge(conflict: &Conflict, merged_at: DateTime<Utc>) -> Resolution {
    let local = &conflict.local;
    let remote = &conflict.remote;

    let unmergeable = |op: Operation| matches!(op, Operation::Delete | Operation::BulkUpdate);
    if unmergeable(local.operation) || unmergeable(remote.operation) {
        return resolve_latest_wins(conflict);
    }

    let operation = match local.operation {
        Operation::Create => Operation::Create,
        _ => Operation::Update,
    };

    Resolution::Merged(SyncEvent {
        entity_type: local.entity_type,
        operation,
        payload: shallow_merge(&remote.payload, &local.payload),
        origin_user_id: local.origin_user_id.clone(),
        timestamp: merged_at.max(local.timestamp),
        source: Source::Local,
    })
}

/// Field-by-field merge of two JSON objects; `overlay` wins on shared keys.
///
/// Non-object inputs resolve to `overlay`.
pub fn shallow_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}

#[cfg(test)]
#[path = "conflict_tests.rs"]
mod tests;
