// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Last materialized view of all entity collections.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use pillar_core::store::{load_json, save_json};
use pillar_core::{Collections, KeyValueStore, OfflineSnapshot, SyncEvent};
use tracing::{debug, error, warn};

use crate::notify::{Notifier, SyncNotice};

/// Store key for the [`OfflineSnapshot`].
pub const SNAPSHOT_KEY: &str = "offline_snapshot";

/// Owns the offline snapshot. Every mutation is written through to the store.
pub struct OfflineCache {
    store: Arc<dyn KeyValueStore>,
    notifier: Notifier,
    snapshot: Mutex<Option<OfflineSnapshot>>,
}

impl OfflineCache {
    /// Opens the cache, reading any persisted snapshot.
    pub fn load(store: Arc<dyn KeyValueStore>, notifier: Notifier) -> Self {
        let snapshot = match load_json::<OfflineSnapshot>(store.as_ref(), SNAPSHOT_KEY) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("discarding unreadable offline snapshot: {}", e);
                notifier.publish(SyncNotice::PersistenceFailed {
                    key: SNAPSHOT_KEY.to_string(),
                    error: e.to_string(),
                });
                None
            }
        };
        OfflineCache {
            store,
            notifier,
            snapshot: Mutex::new(snapshot),
        }
    }

    /// Merges a partial dataset received as of `as_of` and persists.
    ///
    /// Merging the same partial twice gives the same snapshot as once.
    pub fn cache_snapshot(&self, partial: &Collections, as_of: DateTime<Utc>) {
        let mut guard = self.snapshot();
        let snapshot = guard.get_or_insert_with(OfflineSnapshot::new);
        snapshot.merge(partial, as_of);
        debug!(entities = partial.len(), "snapshot merged");
        self.persist(snapshot);
    }

    /// Overwrites the snapshot wholesale (full sync) and persists.
    pub fn replace_snapshot(&self, collections: Collections, as_of: DateTime<Utc>) {
        let mut guard = self.snapshot();
        let snapshot = guard.get_or_insert_with(OfflineSnapshot::new);
        snapshot.replace(collections, as_of);
        debug!(entities = snapshot.collections.len(), "snapshot replaced");
        self.persist(snapshot);
    }

    /// Applies one event to the snapshot and persists. Returns false if the
    /// event changed nothing.
    pub fn apply_event(&self, event: &SyncEvent) -> bool {
        let mut guard = self.snapshot();
        let snapshot = guard.get_or_insert_with(OfflineSnapshot::new);
        let changed = snapshot.apply_event(event);
        if changed {
            self.persist(snapshot);
        }
        changed
    }

    pub fn get_snapshot(&self) -> Option<OfflineSnapshot> {
        self.snapshot().clone()
    }

    /// True iff a snapshot exists and the store survives restarts.
    pub fn can_work_offline(&self) -> bool {
        self.snapshot().is_some() && self.store.is_persistent()
    }

    /// Forgets the snapshot (logout / data reset).
    pub fn clear(&self) {
        *self.snapshot() = None;
        if let Err(e) = self.store.remove(SNAPSHOT_KEY) {
            self.report(e);
        }
    }

    fn snapshot(&self) -> MutexGuard<'_, Option<OfflineSnapshot>> {
        self.snapshot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, snapshot: &OfflineSnapshot) {
        if let Err(e) = save_json(self.store.as_ref(), SNAPSHOT_KEY, snapshot) {
            self.report(e);
        }
    }

    fn report(&self, e: pillar_core::Error) {
        error!("failed to persist offline snapshot: {}", e);
        self.notifier.publish(SyncNotice::PersistenceFailed {
            key: SNAPSHOT_KEY.to_string(),
            error: e.to_string(),
        });
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
