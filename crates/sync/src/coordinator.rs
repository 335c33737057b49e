// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Reconciles local and remote mutations.
//!
//! The coordinator keeps per-entity-type subscriber lists, the list of
//! pending local changes, and the conflict policy:
//!
//! ```text
//!  publish_local_change ──► pending_changes ──► transmit (ack) ──► removed
//!           │                                         ▲
//!           ▼                                         │ on_connected
//!      subscribers ◄── on_remote_event ◄── conflict check
//! ```
//!
//! Every local change waits in `pending_changes` until the transport reports
//! it written, whether or not the connection is up when it is published.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pillar_core::{
    Conflict, ConflictPolicy, EntityKey, EntityType, Envelope, EventClock, KeyValueStore, Message,
    Operation, Resolution, Source, SyncEvent,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::notify::{Notifier, SyncNotice};
use crate::state::{SyncState, SYNC_STATE_KEY};

/// Callback invoked once per applied event, in event order.
pub type Callback = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

type SubscriberMap = HashMap<EntityType, Vec<(u64, Callback)>>;

/// Handle returned by [`SyncCoordinator::subscribe`].
pub struct Subscription {
    id: u64,
    entity_type: EntityType,
    subscribers: Weak<Mutex<SubscriberMap>>,
}

impl Subscription {
    /// Stops delivery to this subscriber.
    pub fn unsubscribe(self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            let mut map = subscribers.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(list) = map.get_mut(&self.entity_type) {
                list.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

/// What happened to a remote event that was not left for arbitration.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    /// Applied and delivered to subscribers.
    Applied,
    /// A newer pending local change won; the remote event was dropped.
    KeptLocal,
    /// Both sides were merged into a new local change, now pending.
    Merged(SyncEvent),
}

/// How a manually arbitrated conflict ends.
#[derive(Debug, Clone, PartialEq)]
pub enum Arbitration {
    /// Keep the pending local change; it will be sent.
    KeepLocal,
    /// Drop the local change and apply the remote one.
    KeepRemote,
    /// Replace both with a new local change carrying this payload.
    Replace(Value),
}

impl Arbitration {
    fn as_str(&self) -> &'static str {
        match self {
            Arbitration::KeepLocal => "keep_local",
            Arbitration::KeepRemote => "keep_remote",
            Arbitration::Replace(_) => "replaced",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub user_id: String,
    pub conflict_policy: ConflictPolicy,
    /// Request a full sync on connect when the last sync is older than this.
    pub full_sync_after: Option<Duration>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        CoordinatorOptions {
            user_id: "local".to_string(),
            conflict_policy: ConflictPolicy::default(),
            full_sync_after: Some(Duration::from_secs(86_400)),
        }
    }
}

struct Inner {
    options: CoordinatorOptions,
    conn: ConnectionManager,
    store: Arc<dyn KeyValueStore>,
    notifier: Notifier,
    clock: EventClock,
    state: Mutex<SyncState>,
    subscribers: Arc<Mutex<SubscriberMap>>,
    next_subscriber: AtomicU64,
    conflicts: Mutex<Vec<Conflict>>,
    flushing: AtomicBool,
}

/// Sync coordinator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    /// Creates a coordinator, loading any persisted [`SyncState`].
    ///
    /// Unreadable state is reported and replaced by an empty one.
    pub fn new(
        conn: ConnectionManager,
        store: Arc<dyn KeyValueStore>,
        notifier: Notifier,
        options: CoordinatorOptions,
    ) -> Self {
        let mut state = match SyncState::load(store.as_ref()) {
            Ok(Some(state)) => state,
            Ok(None) => SyncState::default(),
            Err(e) => {
                warn!("discarding unreadable sync state: {}", e);
                notifier.publish(SyncNotice::PersistenceFailed {
                    key: SYNC_STATE_KEY.to_string(),
                    error: e.to_string(),
                });
                SyncState::default()
            }
        };
        state.conflict_policy = options.conflict_policy;
        state.pending_changes.retain(SyncEvent::is_local);

        let clock = EventClock::new();
        if let Some(newest) = state.pending_changes.iter().map(|e| e.timestamp).max() {
            clock.observe(newest);
        }

        debug!(
            pending = state.pending_changes.len(),
            policy = %state.conflict_policy,
            "sync state loaded"
        );

        let inner = Inner {
            options,
            conn,
            store,
            notifier,
            clock,
            state: Mutex::new(state),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_subscriber: AtomicU64::new(1),
            conflicts: Mutex::new(Vec::new()),
            flushing: AtomicBool::new(false),
        };
        SyncCoordinator {
            inner: Arc::new(inner),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.inner.options.user_id
    }

    /// A local event stamped by the monotonic event clock.
    pub fn local_event(
        &self,
        entity_type: EntityType,
        operation: Operation,
        payload: Value,
    ) -> SyncEvent {
        SyncEvent::new(
            entity_type,
            operation,
            payload,
            self.inner.options.user_id.clone(),
            self.inner.clock.now(),
        )
    }

    pub fn subscribe(&self, entity_type: EntityType, callback: Callback) -> Subscription {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers()
            .entry(entity_type)
            .or_default()
            .push((id, callback));
        Subscription {
            id,
            entity_type,
            subscribers: Arc::downgrade(&self.inner.subscribers),
        }
    }

    pub fn subscriber_count(&self, entity_type: EntityType) -> usize {
        self.inner
            .subscribers()
            .get(&entity_type)
            .map_or(0, Vec::len)
    }

    /// Records a local mutation.
    ///
    /// Subscribers see the change immediately. The event joins
    /// `pending_changes` (persisted) and, when connected, a flush starts in
    /// the background. Never waits on the network.
    pub fn publish_local_change(&self, event: SyncEvent) -> Result<()> {
        if event.source != Source::Local {
            return Err(Error::InvalidEvent(format!(
                "published events must be local, got {:?}",
                event.source
            )));
        }
        event
            .validate()
            .map_err(|e| Error::InvalidEvent(e.to_string()))?;
        self.inner.clock.observe(event.timestamp);

        debug!(
            entity = %event.entity_type,
            op = %event.operation,
            id = event.entity_id().unwrap_or("-"),
            "local change"
        );
        self.inner.deliver(&event);

        {
            let mut state = self.inner.state();
            state.pending_changes.push(event);
            self.inner.persist(&state);
        }

        if self.inner.conn.is_connected() {
            self.spawn_flush();
        }
        Ok(())
    }

    /// Handles one event received from the backend.
    ///
    /// Returns [`Error::ConflictUnresolved`] when the policy leaves the
    /// conflict for arbitration; the local change then stays pending.
    pub fn on_remote_event(&self, event: SyncEvent) -> Result<RemoteOutcome> {
        let event = match event.source {
            Source::Derived => event,
            _ => event.with_source(Source::Remote),
        };
        event
            .validate()
            .map_err(|e| Error::InvalidEvent(e.to_string()))?;
        self.inner.clock.observe(event.timestamp);

        let mut state = self.inner.state();
        let Some(index) = state.conflicting_pending(&event) else {
            if state.conflict_policy == ConflictPolicy::LatestWins {
                let dropped = state.drop_superseded(&event);
                if dropped > 0 {
                    debug!(dropped, "older pending changes superseded by remote");
                }
            }
            self.inner.apply_remote(state, &event);
            return Ok(RemoteOutcome::Applied);
        };

        let conflict = Conflict::new(state.pending_changes[index].clone(), event);
        let policy = state.conflict_policy;
        let label = conflict.key().map(|k| k.to_string()).unwrap_or_default();
        info!(key = %label, %policy, "conflict detected");
        self.inner.notifier.publish(SyncNotice::ConflictDetected {
            conflict: Box::new(conflict.clone()),
        });

        let resolution = policy.resolve(&conflict, self.inner.clock.now());
        let outcome = match &resolution {
            Resolution::KeepLocal => {
                state.advance(conflict.remote.timestamp);
                self.inner.persist(&state);
                drop(state);
                RemoteOutcome::KeptLocal
            }
            Resolution::ApplyRemote => {
                state.remove_pending(&conflict.local);
                self.inner.apply_remote(state, &conflict.remote);
                RemoteOutcome::Applied
            }
            Resolution::Merged(merged) => {
                state.remove_pending(&conflict.local);
                state.pending_changes.push(merged.clone());
                state.advance(conflict.remote.timestamp);
                self.inner.persist(&state);
                drop(state);
                self.inner.deliver(merged);
                if self.inner.conn.is_connected() {
                    self.spawn_flush();
                }
                RemoteOutcome::Merged(merged.clone())
            }
            Resolution::Deferred => {
                drop(state);
                self.inner.defer(conflict.clone());
                return Err(Error::ConflictUnresolved(Box::new(conflict)));
            }
        };

        self.inner.resolved(&conflict, resolution.as_str());
        Ok(outcome)
    }

    /// Asks the backend for the complete dataset and forgets `lastSyncTime`.
    pub fn request_full_sync(&self) -> Result<()> {
        {
            let mut state = self.inner.state();
            state.last_sync_time = None;
            self.inner.persist(&state);
        }
        let request = Envelope::new(
            &Message::FullSyncRequest { since: None },
            Some(&self.inner.options.user_id),
        )?;
        info!("requesting full sync");
        self.inner.conn.send(request);
        self.inner.notifier.publish(SyncNotice::FullSyncRequested);
        Ok(())
    }

    /// Records that a full dataset as of `as_of` has been received.
    pub fn apply_full_sync(&self, as_of: DateTime<Utc>) {
        self.inner.clock.observe(as_of);
        let mut state = self.inner.state();
        state.last_sync_time = Some(as_of);
        self.inner.persist(&state);
    }

    /// Reconnect hook: drains pending changes and, after a long gap,
    /// requests a full sync.
    pub fn on_connected(&self) {
        if self.needs_full_sync(Utc::now()) {
            if let Err(e) = self.request_full_sync() {
                warn!("could not request full sync: {}", e);
            }
        }
        self.spawn_flush();
    }

    /// True when `lastSyncTime` is unknown or older than the configured gap.
    pub fn needs_full_sync(&self, now: DateTime<Utc>) -> bool {
        let Some(after) = self.inner.options.full_sync_after else {
            return false;
        };
        match self.last_sync_time() {
            None => true,
            Some(last) => now
                .signed_duration_since(last)
                .to_std()
                .is_ok_and(|gap| gap > after),
        }
    }

    /// Transmits pending changes oldest-first until the list is empty, the
    /// connection fails, or the next entry touches an entity awaiting
    /// arbitration. Returns how many were acknowledged.
    ///
    /// Only one flush runs at a time; concurrent calls return 0.
    pub async fn flush_pending(&self) -> usize {
        let mut total = 0;
        loop {
            if self.inner.flushing.swap(true, Ordering::AcqRel) {
                break;
            }
            let (sent, stalled) = self.flush_once().await;
            self.inner.flushing.store(false, Ordering::Release);
            total += sent;

            // A publish may have arrived after the last pass looked
            if stalled || self.pending_count() == 0 || !self.inner.conn.is_connected() {
                break;
            }
        }

        if total > 0 {
            info!(count = total, "flushed pending changes");
            self.inner
                .notifier
                .publish(SyncNotice::PendingFlushed { count: total });
        }
        total
    }

    async fn flush_once(&self) -> (usize, bool) {
        let mut sent = 0;
        loop {
            let next = self.inner.state().pending_changes.first().cloned();
            let Some(event) = next else {
                return (sent, false);
            };
            // Later entries wait too, so send order survives arbitration
            if self.inner.is_held(&event) {
                debug!("flush held by an unresolved conflict");
                return (sent, true);
            }

            let envelope = match Envelope::event(&event) {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!("dropping unencodable pending change: {}", e);
                    let mut state = self.inner.state();
                    state.remove_pending(&event);
                    self.inner.persist(&state);
                    continue;
                }
            };

            match self.inner.conn.transmit(envelope).await {
                Ok(()) => {
                    let mut state = self.inner.state();
                    state.remove_pending(&event);
                    self.inner.persist(&state);
                    sent += 1;
                }
                Err(e) => {
                    debug!("flush stalled: {}", e);
                    return (sent, true);
                }
            }
        }
    }

    fn spawn_flush(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let coordinator = self.clone();
                handle.spawn(async move {
                    coordinator.flush_pending().await;
                });
            }
            Err(_) => debug!("no runtime, pending changes wait for the next connect"),
        }
    }

    pub fn pending_changes(&self) -> Vec<SyncEvent> {
        self.inner.state().pending_changes.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state().pending_changes.len()
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.inner.state().last_sync_time
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.inner.state().conflict_policy
    }

    pub fn set_conflict_policy(&self, policy: ConflictPolicy) {
        let mut state = self.inner.state();
        state.conflict_policy = policy;
        self.inner.persist(&state);
    }

    /// Conflicts left for arbitration under the manual policy.
    pub fn pending_conflicts(&self) -> Vec<Conflict> {
        self.inner.conflicts().clone()
    }

    /// Settles a conflict left for arbitration.
    pub fn resolve_conflict(
        &self,
        entity_type: EntityType,
        id: &str,
        arbitration: Arbitration,
    ) -> Result<()> {
        let key = EntityKey::new(entity_type, id);
        let conflict = self
            .inner
            .take_conflict(&key)
            .ok_or_else(|| Error::NoSuchConflict(key.to_string()))?;

        match &arbitration {
            Arbitration::KeepLocal => {}
            Arbitration::KeepRemote => {
                let mut state = self.inner.state();
                state.remove_pending(&conflict.local);
                self.inner.apply_remote(state, &conflict.remote);
            }
            Arbitration::Replace(payload) => {
                let operation = match conflict.local.operation {
                    Operation::Create => Operation::Create,
                    _ => Operation::Update,
                };
                let replacement = self.local_event(entity_type, operation, payload.clone());
                if let Err(e) = replacement.validate() {
                    self.inner.defer(conflict);
                    return Err(Error::InvalidEvent(e.to_string()));
                }
                {
                    let mut state = self.inner.state();
                    state.remove_pending(&conflict.local);
                    state.pending_changes.push(replacement.clone());
                    state.advance(conflict.remote.timestamp);
                    self.inner.persist(&state);
                }
                self.inner.deliver(&replacement);
            }
        }

        info!(%key, resolution = arbitration.as_str(), "conflict arbitrated");
        self.inner.resolved(&conflict, arbitration.as_str());
        if self.inner.conn.is_connected() {
            self.spawn_flush();
        }
        Ok(())
    }

    /// Drops every pending change for an entity; bulk updates lose only its
    /// items. A remote version held in an unresolved conflict is applied
    /// instead. Returns the number of entries dropped.
    pub fn discard_local(&self, entity_type: EntityType, id: &str) -> usize {
        let key = EntityKey::new(entity_type, id);
        let conflict = self.inner.take_conflict(&key);

        let mut state = self.inner.state();
        let dropped = state.discard_entity(&key);

        match &conflict {
            Some(conflict) => self.inner.apply_remote(state, &conflict.remote),
            None => {
                self.inner.persist(&state);
                drop(state);
            }
        }

        if let Some(conflict) = conflict {
            self.inner.resolved(&conflict, "discarded_local");
        }
        info!(%key, dropped, "discarded local changes");
        if self.inner.conn.is_connected() {
            self.spawn_flush();
        }
        dropped
    }

    /// Forgets all sync state (logout / data reset).
    pub fn reset(&self) {
        self.inner.conflicts().clear();
        let mut state = self.inner.state();
        let policy = state.conflict_policy;
        *state = SyncState::new(policy);
        self.inner.persist(&state);
        info!("sync state reset");
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn subscribers(&self) -> MutexGuard<'_, SubscriberMap> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn conflicts(&self) -> MutexGuard<'_, Vec<Conflict>> {
        self.conflicts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Writes state through to the store. A failure is reported and the
    /// in-memory state stays authoritative.
    fn persist(&self, state: &SyncState) {
        if let Err(e) = state.save(self.store.as_ref()) {
            error!("failed to persist sync state: {}", e);
            self.notifier.publish(SyncNotice::PersistenceFailed {
                key: SYNC_STATE_KEY.to_string(),
                error: e.to_string(),
            });
        }
    }

    /// Invokes the subscribers for the event's entity type.
    fn deliver(&self, event: &SyncEvent) {
        let callbacks: Vec<Callback> = self
            .subscribers()
            .get(&event.entity_type)
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        for callback in callbacks {
            callback(event);
        }
    }

    /// Applies a remote event. Subscribers run after the state lock is released.
    fn apply_remote(&self, mut state: MutexGuard<'_, SyncState>, event: &SyncEvent) {
        state.advance(event.timestamp);
        self.persist(&state);
        drop(state);
        self.deliver(event);
        debug!(entity = %event.entity_type, op = %event.operation, "remote change applied");
        self.notifier.publish(SyncNotice::RemoteApplied {
            entity_type: event.entity_type,
            id: event.entity_id().map(str::to_string),
        });
    }

    fn defer(&self, conflict: Conflict) {
        let mut conflicts = self.conflicts();
        conflicts.retain(|c| c.key() != conflict.key());
        conflicts.push(conflict);
    }

    /// True when `event` touches an entity awaiting arbitration.
    fn is_held(&self, event: &SyncEvent) -> bool {
        let keys = event.keys();
        self.conflicts()
            .iter()
            .filter_map(Conflict::key)
            .any(|key| keys.contains(&key))
    }

    fn take_conflict(&self, key: &EntityKey) -> Option<Conflict> {
        let mut conflicts = self.conflicts();
        let index = conflicts
            .iter()
            .position(|c| c.key().as_ref() == Some(key))?;
        Some(conflicts.remove(index))
    }

    fn resolved(&self, conflict: &Conflict, resolution: &str) {
        self.notifier.publish(SyncNotice::ConflictResolved {
            entity_type: conflict.local.entity_type,
            id: conflict.key().map(|key| key.id).unwrap_or_default(),
            resolution: resolution.to_string(),
        });
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
