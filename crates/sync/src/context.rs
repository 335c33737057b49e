// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Wires the sync services together.
//!
//! [`SyncContext`] owns one of each service and routes the connection's
//! lifecycle and inbound traffic to them:
//!
//! - inbound events go to the coordinator, whose subscribers include the
//!   offline cache
//! - full-sync responses overwrite the cache and set `lastSyncTime`
//! - connect and disconnect drive the action queue's online signal

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pillar_core::{
    Collections, EntityType, Envelope, FileStore, KeyValueStore, Message, Operation, SyncEvent,
};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{self, Config};
use crate::connection::{ConnectionManager, ConnectionObserver};
use crate::coordinator::{CoordinatorOptions, SyncCoordinator};
use crate::error::{ConnectError, Error, Result};
use crate::notify::{Notifier, SyncNotice};
use crate::offline::{ActionQueue, EventActionHandler, OfflineCache};
use crate::transport::{websocket_factory, TransportFactory};

pub struct SyncContext {
    config: Config,
    state_dir: PathBuf,
    store: Arc<dyn KeyValueStore>,
    notifier: Notifier,
    conn: ConnectionManager,
    coordinator: SyncCoordinator,
    cache: Arc<OfflineCache>,
    actions: Arc<ActionQueue>,
}

impl SyncContext {
    /// Opens the context on the on-disk state directory with a WebSocket
    /// transport.
    pub fn open(config: Config) -> Result<Self> {
        let state_dir = config::state_dir()?;
        let store = FileStore::open(&state_dir)?;
        Ok(Self::with_parts(
            config,
            Arc::new(store),
            websocket_factory(),
            &state_dir,
        ))
    }

    /// Builds the context from explicit parts.
    pub fn with_parts(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        factory: TransportFactory,
        state_dir: &Path,
    ) -> Self {
        let notifier = Notifier::new();
        let conn_config = config
            .remote
            .as_ref()
            .map(|remote| remote.connection_config())
            .unwrap_or_default();
        let conn = ConnectionManager::new(conn_config, factory);

        let coordinator = SyncCoordinator::new(
            conn.clone(),
            Arc::clone(&store),
            notifier.clone(),
            CoordinatorOptions {
                user_id: config.user_id.clone(),
                conflict_policy: config.sync.conflict_policy,
                full_sync_after: config.full_sync_after(),
            },
        );

        let cache = Arc::new(OfflineCache::load(Arc::clone(&store), notifier.clone()));
        for entity_type in EntityType::ALL {
            let cache = Arc::clone(&cache);
            coordinator.subscribe(
                entity_type,
                Arc::new(move |event: &SyncEvent| {
                    cache.apply_event(event);
                }),
            );
        }

        let handler = Arc::new(EventActionHandler::new(coordinator.clone()));
        let actions = Arc::new(ActionQueue::open(state_dir, handler, notifier.clone()));

        conn.add_observer(Arc::new(Bridge {
            coordinator: coordinator.clone(),
            cache: Arc::clone(&cache),
            actions: Arc::clone(&actions),
            notifier: notifier.clone(),
        }));

        SyncContext {
            config,
            state_dir: state_dir.to_path_buf(),
            store,
            notifier,
            conn,
            coordinator,
            cache,
            actions,
        }
    }

    /// Goes live. In local-only mode the action queue is replayed straight
    /// into the coordinator.
    ///
    /// A failed first attempt is reported and retried in the background.
    pub async fn start(&self) {
        if !self.config.is_remote_mode() {
            info!("no remote configured, running local-only");
            self.actions.set_online(true);
            return;
        }
        match self.conn.connect().await {
            Ok(()) => debug!(state = %self.conn.state(), "connect returned"),
            Err(ConnectError::Offline) => info!("network offline, staying in queued mode"),
            Err(e) => warn!("initial connect failed: {}", e),
        }
    }

    /// Closes the connection. Pending changes and queued actions are kept.
    pub async fn shutdown(&self) {
        self.actions.set_online(false);
        self.conn.disconnect().await;
    }

    /// Records network availability. Becoming available reconnects.
    pub async fn set_network_available(&self, available: bool) {
        self.conn.set_network_available(available);
        if available {
            if self.config.is_remote_mode() && !self.conn.is_connected() {
                self.start().await;
            }
        } else {
            self.actions.set_online(false);
        }
    }

    /// Forgets sync state, the offline snapshot and queued actions.
    pub fn reset(&self) -> Result<()> {
        self.coordinator.reset();
        self.cache.clear();
        self.actions.clear()?;
        info!("local sync data reset");
        Ok(())
    }

    /// Records a local change on the coordinator.
    pub fn publish(
        &self,
        entity_type: EntityType,
        operation: Operation,
        payload: Value,
    ) -> Result<()> {
        let event = self.coordinator.local_event(entity_type, operation, payload);
        self.coordinator.publish_local_change(event)
    }

    pub fn queue_action(&self, action: &str, data: Value) -> Result<()> {
        self.actions.queue_action(action, data)
    }

    /// Waits until no local change is waiting for the backend. Returns false
    /// if some are still pending after `timeout`.
    pub async fn wait_for_flush(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.coordinator.pending_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }

    pub fn notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.notifier.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.conn
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    pub fn cache(&self) -> &OfflineCache {
        &self.cache
    }

    pub fn actions(&self) -> &ActionQueue {
        &self.actions
    }
}

/// Routes connection callbacks to the services.
struct Bridge {
    coordinator: SyncCoordinator,
    cache: Arc<OfflineCache>,
    actions: Arc<ActionQueue>,
    notifier: Notifier,
}

impl Bridge {
    fn on_full_sync(&self, collections: Collections, as_of: DateTime<Utc>) {
        let entities = collections.len();
        self.cache.replace_snapshot(collections, as_of);
        // Unacknowledged local changes stay visible on top of the server copy
        for pending in self.coordinator.pending_changes() {
            self.cache.apply_event(&pending);
        }
        self.coordinator.apply_full_sync(as_of);
        info!(entities, %as_of, "full sync applied");
        self.notifier.publish(SyncNotice::FullSyncApplied { entities });
    }
}

impl ConnectionObserver for Bridge {
    fn on_connect(&self) {
        self.notifier.publish(SyncNotice::Connected);
        self.coordinator.on_connected();
        self.actions.set_online(true);
    }

    fn on_disconnect(&self, reason: &str) {
        self.actions.set_online(false);
        self.notifier.publish(SyncNotice::Disconnected {
            reason: reason.to_string(),
        });
    }

    fn on_error(&self, error: &ConnectError) {
        self.notifier.publish(SyncNotice::ConnectionError {
            error: error.to_string(),
        });
    }

    fn on_reconnecting(&self, attempt: u32, delay: Duration) {
        self.notifier
            .publish(SyncNotice::Reconnecting { attempt, delay });
    }

    fn on_message(&self, envelope: &Envelope) {
        let message = match envelope.decode() {
            Ok(message) => message,
            Err(e) => {
                warn!(kind = %envelope.kind, "undecodable envelope: {}", e);
                self.notifier.publish(SyncNotice::ServerError {
                    message: e.to_string(),
                });
                return;
            }
        };

        match message {
            Message::Event(event) => match self.coordinator.on_remote_event(event) {
                Ok(outcome) => debug!(?outcome, "remote event handled"),
                Err(Error::ConflictUnresolved(conflict)) => {
                    info!(
                        key = %conflict.key().map(|k| k.to_string()).unwrap_or_default(),
                        "conflict awaiting arbitration"
                    );
                }
                Err(e) => {
                    warn!("rejected remote event: {}", e);
                    self.notifier.publish(SyncNotice::ServerError {
                        message: format!("rejected remote event: {e}"),
                    });
                }
            },
            Message::FullSyncResponse { collections, as_of } => {
                self.on_full_sync(collections, as_of);
            }
            Message::Error { message } => {
                warn!("server error: {}", message);
                self.notifier.publish(SyncNotice::ServerError { message });
            }
            Message::FullSyncRequest { .. } | Message::Ping { .. } | Message::Pong { .. } => {
                debug!(kind = %envelope.kind, "ignoring unexpected message");
            }
        }
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
