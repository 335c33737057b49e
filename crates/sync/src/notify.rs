// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Sync notices for UI and observability consumers.
//!
//! Every recovered failure and every notable state change is published here
//! as a typed [`SyncNotice`] in addition to being logged.

use std::time::Duration;

use pillar_core::{Conflict, EntityType};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncNotice {
    Connected,
    Disconnected {
        reason: String,
    },
    ConnectionError {
        error: String,
    },
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    PendingFlushed {
        count: usize,
    },
    RemoteApplied {
        entity_type: EntityType,
        id: Option<String>,
    },
    ConflictDetected {
        conflict: Box<Conflict>,
    },
    ConflictResolved {
        entity_type: EntityType,
        id: String,
        resolution: String,
    },
    FullSyncRequested,
    FullSyncApplied {
        entities: usize,
    },
    ActionsDrained {
        processed: usize,
        remaining: usize,
    },
    ActionFailed {
        action: String,
        error: String,
    },
    PersistenceFailed {
        key: String,
        error: String,
    },
    ServerError {
        message: String,
    },
}

impl std::fmt::Display for SyncNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncNotice::Connected => write!(f, "connected"),
            SyncNotice::Disconnected { reason } => write!(f, "disconnected: {reason}"),
            SyncNotice::ConnectionError { error } => write!(f, "connection error: {error}"),
            SyncNotice::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting (attempt {attempt}) in {delay:?}")
            }
            SyncNotice::PendingFlushed { count } => write!(f, "flushed {count} pending change(s)"),
            SyncNotice::RemoteApplied { entity_type, id } => match id {
                Some(id) => write!(f, "applied remote {entity_type}:{id}"),
                None => write!(f, "applied remote {entity_type} batch"),
            },
            SyncNotice::ConflictDetected { conflict } => match conflict.key() {
                Some(key) => write!(f, "conflict on {key}"),
                None => write!(f, "conflict on {}", conflict.local.entity_type),
            },
            SyncNotice::ConflictResolved {
                entity_type,
                id,
                resolution,
            } => write!(f, "conflict on {entity_type}:{id} resolved: {resolution}"),
            SyncNotice::FullSyncRequested => write!(f, "full sync requested"),
            SyncNotice::FullSyncApplied { entities } => {
                write!(f, "full sync applied ({entities} entities)")
            }
            SyncNotice::ActionsDrained {
                processed,
                remaining,
            } => write!(f, "replayed {processed} action(s), {remaining} remaining"),
            SyncNotice::ActionFailed { action, error } => {
                write!(f, "action {action} failed: {error}")
            }
            SyncNotice::PersistenceFailed { key, error } => {
                write!(f, "could not persist {key}: {error}")
            }
            SyncNotice::ServerError { message } => write!(f, "server error: {message}"),
        }
    }
}

/// Publishing half of the notice channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<SyncNotice>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Notifier { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotice> {
        self.tx.subscribe()
    }

    /// Publishes a notice. Having no listeners is fine.
    pub fn publish(&self, notice: SyncNotice) {
        let _ = self.tx.send(notice);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
