// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Durable FIFO queue of user actions performed while offline.
//!
//! Actions are appended to `actions.jsonl` (fsynced per append) and replayed
//! oldest-first through an [`ActionHandler`]. A drain stops at the first
//! failing action, which keeps its position at the head of the queue.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use pillar_core::{jsonl, EntityType, Operation, QueuedAction};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::coordinator::SyncCoordinator;
use crate::error::{Error, Result};
use crate::notify::{Notifier, SyncNotice};

pub const ACTIONS_FILE_NAME: &str = "actions.jsonl";

/// Turns a queued action into real work.
pub trait ActionHandler: Send + Sync {
    fn handle(&self, action: &QueuedAction) -> Result<()>;
}

/// Replays actions named `<operation>_<entity>` (for example `create_task`
/// or `bulk_update_project`) as local changes on the coordinator.
pub struct EventActionHandler {
    coordinator: SyncCoordinator,
}

impl EventActionHandler {
    pub fn new(coordinator: SyncCoordinator) -> Self {
        EventActionHandler { coordinator }
    }
}

/// Splits an action name into its operation and entity type.
pub(crate) fn parse_action(name: &str) -> Result<(Operation, EntityType)> {
    const PREFIXES: [(&str, Operation); 4] = [
        ("bulk_update_", Operation::BulkUpdate),
        ("create_", Operation::Create),
        ("update_", Operation::Update),
        ("delete_", Operation::Delete),
    ];
    for (prefix, operation) in PREFIXES {
        if let Some(entity) = name.strip_prefix(prefix) {
            let entity_type = EntityType::from_str(entity)
                .map_err(|e| Error::InvalidEvent(format!("action '{name}': {e}")))?;
            return Ok((operation, entity_type));
        }
    }
    Err(Error::InvalidEvent(format!(
        "unknown action '{name}': expected <operation>_<entity>"
    )))
}

impl ActionHandler for EventActionHandler {
    fn handle(&self, action: &QueuedAction) -> Result<()> {
        let (operation, entity_type) = parse_action(&action.action)?;
        let event = self
            .coordinator
            .local_event(entity_type, operation, action.data.clone());
        self.coordinator.publish_local_change(event)
    }
}

/// Outcome of one [`ActionQueue::drain_queue`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub processed: usize,
    pub remaining: usize,
    /// Error of the action that stopped the drain, if any.
    pub failed: Option<String>,
}

pub struct ActionQueue {
    path: PathBuf,
    handler: Arc<dyn ActionHandler>,
    notifier: Notifier,
    online: AtomicBool,
    draining: AtomicBool,
    drain_requested: AtomicBool,
    file: Mutex<()>,
}

impl ActionQueue {
    /// Opens the queue stored as `actions.jsonl` in `dir`.
    pub fn open(dir: &Path, handler: Arc<dyn ActionHandler>, notifier: Notifier) -> Self {
        Self::new(dir.join(ACTIONS_FILE_NAME), handler, notifier)
    }

    pub fn new(path: PathBuf, handler: Arc<dyn ActionHandler>, notifier: Notifier) -> Self {
        ActionQueue {
            path,
            handler,
            notifier,
            online: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            drain_requested: AtomicBool::new(false),
            file: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably appends an action, then drains right away when online.
    ///
    /// Returns once the append is on disk. Drain failures are reported
    /// through notices, not returned.
    pub fn queue_action(&self, action: impl Into<String>, data: Value) -> Result<()> {
        let record = QueuedAction::new(action, data, Utc::now());
        {
            let _file = self.lock();
            jsonl::append(&self.path, &record).map_err(|e| {
                error!("failed to queue action {}: {}", record.action, e);
                self.persistence_failed(&e);
                Error::Persistence(e.to_string())
            })?;
        }
        debug!(action = %record.action, "action queued");

        if self.is_online() {
            if let Err(e) = self.drain_queue() {
                warn!("drain after queue_action failed: {}", e);
            }
        }
        Ok(())
    }

    /// Replays queued actions in FIFO order until the queue is empty or an
    /// action fails. The failing action stays first with `attempts + 1`.
    ///
    /// While a drain is running, further calls return at once and the
    /// running drain makes another pass to pick up their actions.
    pub fn drain_queue(&self) -> Result<DrainReport> {
        self.drain_requested.store(true, Ordering::Release);
        if self.draining.swap(true, Ordering::AcqRel) {
            debug!("drain already running");
            return Ok(DrainReport {
                remaining: self.len()?,
                ..DrainReport::default()
            });
        }

        let mut report = DrainReport::default();
        loop {
            self.drain_requested.store(false, Ordering::Release);
            let pass = self.drain_once();
            self.draining.store(false, Ordering::Release);
            let pass = pass?;

            report.processed += pass.processed;
            report.remaining = pass.remaining;
            report.failed = pass.failed;

            if report.failed.is_some() || !self.drain_requested.load(Ordering::Acquire) {
                break;
            }
            // Someone else took over; they will see the appended actions
            if self.draining.swap(true, Ordering::AcqRel) {
                break;
            }
        }

        if report.processed > 0 || report.failed.is_some() {
            info!(
                processed = report.processed,
                remaining = report.remaining,
                "action queue drained"
            );
            self.notifier.publish(SyncNotice::ActionsDrained {
                processed: report.processed,
                remaining: report.remaining,
            });
        }
        Ok(report)
    }

    fn drain_once(&self) -> Result<DrainReport> {
        let queued = self.pending()?;
        let mut processed = 0;
        let mut failed = None;

        for action in &queued {
            match self.handler.handle(action) {
                Ok(()) => processed += 1,
                Err(e) => {
                    warn!(
                        action = %action.action,
                        attempts = action.attempts + 1,
                        "action failed: {}",
                        e
                    );
                    self.notifier.publish(SyncNotice::ActionFailed {
                        action: action.action.clone(),
                        error: e.to_string(),
                    });
                    failed = Some(e.to_string());
                    break;
                }
            }
        }

        if processed == 0 && failed.is_none() {
            return Ok(DrainReport {
                remaining: queued.len(),
                ..DrainReport::default()
            });
        }

        // Actions appended while the handler ran sit after the drained prefix
        let _file = self.lock();
        let mut current: Vec<QueuedAction> =
            jsonl::read_all(&self.path).map_err(|e| Error::Persistence(e.to_string()))?;
        current.drain(..processed.min(current.len()));
        if failed.is_some() {
            if let Some(head) = current.first_mut() {
                head.attempts += 1;
            }
        }
        jsonl::write_all(&self.path, &current).map_err(|e| {
            error!("failed to rewrite action queue: {}", e);
            self.persistence_failed(&e);
            Error::Persistence(e.to_string())
        })?;

        Ok(DrainReport {
            processed,
            remaining: current.len(),
            failed,
        })
    }

    /// Feeds the online/offline signal. Going online drains once.
    pub fn set_online(&self, online: bool) {
        let was_online = self.online.swap(online, Ordering::AcqRel);
        if online && !was_online {
            debug!("action queue online");
            if let Err(e) = self.drain_queue() {
                warn!("drain on reconnect failed: {}", e);
            }
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Queued actions, oldest first.
    pub fn pending(&self) -> Result<Vec<QueuedAction>> {
        let _file = self.lock();
        jsonl::read_all(&self.path).map_err(|e| Error::Persistence(e.to_string()))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.pending()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Empties the queue.
    pub fn clear(&self) -> Result<()> {
        let _file = self.lock();
        jsonl::write_all::<QueuedAction>(&self.path, &[]).map_err(|e| {
            self.persistence_failed(&e);
            Error::Persistence(e.to_string())
        })
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.file.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persistence_failed(&self, e: &pillar_core::Error) {
        self.notifier.publish(SyncNotice::PersistenceFailed {
            key: ACTIONS_FILE_NAME.to_string(),
            error: e.to_string(),
        });
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
