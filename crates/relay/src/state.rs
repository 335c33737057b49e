// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Relay state management.
//!
//! Wraps the canonical dataset and the event log for shared access.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::info;

use pillar_core::{jsonl, Collections, Envelope, EventClock, Result, SyncEvent};

/// Event log filename within the data directory.
pub const EVENTS_FILE_NAME: &str = "events.jsonl";

/// Broadcasts buffered per client before it starts lagging.
pub const BROADCAST_CAPACITY: usize = 1024;

/// Identifies one client connection.
pub type ClientId = u64;

/// An envelope fanned out to every client except `from`.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub from: ClientId,
    pub envelope: Envelope,
}

/// Shared relay state containing the canonical dataset and event log.
#[derive(Clone)]
pub struct RelayState {
    inner: Arc<RelayStateInner>,
}

struct RelayStateInner {
    /// Dataset plus the number of events logged (protected together).
    data: Mutex<Dataset>,
    log_path: PathBuf,
    clock: EventClock,
    broadcast_tx: broadcast::Sender<Broadcast>,
    next_client: AtomicU64,
}

struct Dataset {
    collections: Collections,
    events: usize,
}

impl RelayState {
    /// Opens the relay state in `data_dir`, replaying `events.jsonl`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        Self::with_capacity(data_dir, BROADCAST_CAPACITY)
    }

    /// Like [`RelayState::open`] with a custom broadcast buffer size.
    pub fn with_capacity(data_dir: &Path, capacity: usize) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let log_path = data_dir.join(EVENTS_FILE_NAME);
        let events: Vec<SyncEvent> = jsonl::read_all(&log_path)?;

        let clock = EventClock::new();
        let mut collections = Collections::new();
        for event in &events {
            collections.apply(event);
            clock.observe(event.timestamp);
        }
        info!(
            events = events.len(),
            entities = collections.len(),
            "replayed event log"
        );

        let (broadcast_tx, _) = broadcast::channel(capacity);
        Ok(RelayState {
            inner: Arc::new(RelayStateInner {
                data: Mutex::new(Dataset {
                    collections,
                    events: events.len(),
                }),
                log_path,
                clock,
                broadcast_tx,
                next_client: AtomicU64::new(1),
            }),
        })
    }

    pub fn next_client_id(&self) -> ClientId {
        self.inner.next_client.fetch_add(1, Ordering::Relaxed)
    }

    /// Validates, logs and applies an event, then broadcasts it to every
    /// client other than `from`.
    pub async fn apply_event(&self, from: ClientId, event: SyncEvent) -> Result<()> {
        event.validate()?;
        let envelope = Envelope::event(&event)?;

        {
            let mut data = self.inner.data.lock().await;
            jsonl::append(&self.inner.log_path, &event)?;
            data.collections.apply(&event);
            data.events += 1;
        }
        self.inner.clock.observe(event.timestamp);

        let _ = self.inner.broadcast_tx.send(Broadcast { from, envelope });
        Ok(())
    }

    /// The complete dataset and the time it is current as of.
    pub async fn snapshot(&self) -> (Collections, DateTime<Utc>) {
        let data = self.inner.data.lock().await;
        (data.collections.clone(), self.inner.clock.now())
    }

    /// Number of events accepted since the log was created.
    pub async fn event_count(&self) -> usize {
        self.inner.data.lock().await.events
    }

    /// Subscribe to broadcast messages.
    pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.inner.broadcast_tx.subscribe()
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
