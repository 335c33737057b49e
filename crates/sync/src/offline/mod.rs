// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Offline support: the last known dataset and the durable action queue.
//!
//! Both are driven by the online/offline signal, never by the connection
//! manager. The queue reaches the coordinator only through
//! [`EventActionHandler`], its default [`ActionHandler`].

mod cache;
mod queue;

pub use cache::{OfflineCache, SNAPSHOT_KEY};
pub use queue::{ActionHandler, ActionQueue, DrainReport, EventActionHandler, ACTIONS_FILE_NAME};
