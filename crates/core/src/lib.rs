// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! pillar-core: Shared library for the pillar sync core
//!
//! This crate provides the data model, wire envelope, conflict policies and
//! storage primitives used by both the pillar client and the relay server.

pub mod action;
pub mod clock;
pub mod conflict;
pub mod error;
pub mod event;
pub mod jsonl;
pub mod protocol;
pub mod snapshot;
pub mod store;

pub use action::QueuedAction;
pub use clock::{ClockSource, EventClock, SystemClock};
pub use conflict::{Conflict, ConflictPolicy, Resolution};
pub use error::{Error, Result};
pub use event::{EntityKey, EntityType, Operation, Source, SyncEvent};
pub use protocol::{Envelope, Message};
pub use snapshot::{Collections, EntityMap, OfflineSnapshot};
pub use store::{FileStore, KeyValueStore, MemoryStore};
