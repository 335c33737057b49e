// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! pillar-relay: reference WebSocket backend for pillar sync clients.
//!
//! The relay keeps the canonical dataset, appends every accepted event to
//! `events.jsonl`, and rebroadcasts events to every other connected client.

pub mod server;
pub mod state;


pub use server::{run, serve};
pub use state::RelayState;
