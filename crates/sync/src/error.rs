// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use pillar_core::Conflict;
use thiserror::Error;

/// Why a live connection could not be established.
///
/// Connection failures are recovered locally: they are reported through
/// observers and notices, and sends keep queueing meanwhile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("network is offline")]
    Offline,

    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("connection rejected: {0}")]
    Rejected(String),

    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("gave up reconnecting after {attempts} attempts\n  hint: call connect() to try again")]
    RetriesExhausted { attempts: u32 },

    #[error("connection attempt cancelled")]
    Cancelled,
}

/// A frame could not be transmitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendFailure {
    #[error("not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection lost before the frame was written")]
    ConnectionLost,
}

/// All possible errors that can occur in the pillar sync library.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Send(#[from] SendFailure),

    #[error("unresolved conflict on {}\n  hint: resolve it with resolve_conflict or discard the local change", conflict_label(.0))]
    ConflictUnresolved(Box<Conflict>),

    #[error("no pending conflict for {0}")]
    NoSuchConflict(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] pillar_core::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

fn conflict_label(conflict: &Conflict) -> String {
    conflict
        .key()
        .map(|key| key.to_string())
        .unwrap_or_else(|| conflict.local.entity_type.to_string())
}

/// A specialized Result type for the pillar sync library.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
