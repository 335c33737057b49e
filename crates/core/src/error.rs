// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for pillar-core operations.

use thiserror::Error;

/// All possible errors that can occur in pillar-core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid entity type: '{0}'\n  hint: valid types are: pillar, area, project, task, journal, analytics")]
    InvalidEntityType(String),

    #[error("invalid operation: '{0}'\n  hint: valid operations are: create, update, delete, bulk_update")]
    InvalidOperation(String),

    #[error("invalid conflict policy: '{0}'\n  hint: valid policies are: latest_wins, merge, manual")]
    InvalidPolicy(String),

    #[error("{entity_type} {operation} event is missing a payload id")]
    MissingEntityId {
        entity_type: String,
        operation: String,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unknown message type: '{0}'")]
    UnknownMessage(String),

    #[error("corrupted data: {0}")]
    CorruptedData(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for pillar-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
