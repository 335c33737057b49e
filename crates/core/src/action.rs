// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Queued user actions.
//!
//! A queued action records a whole user intent (`"create_task"` plus the
//! form data), not a data diff. Actions are replayed in FIFO order once
//! connectivity returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub action: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    /// Failed replay attempts so far.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub attempts: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl QueuedAction {
    pub fn new(action: impl Into<String>, data: Value, timestamp: DateTime<Utc>) -> Self {
        QueuedAction {
            action: action.into(),
            data,
            timestamp,
            attempts: 0,
        }
    }
}
