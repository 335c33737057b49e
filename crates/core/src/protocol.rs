// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Wire envelopes exchanged with the sync backend.
//!
//! Every frame is a JSON envelope:
//!
//! ```json
//! {"type": "event", "payload": {...}, "timestamp": "2026-03-01T10:00:05Z", "userId": "u1"}
//! ```
//!
//! The envelope keeps `type` as a plain string so that frames of a kind this
//! build does not know still parse; [`Envelope::decode`] turns them into an
//! [`Error::UnknownMessage`] instead of a framing failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::event::SyncEvent;
use crate::snapshot::Collections;

pub const KIND_EVENT: &str = "event";
pub const KIND_FULL_SYNC_REQUEST: &str = "full_sync_request";
pub const KIND_FULL_SYNC_RESPONSE: &str = "full_sync_response";
pub const KIND_PING: &str = "ping";
pub const KIND_PONG: &str = "pong";
pub const KIND_ERROR: &str = "error";

/// A framed message as it travels over the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
}

/// The typed view of an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A mutation, in either direction.
    Event(SyncEvent),
    /// Ask the backend to resend the complete dataset.
    FullSyncRequest { since: Option<DateTime<Utc>> },
    /// The complete dataset as of `as_of`.
    FullSyncResponse {
        collections: Collections,
        as_of: DateTime<Utc>,
    },
    /// Keepalive.
    Ping { id: u64 },
    /// Keepalive reply, echoing the ping id.
    Pong { id: u64 },
    /// Backend-reported error.
    Error { message: String },
}

#[derive(Serialize, Deserialize)]
struct SincePayload {
    since: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullSyncPayload {
    collections: Collections,
    as_of: DateTime<Utc>,
}

#[derive(Deserialize)]
struct IdPayload {
    id: u64,
}

#[derive(Deserialize)]
struct ErrorPayload {
    message: String,
}

impl Message {
    /// The envelope `type` for this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Event(_) => KIND_EVENT,
            Message::FullSyncRequest { .. } => KIND_FULL_SYNC_REQUEST,
            Message::FullSyncResponse { .. } => KIND_FULL_SYNC_RESPONSE,
            Message::Ping { .. } => KIND_PING,
            Message::Pong { .. } => KIND_PONG,
            Message::Error { .. } => KIND_ERROR,
        }
    }

    fn payload(&self) -> Result<Value> {
        let payload = match self {
            Message::Event(event) => serde_json::to_value(event)?,
            Message::FullSyncRequest { since } => {
                serde_json::to_value(SincePayload { since: *since })?
            }
            Message::FullSyncResponse { collections, as_of } => {
                serde_json::to_value(FullSyncPayload {
                    collections: collections.clone(),
                    as_of: *as_of,
                })?
            }
            Message::Ping { id } | Message::Pong { id } => json!({ "id": id }),
            Message::Error { message } => json!({ "message": message }),
        };
        Ok(payload)
    }
}

impl Envelope {
    /// Frames a message stamped with the current time.
    pub fn new(message: &Message, user_id: Option<&str>) -> Result<Self> {
        Self::at(message, user_id, Utc::now())
    }

    /// Frames a message with an explicit timestamp.
    pub fn at(message: &Message, user_id: Option<&str>, timestamp: DateTime<Utc>) -> Result<Self> {
        Ok(Envelope {
            kind: message.kind().to_string(),
            payload: message.payload()?,
            timestamp,
            user_id: user_id.map(str::to_string),
        })
    }

    /// Frames an event, carrying its origin and timestamp.
    pub fn event(event: &SyncEvent) -> Result<Self> {
        Self::at(
            &Message::Event(event.clone()),
            Some(&event.origin_user_id),
            event.timestamp,
        )
    }

    pub fn ping(id: u64) -> Self {
        Self::control(KIND_PING, json!({ "id": id }))
    }

    pub fn pong(id: u64) -> Self {
        Self::control(KIND_PONG, json!({ "id": id }))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::control(KIND_ERROR, json!({ "message": message.into() }))
    }

    fn control(kind: &str, payload: Value) -> Self {
        Envelope {
            kind: kind.to_string(),
            payload,
            timestamp: Utc::now(),
            user_id: None,
        }
    }

    /// Returns true for keepalive frames.
    pub fn is_keepalive(&self) -> bool {
        self.kind == KIND_PING || self.kind == KIND_PONG
    }

    /// Decodes the payload according to the envelope type.
    pub fn decode(&self) -> Result<Message> {
        let payload = self.payload.clone();
        let message = match self.kind.as_str() {
            KIND_EVENT => Message::Event(serde_json::from_value(payload)?),
            KIND_FULL_SYNC_REQUEST => {
                let p: SincePayload = serde_json::from_value(payload)?;
                Message::FullSyncRequest { since: p.since }
            }
            KIND_FULL_SYNC_RESPONSE => {
                let p: FullSyncPayload = serde_json::from_value(payload)?;
                Message::FullSyncResponse {
                    collections: p.collections,
                    as_of: p.as_of,
                }
            }
            KIND_PING => Message::Ping {
                id: serde_json::from_value::<IdPayload>(payload)?.id,
            },
            KIND_PONG => Message::Pong {
                id: serde_json::from_value::<IdPayload>(payload)?.id,
            },
            KIND_ERROR => Message::Error {
                message: serde_json::from_value::<ErrorPayload>(payload)?.message,
            },
            other => return Err(Error::UnknownMessage(other.to_string())),
        };
        Ok(message)
    }

    /// Serializes the envelope to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserializes an envelope from JSON.
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
