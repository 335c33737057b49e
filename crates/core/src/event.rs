// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Sync events: the unit of synchronization.
//!
//! A [`SyncEvent`] describes one mutation of one synchronized domain. Events
//! for the same [`EntityKey`] are totally ordered by timestamp, with ties
//! broken in favour of the local origin (see [`SyncEvent::conflict_order`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// The synchronized domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Pillar,
    Area,
    Project,
    Task,
    Journal,
    Analytics,
}

impl EntityType {
    /// Every entity type, in hierarchy order.
    pub const ALL: [EntityType; 6] = [
        EntityType::Pillar,
        EntityType::Area,
        EntityType::Project,
        EntityType::Task,
        EntityType::Journal,
        EntityType::Analytics,
    ];

    /// Returns the string representation used on the wire and in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Pillar => "pillar",
            EntityType::Area => "area",
            EntityType::Project => "project",
            EntityType::Task => "task",
            EntityType::Journal => "journal",
            EntityType::Analytics => "analytics",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pillar" | "pillars" => Ok(EntityType::Pillar),
            "area" | "areas" => Ok(EntityType::Area),
            "project" | "projects" => Ok(EntityType::Project),
            "task" | "tasks" => Ok(EntityType::Task),
            "journal" | "journals" => Ok(EntityType::Journal),
            "analytics" => Ok(EntityType::Analytics),
            _ => Err(Error::InvalidEntityType(s.to_string())),
        }
    }
}

/// Kind of mutation carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    /// Field updates for several entities of one type, in `payload.items`.
    BulkUpdate,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::BulkUpdate => "bulk_update",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            "bulk_update" => Ok(Operation::BulkUpdate),
            _ => Err(Error::InvalidOperation(s.to_string())),
        }
    }
}

/// Where an event originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Produced by this client.
    Local,
    /// Received from the backend.
    Remote,
    /// Produced by the AI insight generator.
    Derived,
}

/// Identifies one entity across event streams.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub id: String,
}

impl EntityKey {
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        EntityKey {
            entity_type,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

/// One mutation of one entity (or a batch, for `bulk_update`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub entity_type: EntityType,
    pub operation: Operation,
    /// Entity-shaped data. Carries a stable `id` for non-create operations.
    pub payload: Value,
    pub origin_user_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: Source,
}

impl SyncEvent {
    /// Creates a local event.
    pub fn new(
        entity_type: EntityType,
        operation: Operation,
        payload: Value,
        origin_user_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        SyncEvent {
            entity_type,
            operation,
            payload,
            origin_user_id: origin_user_id.into(),
            timestamp,
            source: Source::Local,
        }
    }

    /// Returns the event with its source replaced.
    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    pub fn is_local(&self) -> bool {
        self.source == Source::Local
    }

    /// The payload `id`, if present and a string.
    pub fn entity_id(&self) -> Option<&str> {
        self.payload.get("id").and_then(Value::as_str)
    }

    /// The entity this event addresses. `None` for id-less creates and bulk updates.
    pub fn key(&self) -> Option<EntityKey> {
        if self.operation == Operation::BulkUpdate {
            return None;
        }
        self.entity_id()
            .map(|id| EntityKey::new(self.entity_type, id))
    }

    /// Every entity this event addresses: one key per item for a bulk
    /// update, otherwise [`SyncEvent::key`].
    pub fn keys(&self) -> Vec<EntityKey> {
        if self.operation != Operation::BulkUpdate {
            return self.key().into_iter().collect();
        }
        self.bulk_items()
            .iter()
            .filter_map(|item| item.get("id").and_then(Value::as_str))
            .map(|id| EntityKey::new(self.entity_type, id))
            .collect()
    }

    /// The payload as a JSON object, if it is one.
    pub fn fields(&self) -> Option<&Map<String, Value>> {
        self.payload.as_object()
    }

    /// The per-entity items of a `bulk_update` payload.
    pub fn bulk_items(&self) -> &[Value] {
        self.payload
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Checks the payload shape required by the operation.
    pub fn validate(&self) -> Result<()> {
        if !self.payload.is_object() {
            return Err(Error::InvalidPayload(format!(
                "{} {} payload must be an object",
                self.entity_type, self.operation
            )));
        }

        match self.operation {
            Operation::Create => Ok(()),
            Operation::Update | Operation::Delete => match self.entity_id() {
                Some(id) if !id.is_empty() => Ok(()),
                _ => Err(self.missing_id()),
            },
            Operation::BulkUpdate => {
                if self.payload.get("items").and_then(Value::as_array).is_none() {
                    return Err(Error::InvalidPayload(format!(
                        "{} bulk_update payload needs an items array",
                        self.entity_type
                    )));
                }
                let all_have_ids = self.bulk_items().iter().all(|item| {
                    item.get("id")
                        .and_then(Value::as_str)
                        .is_some_and(|id| !id.is_empty())
                });
                if all_have_ids {
                    Ok(())
                } else {
                    Err(self.missing_id())
                }
            }
        }
    }

    /// Ordering used for conflict comparison: by timestamp, ties go to the local origin.
    pub fn conflict_order(&self, other: &SyncEvent) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.is_local().cmp(&other.is_local()))
    }

    fn missing_id(&self) -> Error {
        Error::MissingEntityId {
            entity_type: self.entity_type.to_string(),
            operation: self.operation.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
