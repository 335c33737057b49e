// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized entity collections and the offline snapshot.
//!
//! Apply rules for events:
//! - create: insert the entity, replacing any existing one with the same id
//! - update: shallow-merge fields into the existing entity (insert if absent)
//! - delete: remove the entity
//! - bulk_update: shallow-merge each `items[]` entry by id
//!
//! Snapshot merges are idempotent: merging the same partial dataset twice
//! leaves the snapshot as it was after the first merge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::conflict::shallow_merge;
use crate::error::{Error, Result};
use crate::event::{EntityType, Operation, SyncEvent};

/// Entities of one type, keyed by id.
pub type EntityMap = BTreeMap<String, Value>;

/// All entity collections, keyed by type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Collections(BTreeMap<EntityType, EntityMap>);

impl Collections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a single-type collection from entity objects carrying an `id`.
    pub fn from_entities(
        entity_type: EntityType,
        entities: impl IntoIterator<Item = Value>,
    ) -> Result<Self> {
        let mut collections = Collections::new();
        for entity in entities {
            collections.insert(entity_type, entity)?;
        }
        Ok(collections)
    }

    /// Inserts or replaces one entity.
    pub fn insert(&mut self, entity_type: EntityType, entity: Value) -> Result<()> {
        let id = entity
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::InvalidPayload(format!("{entity_type} entity has no id")))?
            .to_string();
        self.0.entry(entity_type).or_default().insert(id, entity);
        Ok(())
    }

    pub fn get(&self, entity_type: EntityType, id: &str) -> Option<&Value> {
        self.0.get(&entity_type).and_then(|entities| entities.get(id))
    }

    pub fn collection(&self, entity_type: EntityType) -> Option<&EntityMap> {
        self.0.get(&entity_type)
    }

    /// Total number of entities across all types.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entity counts per type, for types that have any.
    pub fn counts(&self) -> Vec<(EntityType, usize)> {
        self.0
            .iter()
            .filter(|(_, entities)| !entities.is_empty())
            .map(|(entity_type, entities)| (*entity_type, entities.len()))
            .collect()
    }

    /// Replaces every entity present in `partial`; entities absent from it are kept.
    pub fn merge(&mut self, partial: &Collections) {
        for (entity_type, entities) in &partial.0 {
            let target = self.0.entry(*entity_type).or_default();
            for (id, entity) in entities {
                target.insert(id.clone(), entity.clone());
            }
        }
    }

    /// Applies one event. Returns false if the event addressed nothing
    /// (e.g. a create without an id, or a delete of an unknown entity).
    pub fn apply(&mut self, event: &SyncEvent) -> bool {
        let entities = self.0.entry(event.entity_type).or_default();

        match event.operation {
            Operation::Create => match event.entity_id() {
                Some(id) => {
                    entities.insert(id.to_string(), event.payload.clone());
                    true
                }
                None => false,
            },
            Operation::Update => match event.entity_id() {
                Some(id) => {
                    merge_entity(entities, id, &event.payload);
                    true
                }
                None => false,
            },
            Operation::Delete => event
                .entity_id()
                .is_some_and(|id| entities.remove(id).is_some()),
            Operation::BulkUpdate => {
                let mut applied = false;
                for item in event.bulk_items() {
                    if let Some(id) = item.get("id").and_then(Value::as_str) {
                        merge_entity(entities, id, item);
                        applied = true;
                    }
                }
                applied
            }
        }
    }
}

fn merge_entity(entities: &mut EntityMap, id: &str, fields: &Value) {
    let merged = match entities.get(id) {
        Some(existing) => shallow_merge(existing, fields),
        None => fields.clone(),
    };
    entities.insert(id.to_string(), merged);
}

/// Last materialized view of all entity collections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSnapshot {
    pub collections: Collections,
    pub last_sync: Option<DateTime<Utc>>,
}

impl OfflineSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a partial dataset received as of `as_of`.
    pub fn merge(&mut self, partial: &Collections, as_of: DateTime<Utc>) {
        self.collections.merge(partial);
        self.advance(as_of);
    }

    /// Overwrites the snapshot wholesale (full sync).
    pub fn replace(&mut self, collections: Collections, as_of: DateTime<Utc>) {
        self.collections = collections;
        self.last_sync = Some(as_of);
    }

    /// Applies one event incrementally.
    pub fn apply_event(&mut self, event: &SyncEvent) -> bool {
        self.collections.apply(event)
    }

    fn advance(&mut self, as_of: DateTime<Utc>) {
        match self.last_sync {
            Some(prev) if prev >= as_of => {}
            _ => self.last_sync = Some(as_of),
        }
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
