//! Entity representation in the knowledge graph

use super::canonical::{CanonicalRef, EntityType};
use super::STATUS_WIP;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Storage-assigned row ID. Not stable across a full rebuild.
pub type EntityId = i64;

/// Open, string-keyed metadata attached to entities and relationships
pub type Metadata = serde_json::Map<String, Value>;

/// Entity data to be written to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntity {
    /// Canonical identity (type + value)
    pub reference: CanonicalRef,
    /// Display name
    pub name: String,
    /// File the entity was extracted from
    pub source_path: Option<String>,
    /// SHA-256 of the source content, supplied by the caller
    pub content_hash: Option<String>,
    pub metadata: Metadata,
}

impl NewEntity {
    pub fn new(reference: CanonicalRef, name: impl Into<String>) -> Self {
        Self {
            reference,
            name: name.into(),
            source_path: None,
            content_hash: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_source(mut self, source_path: impl Into<String>) -> Self {
        self.source_path = Some(source_path.into());
        self
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn entity_type(&self) -> EntityType {
        self.reference.entity_type
    }

    pub fn canonical_id(&self) -> String {
        self.reference.to_string()
    }
}

/// A stored entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub entity_type: EntityType,
    /// `type:value` string, unique per type
    pub canonical_id: String,
    pub name: String,
    pub source_path: Option<String>,
    pub content_hash: Option<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// The `status` metadata value, if it is a string
    pub fn status(&self) -> Option<&str> {
        self.metadata.get("status").and_then(Value::as_str)
    }

    pub fn is_wip(&self) -> bool {
        self.status() == Some(STATUS_WIP)
    }
}
