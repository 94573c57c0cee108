//! Storage trait definitions

use crate::graph::{
    Entity, EntityId, EntityType, NewEntity, NewRelationship, RelationType, Relationship,
};
use crate::query::PathQuery;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    /// A row could not be read back after being written
    #[error("Storage integrity fault: {0}")]
    Integrity(String),

    #[error("Refusing to store self-loop on entity {0}")]
    SelfLoop(EntityId),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Aggregate counts over the whole graph
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub entity_counts: BTreeMap<EntityType, usize>,
    pub relation_counts: BTreeMap<RelationType, usize>,
    pub total_entities: usize,
    pub total_relationships: usize,
    /// `graph_meta.last_indexed`, empty when never set
    pub last_indexed: String,
}

/// `graph_meta` key recording the last completed ingestion
pub const META_LAST_INDEXED: &str = "last_indexed";

/// Upper bound for `search_entities` limits
pub const MAX_SEARCH_LIMIT: usize = 1000;

/// Trait for graph storage backends
///
/// Implementations must be thread-safe (Send + Sync). Writes rely on the
/// backend's own single-writer discipline; only the bulk operations are
/// transactional.
pub trait GraphStore: Send + Sync {
    // === Entity Operations ===

    /// Insert or update an entity keyed by `(type, canonical_id)`.
    ///
    /// On conflict the mutable fields are replaced wholesale, never merged.
    fn upsert_entity(&self, entity: &NewEntity) -> StorageResult<Entity>;

    /// Look up an entity by canonical ID.
    ///
    /// When `entity_type` is `None` it is inferred from the ID prefix; an
    /// unrecognized prefix falls back to an untyped lookup.
    fn get_entity(
        &self,
        canonical_id: &str,
        entity_type: Option<EntityType>,
    ) -> StorageResult<Option<Entity>>;

    fn get_entity_by_id(&self, id: EntityId) -> StorageResult<Option<Entity>>;

    /// All entities, optionally of one type, ordered by ID
    fn list_entities(&self, entity_type: Option<EntityType>) -> StorageResult<Vec<Entity>>;

    /// Entities extracted from the given source file
    fn entities_by_source(&self, source_path: &str) -> StorageResult<Vec<Entity>>;

    /// Delete an entity and every relationship touching it
    fn delete_entity(&self, id: EntityId) -> StorageResult<bool>;

    /// Delete all entities rooted at a source file, returning how many were removed
    fn delete_entities_by_source(&self, source_path: &str) -> StorageResult<usize>;

    /// Upsert many entities in one all-or-nothing transaction.
    ///
    /// Returns the number of rows actually inserted or changed.
    fn bulk_upsert_entities(&self, entities: &[NewEntity]) -> StorageResult<usize>;

    // === Relationship Operations ===

    /// Insert or update a relationship keyed by `(source_id, target_id, relation_type)`
    fn upsert_relationship(&self, relationship: &NewRelationship) -> StorageResult<Relationship>;

    /// Upsert many relationships in one transaction. Self-loops are skipped.
    fn bulk_upsert_relationships(&self, relationships: &[NewRelationship]) -> StorageResult<usize>;

    /// Make `relationships` the complete outgoing edge set of every entity
    /// in `owners`, in one transaction.
    ///
    /// Edges leaving an owner that are not in `relationships` are deleted and
    /// the rest are upserted. Edges leaving other entities are upserted
    /// without touching their siblings. Returns `(changed, removed)`.
    fn sync_relationships(
        &self,
        owners: &[EntityId],
        relationships: &[NewRelationship],
    ) -> StorageResult<(usize, usize)>;

    fn list_relationships(
        &self,
        relation_type: Option<RelationType>,
    ) -> StorageResult<Vec<Relationship>>;

    /// Targets of outgoing edges, optionally filtered by relation type
    fn get_neighbors(
        &self,
        entity_id: EntityId,
        relation_type: Option<RelationType>,
    ) -> StorageResult<Vec<Entity>>;

    // === Search & Stats ===

    /// Ranked full-text search. Query syntax errors yield an empty result.
    fn search_entities(&self, query: &str, limit: usize) -> StorageResult<Vec<Entity>>;

    fn stats(&self) -> StorageResult<GraphStats>;

    fn get_meta(&self, key: &str) -> StorageResult<Option<String>>;

    fn set_meta(&self, key: &str, value: &str) -> StorageResult<()>;

    // === Traversal ===

    /// Enumerate simple paths from `from` to `to`.
    ///
    /// See [`PathQuery`] for the bounds and the meaning of `None`.
    fn get_path(
        &self,
        from: EntityId,
        to: EntityId,
        max_depth: usize,
        max_paths: usize,
    ) -> StorageResult<Option<Vec<Vec<Entity>>>> {
        PathQuery::between(from, to)
            .max_depth(max_depth)
            .max_paths(max_paths)
            .execute(self)
    }
}

/// Extension trait for opening stores from paths
pub trait OpenStore: GraphStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
