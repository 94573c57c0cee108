//! SQLite storage backend

use super::traits::{
    GraphStats, GraphStore, OpenStore, StorageError, StorageResult, MAX_SEARCH_LIMIT,
    META_LAST_INDEXED,
};
use crate::graph::{
    CanonicalRef, Entity, EntityId, EntityType, Metadata, NewEntity, NewRelationship,
    RelationType, Relationship,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

const ENTITY_COLUMNS: &str = "e.id, e.type, e.canonical_id, e.name, e.source_path, e.content_hash,
     e.metadata, e.created_at, e.updated_at";

const RELATIONSHIP_COLUMNS: &str =
    "id, source_id, target_id, relation_type, confidence, metadata, created_at";

/// Raw entity columns as read from SQLite
struct EntityRow {
    id: i64,
    entity_type: String,
    canonical_id: String,
    name: String,
    source_path: Option<String>,
    content_hash: Option<String>,
    metadata: String,
    created_at: String,
    updated_at: String,
}

/// Raw relationship columns as read from SQLite
struct RelationshipRow {
    id: i64,
    source_id: i64,
    target_id: i64,
    relation_type: String,
    confidence: f64,
    metadata: String,
    created_at: String,
}

/// SQLite-backed graph store
///
/// Uses a single database file holding `entities`, `relationships`, the
/// `entities_fts` search index and the `graph_meta` key-value table.
/// Thread-safe via internal mutex on the connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                type TEXT NOT NULL,
                canonical_id TEXT NOT NULL,
                name TEXT NOT NULL,
                source_path TEXT,
                content_hash TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (type, canonical_id)
            );

            CREATE INDEX IF NOT EXISTS idx_entities_canonical
                ON entities(canonical_id);
            CREATE INDEX IF NOT EXISTS idx_entities_source
                ON entities(source_path);

            CREATE TABLE IF NOT EXISTS relationships (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
                target_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
                relation_type TEXT NOT NULL,
                confidence REAL NOT NULL DEFAULT 1.0,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                UNIQUE (source_id, target_id, relation_type),
                CHECK (source_id <> target_id)
            );

            CREATE INDEX IF NOT EXISTS idx_relationships_target
                ON relationships(target_id);
            CREATE INDEX IF NOT EXISTS idx_relationships_type
                ON relationships(relation_type);

            -- Full-text index over entity name, canonical ID and metadata text
            CREATE VIRTUAL TABLE IF NOT EXISTS entities_fts USING fts5(
                name,
                canonical_id,
                metadata,
                content='entities',
                content_rowid='id'
            );

            CREATE TRIGGER IF NOT EXISTS entities_fts_ai AFTER INSERT ON entities BEGIN
                INSERT INTO entities_fts(rowid, name, canonical_id, metadata)
                VALUES (new.id, new.name, new.canonical_id, new.metadata);
            END;

            CREATE TRIGGER IF NOT EXISTS entities_fts_ad AFTER DELETE ON entities BEGIN
                INSERT INTO entities_fts(entities_fts, rowid, name, canonical_id, metadata)
                VALUES ('delete', old.id, old.name, old.canonical_id, old.metadata);
            END;

            CREATE TRIGGER IF NOT EXISTS entities_fts_au AFTER UPDATE ON entities BEGIN
                INSERT INTO entities_fts(entities_fts, rowid, name, canonical_id, metadata)
                VALUES ('delete', old.id, old.name, old.canonical_id, old.metadata);
                INSERT INTO entities_fts(rowid, name, canonical_id, metadata)
                VALUES (new.id, new.name, new.canonical_id, new.metadata);
            END;

            CREATE TABLE IF NOT EXISTS graph_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            "#,
        )?;

        Ok(())
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn now() -> String {
        Utc::now().to_rfc3339()
    }

    fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StorageError::DateParse(format!("{}: {}", raw, e)))
    }

    /// Decode a metadata column; a corrupt value degrades to an empty map
    fn decode_metadata(raw: &str, owner: &str) -> Metadata {
        match serde_json::from_str(raw) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(owner, error = %e, "unreadable metadata column, using empty map");
                Metadata::new()
            }
        }
    }

    fn read_entity_row(row: &Row<'_>) -> rusqlite::Result<EntityRow> {
        Ok(EntityRow {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            canonical_id: row.get(2)?,
            name: row.get(3)?,
            source_path: row.get(4)?,
            content_hash: row.get(5)?,
            metadata: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn row_to_entity(row: EntityRow) -> StorageResult<Entity> {
        let entity_type: EntityType = row.entity_type.parse().map_err(|e| {
            StorageError::Integrity(format!("entity {} has {}", row.id, e))
        })?;
        let metadata = Self::decode_metadata(&row.metadata, &row.canonical_id);

        Ok(Entity {
            id: row.id,
            entity_type,
            canonical_id: row.canonical_id,
            name: row.name,
            source_path: row.source_path,
            content_hash: row.content_hash,
            metadata,
            created_at: Self::parse_timestamp(&row.created_at)?,
            updated_at: Self::parse_timestamp(&row.updated_at)?,
        })
    }

    fn read_relationship_row(row: &Row<'_>) -> rusqlite::Result<RelationshipRow> {
        Ok(RelationshipRow {
            id: row.get(0)?,
            source_id: row.get(1)?,
            target_id: row.get(2)?,
            relation_type: row.get(3)?,
            confidence: row.get(4)?,
            metadata: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn row_to_relationship(row: RelationshipRow) -> StorageResult<Relationship> {
        let relation_type: RelationType = row.relation_type.parse().map_err(|e| {
            StorageError::Integrity(format!("relationship {} has {}", row.id, e))
        })?;
        let owner = format!("relationship {}", row.id);

        Ok(Relationship {
            id: row.id,
            source_id: row.source_id,
            target_id: row.target_id,
            relation_type,
            confidence: row.confidence,
            metadata: Self::decode_metadata(&row.metadata, &owner),
            created_at: Self::parse_timestamp(&row.created_at)?,
        })
    }

    fn query_entities(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> StorageResult<Vec<Entity>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, Self::read_entity_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::row_to_entity).collect()
    }

    fn find_entity(
        conn: &Connection,
        canonical_id: &str,
        entity_type: Option<EntityType>,
    ) -> StorageResult<Option<Entity>> {
        // Lowest ID wins should duplicates ever exist
        let row = match entity_type {
            Some(t) => conn
                .query_row(
                    &format!(
                        "SELECT {} FROM entities e WHERE e.type = ?1 AND e.canonical_id = ?2
                         ORDER BY e.id LIMIT 1",
                        ENTITY_COLUMNS
                    ),
                    params![t.as_str(), canonical_id],
                    Self::read_entity_row,
                )
                .optional()?,
            None => conn
                .query_row(
                    &format!(
                        "SELECT {} FROM entities e WHERE e.canonical_id = ?1
                         ORDER BY e.id LIMIT 1",
                        ENTITY_COLUMNS
                    ),
                    params![canonical_id],
                    Self::read_entity_row,
                )
                .optional()?,
        };

        row.map(Self::row_to_entity).transpose()
    }

    /// Upsert one entity row, returning the number of changed rows and the stored entity.
    ///
    /// An identical re-upsert changes nothing, including `updated_at`.
    fn upsert_entity_row(
        conn: &Connection,
        entity: &NewEntity,
        now: &str,
    ) -> StorageResult<(usize, Entity)> {
        let entity_type = entity.entity_type();
        let canonical_id = entity.canonical_id();
        let metadata = serde_json::to_string(&entity.metadata)?;

        let changed = conn.execute(
            r#"
            INSERT INTO entities (type, canonical_id, name, source_path, content_hash, metadata,
                                  created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ON CONFLICT(type, canonical_id) DO UPDATE SET
                name = excluded.name,
                source_path = excluded.source_path,
                content_hash = excluded.content_hash,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            WHERE entities.name IS NOT excluded.name
               OR entities.source_path IS NOT excluded.source_path
               OR entities.content_hash IS NOT excluded.content_hash
               OR entities.metadata IS NOT excluded.metadata
            "#,
            params![
                entity_type.as_str(),
                canonical_id,
                entity.name,
                entity.source_path,
                entity.content_hash,
                metadata,
                now,
            ],
        )?;

        let stored = Self::find_entity(conn, &canonical_id, Some(entity_type))?.ok_or_else(|| {
            StorageError::Integrity(format!("entity {} missing after upsert", canonical_id))
        })?;

        Ok((changed, stored))
    }

    fn find_relationship(
        conn: &Connection,
        source_id: EntityId,
        target_id: EntityId,
        relation_type: RelationType,
    ) -> StorageResult<Option<Relationship>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM relationships
                     WHERE source_id = ?1 AND target_id = ?2 AND relation_type = ?3",
                    RELATIONSHIP_COLUMNS
                ),
                params![source_id, target_id, relation_type.as_str()],
                Self::read_relationship_row,
            )
            .optional()?;

        row.map(Self::row_to_relationship).transpose()
    }

    fn upsert_relationship_row(
        conn: &Connection,
        relationship: &NewRelationship,
        now: &str,
    ) -> StorageResult<(usize, Relationship)> {
        if relationship.is_self_loop() {
            return Err(StorageError::SelfLoop(relationship.source_id));
        }

        let metadata = serde_json::to_string(&relationship.metadata)?;
        let changed = conn.execute(
            r#"
            INSERT INTO relationships (source_id, target_id, relation_type, confidence, metadata,
                                       created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(source_id, target_id, relation_type) DO UPDATE SET
                confidence = excluded.confidence,
                metadata = excluded.metadata
            WHERE relationships.confidence IS NOT excluded.confidence
               OR relationships.metadata IS NOT excluded.metadata
            "#,
            params![
                relationship.source_id,
                relationship.target_id,
                relationship.relation_type.as_str(),
                relationship.confidence,
                metadata,
                now,
            ],
        )?;

        let stored = Self::find_relationship(
            conn,
            relationship.source_id,
            relationship.target_id,
            relationship.relation_type,
        )?
        .ok_or_else(|| {
            StorageError::Integrity(format!(
                "{} edge {} -> {} missing after upsert",
                relationship.relation_type, relationship.source_id, relationship.target_id
            ))
        })?;

        Ok((changed, stored))
    }

    fn open_connection(conn: Connection) -> StorageResult<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Self::open_connection(Connection::open(path)?)
    }

    fn open_in_memory() -> StorageResult<Self> {
        Self::open_connection(Connection::open_in_memory()?)
    }
}

impl GraphStore for SqliteStore {
    // === Entity Operations ===

    fn upsert_entity(&self, entity: &NewEntity) -> StorageResult<Entity> {
        let conn = self.conn()?;
        let (_, stored) = Self::upsert_entity_row(&conn, entity, &Self::now())?;
        Ok(stored)
    }

    fn get_entity(
        &self,
        canonical_id: &str,
        entity_type: Option<EntityType>,
    ) -> StorageResult<Option<Entity>> {
        let entity_type = entity_type.or_else(|| CanonicalRef::infer_type(canonical_id));
        let conn = self.conn()?;
        Self::find_entity(&conn, canonical_id, entity_type)
    }

    fn get_entity_by_id(&self, id: EntityId) -> StorageResult<Option<Entity>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM entities e WHERE e.id = ?1", ENTITY_COLUMNS),
                params![id],
                Self::read_entity_row,
            )
            .optional()?;
        row.map(Self::row_to_entity).transpose()
    }

    fn list_entities(&self, entity_type: Option<EntityType>) -> StorageResult<Vec<Entity>> {
        let conn = self.conn()?;
        match entity_type {
            Some(t) => Self::query_entities(
                &conn,
                &format!(
                    "SELECT {} FROM entities e WHERE e.type = ?1 ORDER BY e.id",
                    ENTITY_COLUMNS
                ),
                params![t.as_str()],
            ),
            None => Self::query_entities(
                &conn,
                &format!("SELECT {} FROM entities e ORDER BY e.id", ENTITY_COLUMNS),
                params![],
            ),
        }
    }

    fn entities_by_source(&self, source_path: &str) -> StorageResult<Vec<Entity>> {
        let conn = self.conn()?;
        Self::query_entities(
            &conn,
            &format!(
                "SELECT {} FROM entities e WHERE e.source_path = ?1 ORDER BY e.id",
                ENTITY_COLUMNS
            ),
            params![source_path],
        )
    }

    fn delete_entity(&self, id: EntityId) -> StorageResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM entities WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn delete_entities_by_source(&self, source_path: &str) -> StorageResult<usize> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM entities WHERE source_path = ?1",
            params![source_path],
        )?;
        debug!(source_path, rows, "deleted entities by source");
        Ok(rows)
    }

    fn bulk_upsert_entities(&self, entities: &[NewEntity]) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Self::now();

        let mut changed = 0;
        for entity in entities {
            changed += Self::upsert_entity_row(&tx, entity, &now)?.0;
        }

        tx.commit()?;
        Ok(changed)
    }

    // === Relationship Operations ===

    fn upsert_relationship(&self, relationship: &NewRelationship) -> StorageResult<Relationship> {
        let conn = self.conn()?;
        let (_, stored) = Self::upsert_relationship_row(&conn, relationship, &Self::now())?;
        Ok(stored)
    }

    fn bulk_upsert_relationships(&self, relationships: &[NewRelationship]) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Self::now();

        let mut changed = 0;
        for relationship in relationships {
            if relationship.is_self_loop() {
                warn!(
                    entity = relationship.source_id,
                    relation = %relationship.relation_type,
                    "skipping self-loop"
                );
                continue;
            }
            changed += Self::upsert_relationship_row(&tx, relationship, &now)?.0;
        }

        tx.commit()?;
        Ok(changed)
    }

    fn sync_relationships(
        &self,
        owners: &[EntityId],
        relationships: &[NewRelationship],
    ) -> StorageResult<(usize, usize)> {
        let keep: HashSet<(EntityId, EntityId, RelationType)> = relationships
            .iter()
            .map(|r| (r.source_id, r.target_id, r.relation_type))
            .collect();

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Self::now();

        let mut removed = 0;
        {
            let mut outgoing = tx.prepare(
                "SELECT id, target_id, relation_type FROM relationships WHERE source_id = ?1",
            )?;
            for &owner in owners {
                let rows = outgoing
                    .query_map(params![owner], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                for (id, target_id, relation_type) in rows {
                    let stale = match relation_type.parse::<RelationType>() {
                        Ok(relation_type) => !keep.contains(&(owner, target_id, relation_type)),
                        Err(_) => true,
                    };
                    if stale {
                        removed += tx.execute("DELETE FROM relationships WHERE id = ?1", params![id])?;
                    }
                }
            }
        }

        let mut changed = 0;
        for relationship in relationships {
            if relationship.is_self_loop() {
                warn!(
                    entity = relationship.source_id,
                    relation = %relationship.relation_type,
                    "skipping self-loop"
                );
                continue;
            }
            changed += Self::upsert_relationship_row(&tx, relationship, &now)?.0;
        }

        tx.commit()?;
        debug!(owners = owners.len(), changed, removed, "synced relationships");
        Ok((changed, removed))
    }

    fn list_relationships(
        &self,
        relation_type: Option<RelationType>,
    ) -> StorageResult<Vec<Relationship>> {
        let conn = self.conn()?;
        let rows = match relation_type {
            Some(t) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM relationships WHERE relation_type = ?1 ORDER BY id",
                    RELATIONSHIP_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![t.as_str()], Self::read_relationship_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM relationships ORDER BY id",
                    RELATIONSHIP_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([], Self::read_relationship_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };

        rows.into_iter().map(Self::row_to_relationship).collect()
    }

    fn get_neighbors(
        &self,
        entity_id: EntityId,
        relation_type: Option<RelationType>,
    ) -> StorageResult<Vec<Entity>> {
        let conn = self.conn()?;
        match relation_type {
            Some(t) => Self::query_entities(
                &conn,
                &format!(
                    "SELECT DISTINCT {} FROM relationships r
                     JOIN entities e ON e.id = r.target_id
                     WHERE r.source_id = ?1 AND r.relation_type = ?2
                     ORDER BY e.id",
                    ENTITY_COLUMNS
                ),
                params![entity_id, t.as_str()],
            ),
            None => Self::query_entities(
                &conn,
                &format!(
                    "SELECT DISTINCT {} FROM relationships r
                     JOIN entities e ON e.id = r.target_id
                     WHERE r.source_id = ?1
                     ORDER BY e.id",
                    ENTITY_COLUMNS
                ),
                params![entity_id],
            ),
        }
    }

    // === Search & Stats ===

    fn search_entities(&self, query: &str, limit: usize) -> StorageResult<Vec<Entity>> {
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT);
        let conn = self.conn()?;

        let sql = format!(
            "SELECT {} FROM entities_fts
             JOIN entities e ON e.id = entities_fts.rowid
             WHERE entities_fts MATCH ?1
             ORDER BY bm25(entities_fts)
             LIMIT ?2",
            ENTITY_COLUMNS
        );
        let rows = conn.prepare(&sql).and_then(|mut stmt| {
            let rows = stmt
                .query_map(params![query, limit as i64], Self::read_entity_row)?
                .collect::<Result<Vec<_>, _>>();
            rows
        });

        match rows {
            Ok(rows) => rows.into_iter().map(Self::row_to_entity).collect(),
            Err(e) => {
                warn!(query, error = %e, "entity search failed, returning no results");
                Ok(Vec::new())
            }
        }
    }

    fn stats(&self) -> StorageResult<GraphStats> {
        let conn = self.conn()?;
        let mut stats = GraphStats::default();

        let mut stmt = conn.prepare("SELECT type, COUNT(*) FROM entities GROUP BY type")?;
        let entity_rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (raw_type, count) in entity_rows {
            let count = count as usize;
            stats.total_entities += count;
            match raw_type.parse::<EntityType>() {
                Ok(t) => {
                    stats.entity_counts.insert(t, count);
                }
                Err(e) => warn!(error = %e, "ignoring unknown entity type in stats"),
            }
        }

        let mut stmt = conn
            .prepare("SELECT relation_type, COUNT(*) FROM relationships GROUP BY relation_type")?;
        let relation_rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (raw_type, count) in relation_rows {
            let count = count as usize;
            stats.total_relationships += count;
            match raw_type.parse::<RelationType>() {
                Ok(t) => {
                    stats.relation_counts.insert(t, count);
                }
                Err(e) => warn!(error = %e, "ignoring unknown relation type in stats"),
            }
        }

        stats.last_indexed = conn
            .query_row(
                "SELECT value FROM graph_meta WHERE key = ?1",
                params![META_LAST_INDEXED],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or_default();

        Ok(stats)
    }

    fn get_meta(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM graph_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_meta(&self, key: &str, value: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO graph_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn plan(id: &str) -> NewEntity {
        NewEntity::new(CanonicalRef::plan(id), format!("Plan {}", id))
    }

    fn agent(plan_id: &str, n: &str) -> NewEntity {
        NewEntity::new(CanonicalRef::agent(plan_id, n), format!("Agent {}", n))
    }

    // ========================================================================
    // Entity upserts
    // ========================================================================

    #[test]
    fn test_upsert_same_canonical_id_updates_in_place() {
        let store = create_test_store();

        let first = store.upsert_entity(&plan("0042")).unwrap();
        let second = store
            .upsert_entity(&plan("0042").with_metadata("status", "WIP"))
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.status(), Some("WIP"));
        assert_eq!(store.list_entities(None).unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_replaces_metadata_wholesale() {
        let store = create_test_store();

        store
            .upsert_entity(&plan("0001").with_metadata("status", "WIP").with_metadata("owner", "ana"))
            .unwrap();
        let updated = store
            .upsert_entity(&plan("0001").with_metadata("status", "PASS"))
            .unwrap();

        assert_eq!(updated.status(), Some("PASS"));
        assert!(updated.metadata.get("owner").is_none());
    }

    #[test]
    fn test_upsert_replaces_optional_fields() {
        let store = create_test_store();

        store
            .upsert_entity(&plan("0001").with_source("/a.md").with_content_hash("abc"))
            .unwrap();
        let updated = store.upsert_entity(&plan("0001")).unwrap();

        assert_eq!(updated.source_path, None);
        assert_eq!(updated.content_hash, None);
    }

    #[test]
    fn test_same_value_different_type_are_distinct() {
        let store = create_test_store();

        let a = store
            .upsert_entity(&NewEntity::new(CanonicalRef::new(EntityType::Tag, "x"), "x"))
            .unwrap();
        let b = store
            .upsert_entity(&NewEntity::new(CanonicalRef::new(EntityType::Concept, "x"), "x"))
            .unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.canonical_id, "tag:x");
        assert_eq!(b.canonical_id, "concept:x");
    }

    #[test]
    fn test_identical_reupsert_keeps_updated_at() {
        let store = create_test_store();

        let first = store.upsert_entity(&plan("0001")).unwrap();
        let again = store.upsert_entity(&plan("0001")).unwrap();

        assert_eq!(first.updated_at, again.updated_at);
        assert_eq!(first.created_at, again.created_at);
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    #[test]
    fn test_get_entity_infers_type_from_prefix() {
        let store = create_test_store();
        store.upsert_entity(&agent("0042", "003")).unwrap();

        let found = store.get_entity("agent:0042#003", None).unwrap().unwrap();
        assert_eq!(found.entity_type, EntityType::Agent);

        let typed = store
            .get_entity("agent:0042#003", Some(EntityType::Agent))
            .unwrap();
        assert!(typed.is_some());

        let wrong_type = store
            .get_entity("agent:0042#003", Some(EntityType::Plan))
            .unwrap();
        assert!(wrong_type.is_none());
    }

    #[test]
    fn test_get_entity_unrecognized_prefix_uses_untyped_lookup() {
        let store = create_test_store();
        let conn = store.conn().unwrap();
        conn.execute(
            "INSERT INTO entities (type, canonical_id, name, metadata, created_at, updated_at)
             VALUES ('concept', 'legacy-id', 'Legacy', '{}', ?1, ?1)",
            params![SqliteStore::now()],
        )
        .unwrap();
        drop(conn);

        let found = store.get_entity("legacy-id", None).unwrap().unwrap();
        assert_eq!(found.entity_type, EntityType::Concept);
        assert!(store.get_entity("missing", None).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_metadata_reads_as_empty() {
        let store = create_test_store();
        let stored = store.upsert_entity(&plan("0001")).unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "UPDATE entities SET metadata = 'not json' WHERE id = ?1",
                params![stored.id],
            )
            .unwrap();

        let loaded = store.get_entity_by_id(stored.id).unwrap().unwrap();
        assert!(loaded.metadata.is_empty());
    }

    // ========================================================================
    // Relationships
    // ========================================================================

    #[test]
    fn test_upsert_relationship_is_unique_per_edge_key() {
        let store = create_test_store();
        let a = store.upsert_entity(&plan("0001")).unwrap();
        let b = store.upsert_entity(&plan("0002")).unwrap();

        let first = store
            .upsert_relationship(&NewRelationship::new(a.id, b.id, RelationType::SimilarTo))
            .unwrap();
        let second = store
            .upsert_relationship(
                &NewRelationship::new(a.id, b.id, RelationType::SimilarTo).with_confidence(0.9),
            )
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.confidence, 0.9);

        // Different relation type is a different edge
        store
            .upsert_relationship(&NewRelationship::new(a.id, b.id, RelationType::DependsOn))
            .unwrap();
        assert_eq!(store.list_relationships(None).unwrap().len(), 2);
    }

    #[test]
    fn test_self_loop_rejected() {
        let store = create_test_store();
        let a = store.upsert_entity(&plan("0001")).unwrap();

        let err = store
            .upsert_relationship(&NewRelationship::new(a.id, a.id, RelationType::DependsOn))
            .unwrap_err();
        assert!(matches!(err, StorageError::SelfLoop(id) if id == a.id));

        let changed = store
            .bulk_upsert_relationships(&[NewRelationship::new(a.id, a.id, RelationType::Blocks)])
            .unwrap();
        assert_eq!(changed, 0);
        assert!(store.list_relationships(None).unwrap().is_empty());
    }

    #[test]
    fn test_relationship_requires_existing_endpoints() {
        let store = create_test_store();
        let a = store.upsert_entity(&plan("0001")).unwrap();

        let result =
            store.upsert_relationship(&NewRelationship::new(a.id, 999, RelationType::DependsOn));
        assert!(matches!(result, Err(StorageError::Database(_))));
    }

    #[test]
    fn test_delete_entity_cascades_relationships() {
        let store = create_test_store();
        let a = store.upsert_entity(&plan("0001")).unwrap();
        let b = store.upsert_entity(&agent("0001", "000")).unwrap();
        store
            .upsert_relationship(&NewRelationship::new(a.id, b.id, RelationType::Contains))
            .unwrap();

        assert!(store.delete_entity(b.id).unwrap());
        assert!(!store.delete_entity(b.id).unwrap());
        assert!(store.list_relationships(None).unwrap().is_empty());
    }

    #[test]
    fn test_delete_entities_by_source() {
        let store = create_test_store();
        store
            .upsert_entity(&agent("0001", "000").with_source("/plans/0001/agents/000.md"))
            .unwrap();
        store
            .upsert_entity(&agent("0001", "001").with_source("/plans/0001/agents/001.md"))
            .unwrap();

        let removed = store
            .delete_entities_by_source("/plans/0001/agents/000.md")
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store
            .entities_by_source("/plans/0001/agents/000.md")
            .unwrap()
            .is_empty());
        assert_eq!(store.list_entities(Some(EntityType::Agent)).unwrap().len(), 1);
    }

    #[test]
    fn test_get_neighbors_filters_by_relation() {
        let store = create_test_store();
        let a = store.upsert_entity(&agent("0001", "000")).unwrap();
        let b = store.upsert_entity(&agent("0001", "001")).unwrap();
        let f = store
            .upsert_entity(&NewEntity::new(CanonicalRef::file("src/main.rs"), "src/main.rs"))
            .unwrap();

        store
            .bulk_upsert_relationships(&[
                NewRelationship::new(a.id, b.id, RelationType::DependsOn),
                NewRelationship::new(a.id, f.id, RelationType::Modifies),
                NewRelationship::new(a.id, b.id, RelationType::Blocks),
            ])
            .unwrap();

        let all = store.get_neighbors(a.id, None).unwrap();
        assert_eq!(all.len(), 2);

        let deps = store.get_neighbors(a.id, Some(RelationType::DependsOn)).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].id, b.id);

        assert!(store.get_neighbors(b.id, None).unwrap().is_empty());
    }

    // ========================================================================
    // Bulk ingestion
    // ========================================================================

    #[test]
    fn test_bulk_upsert_counts_changed_rows() {
        let store = create_test_store();
        let batch = vec![plan("0001"), plan("0002"), plan("0003")];

        assert_eq!(store.bulk_upsert_entities(&batch).unwrap(), 3);
        assert_eq!(store.bulk_upsert_entities(&batch).unwrap(), 0);

        let changed = vec![plan("0001").with_metadata("status", "WIP"), plan("0002")];
        assert_eq!(store.bulk_upsert_entities(&changed).unwrap(), 1);
        assert_eq!(store.list_entities(None).unwrap().len(), 3);
    }

    #[test]
    fn test_bulk_upsert_relationships_is_all_or_nothing() {
        let store = create_test_store();
        let a = store.upsert_entity(&plan("0001")).unwrap();
        let b = store.upsert_entity(&plan("0002")).unwrap();

        let result = store.bulk_upsert_relationships(&[
            NewRelationship::new(a.id, b.id, RelationType::DependsOn),
            NewRelationship::new(a.id, 12345, RelationType::DependsOn),
        ]);

        assert!(result.is_err());
        assert!(store.list_relationships(None).unwrap().is_empty());
    }

    #[test]
    fn test_sync_relationships_replaces_owner_edges() {
        let store = create_test_store();
        let a = store.upsert_entity(&plan("0001")).unwrap();
        let b = store.upsert_entity(&plan("0002")).unwrap();
        let c = store.upsert_entity(&plan("0003")).unwrap();
        store
            .bulk_upsert_relationships(&[
                NewRelationship::new(a.id, b.id, RelationType::DependsOn),
                NewRelationship::new(a.id, c.id, RelationType::DependsOn),
                NewRelationship::new(b.id, c.id, RelationType::DependsOn),
            ])
            .unwrap();

        let keep = vec![NewRelationship::new(a.id, c.id, RelationType::DependsOn)];
        assert_eq!(store.sync_relationships(&[a.id], &keep).unwrap(), (0, 1));

        let targets: Vec<EntityId> = store
            .get_neighbors(a.id, None)
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(targets, vec![c.id]);

        // Edges of entities outside the owner set are untouched
        assert_eq!(store.get_neighbors(b.id, None).unwrap().len(), 1);

        assert_eq!(store.sync_relationships(&[a.id], &keep).unwrap(), (0, 0));
    }

    #[test]
    fn test_sync_relationships_is_all_or_nothing() {
        let store = create_test_store();
        let a = store.upsert_entity(&plan("0001")).unwrap();
        let b = store.upsert_entity(&plan("0002")).unwrap();
        store
            .upsert_relationship(&NewRelationship::new(a.id, b.id, RelationType::DependsOn))
            .unwrap();

        let result = store.sync_relationships(
            &[a.id],
            &[NewRelationship::new(a.id, 12345, RelationType::DependsOn)],
        );

        assert!(result.is_err());
        assert_eq!(store.list_relationships(None).unwrap().len(), 1);
    }

    #[test]
    fn test_stats_scenario() {
        let store = create_test_store();
        let plans: Vec<NewEntity> = ["0001", "0002", "0003"].iter().map(|p| plan(p)).collect();
        let agents: Vec<NewEntity> = ["000", "001", "002", "003", "004"]
            .iter()
            .map(|n| agent("0001", n))
            .collect();
        store.bulk_upsert_entities(&plans).unwrap();
        store.bulk_upsert_entities(&agents).unwrap();

        let agent_ids: Vec<EntityId> = store
            .list_entities(Some(EntityType::Agent))
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        let edges: Vec<NewRelationship> = agent_ids
            .windows(2)
            .map(|w| NewRelationship::new(w[0], w[1], RelationType::DependsOn))
            .collect();
        assert_eq!(edges.len(), 4);
        store.bulk_upsert_relationships(&edges).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.entity_counts.get(&EntityType::Plan), Some(&3));
        assert_eq!(stats.entity_counts.get(&EntityType::Agent), Some(&5));
        assert_eq!(stats.relation_counts.get(&RelationType::DependsOn), Some(&4));
        assert_eq!(stats.total_entities, 8);
        assert_eq!(stats.total_relationships, 4);
        assert_eq!(stats.last_indexed, "");
    }

    #[test]
    fn test_meta_round_trip() {
        let store = create_test_store();
        assert_eq!(store.get_meta(META_LAST_INDEXED).unwrap(), None);

        store.set_meta(META_LAST_INDEXED, "2026-01-01T00:00:00+00:00").unwrap();
        store.set_meta(META_LAST_INDEXED, "2026-02-01T00:00:00+00:00").unwrap();

        assert_eq!(
            store.stats().unwrap().last_indexed,
            "2026-02-01T00:00:00+00:00"
        );
    }

    // ========================================================================
    // Search
    // ========================================================================

    #[test]
    fn test_search_ranks_matches() {
        let store = create_test_store();
        store
            .upsert_entity(&NewEntity::new(CanonicalRef::plan("0001"), "Payment gateway rewrite"))
            .unwrap();
        store
            .upsert_entity(&NewEntity::new(CanonicalRef::plan("0002"), "Search indexing"))
            .unwrap();

        let hits = store.search_entities("payment", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].canonical_id, "plan:0001");
    }

    #[test]
    fn test_search_orders_best_match_first() {
        let store = create_test_store();
        store
            .upsert_entity(&NewEntity::new(
                CanonicalRef::plan("0001"),
                "Search rewrite that also touches the payment flow in several places",
            ))
            .unwrap();
        store
            .upsert_entity(&NewEntity::new(CanonicalRef::plan("0002"), "Payment payment"))
            .unwrap();
        for id in ["0003", "0004", "0005"] {
            store.upsert_entity(&plan(id)).unwrap();
        }

        let hits: Vec<String> = store
            .search_entities("payment", 10)
            .unwrap()
            .into_iter()
            .map(|e| e.canonical_id)
            .collect();
        assert_eq!(hits, vec!["plan:0002", "plan:0001"]);
    }

    #[test]
    fn test_search_sees_updates_and_deletes() {
        let store = create_test_store();
        let e = store
            .upsert_entity(&NewEntity::new(CanonicalRef::plan("0001"), "Old title"))
            .unwrap();
        store
            .upsert_entity(&NewEntity::new(CanonicalRef::plan("0001"), "Fresh title"))
            .unwrap();

        assert!(store.search_entities("old", 10).unwrap().is_empty());
        assert_eq!(store.search_entities("fresh", 10).unwrap().len(), 1);

        store.delete_entity(e.id).unwrap();
        assert!(store.search_entities("fresh", 10).unwrap().is_empty());
    }

    #[test]
    fn test_search_syntax_error_yields_empty() {
        let store = create_test_store();
        store.upsert_entity(&plan("0001")).unwrap();

        assert!(store.search_entities("\"unterminated", 10).unwrap().is_empty());
        assert!(store.search_entities("AND OR", 10).unwrap().is_empty());
    }

    #[test]
    fn test_search_limit_is_clamped() {
        let store = create_test_store();
        for i in 0..3 {
            store
                .upsert_entity(&NewEntity::new(
                    CanonicalRef::new(EntityType::Concept, format!("c{}", i)),
                    "shared term",
                ))
                .unwrap();
        }

        // Zero is raised to one
        assert_eq!(store.search_entities("shared", 0).unwrap().len(), 1);
        assert_eq!(store.search_entities("shared", 5000).unwrap().len(), 3);
    }

    #[test]
    fn test_metadata_is_searchable() {
        let store = create_test_store();
        store
            .upsert_entity(&agent("0001", "000").with_metadata("persona", json!("reviewer")))
            .unwrap();

        assert_eq!(store.search_entities("reviewer", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_open_on_disk_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graph.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_entity(&plan("0001")).unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.get_entity("plan:0001", None).unwrap().is_some());
    }
}
