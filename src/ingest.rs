//! Writing extraction results into a store
//!
//! Pipeline steps for one batch of extraction results:
//! 1. Drop placeholders whose canonical ID is already known
//! 2. Bulk-upsert entities (one transaction)
//! 3. Remove entities that a re-read source file no longer produces
//! 4. Resolve edge endpoints to numeric IDs, together with edges left
//!    pending by earlier passes; unresolved ones stay pending
//! 5. Replace the outgoing edges of every re-read entity (second transaction)
//! 6. Record the pending edges and `last_indexed`

use crate::change::has_changed;
use crate::extract::{is_placeholder, ExtractedRelationship, ExtractionResult, PLACEHOLDER_KEY};
use crate::graph::{CanonicalRef, EntityId, EntityType, NewEntity, NewRelationship, RelationType};
use crate::storage::{GraphStore, StorageResult, META_LAST_INDEXED};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// `graph_meta` key holding edges whose endpoints were not stored yet
pub const META_PENDING_EDGES: &str = "pending_edges";

/// What an ingestion pass changed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestSummary {
    /// Entity rows inserted or changed
    pub entities_changed: usize,
    /// Entities deleted because their source no longer produces them
    pub entities_removed: usize,
    /// Relationship rows inserted or changed
    pub relationships_changed: usize,
    /// Edges deleted because a re-read source no longer produces them
    pub relationships_removed: usize,
    /// Placeholders not written because the real entity exists
    pub placeholders_skipped: usize,
    /// Edges still waiting for an endpoint after this pass
    pub pending_edges: usize,
    /// Edges from this batch that could not be resolved yet
    pub warnings: Vec<String>,
}

/// Ingest a single extraction result
pub fn ingest_extraction<S: GraphStore + ?Sized>(
    store: &S,
    result: &ExtractionResult,
) -> StorageResult<IngestSummary> {
    ingest_batch(store, std::slice::from_ref(result))
}

/// Ingest several extraction results as one pass.
///
/// All entities are written before any edge is resolved, so references
/// between plans in the same batch resolve regardless of order. An edge
/// whose endpoint is not stored yet is kept pending and retried by later
/// passes, so a plan indexed before its dependency still gets the edge once
/// the dependency arrives.
pub fn ingest_batch<S: GraphStore + ?Sized>(
    store: &S,
    results: &[ExtractionResult],
) -> StorageResult<IngestSummary> {
    let mut summary = IngestSummary::default();

    // Step 1: placeholders never overwrite a real entity
    let real: HashSet<&CanonicalRef> = results
        .iter()
        .flat_map(|r| &r.entities)
        .filter(|e| !is_placeholder(e))
        .map(|e| &e.reference)
        .collect();

    let mut entities: Vec<NewEntity> = Vec::new();
    for entity in results.iter().flat_map(|r| &r.entities) {
        if is_placeholder(entity)
            && (real.contains(&entity.reference)
                || store
                    .get_entity(&entity.canonical_id(), Some(entity.entity_type()))?
                    .is_some())
        {
            debug!("keeping existing {}", entity.reference);
            summary.placeholders_skipped += 1;
            continue;
        }
        entities.push(entity.clone());
    }

    // Step 2
    summary.entities_changed = store.bulk_upsert_entities(&entities)?;

    // Step 3
    summary.entities_removed = remove_vanished(store, results)?;

    // Step 4: the batch describes every outgoing edge of its real plans,
    // features and agents
    let owners: HashSet<&CanonicalRef> = real
        .iter()
        .copied()
        .filter(|r| {
            matches!(
                r.entity_type,
                EntityType::Plan | EntityType::Feature | EntityType::Agent
            )
        })
        .collect();

    let mut ids: HashMap<&CanonicalRef, Option<EntityId>> = HashMap::new();
    let mut relationships = Vec::new();
    let mut pending: Vec<ExtractedRelationship> = Vec::new();
    let mut pending_keys: HashSet<(CanonicalRef, CanonicalRef, RelationType)> = HashSet::new();

    for rel in results.iter().flat_map(|r| &r.relationships) {
        let source = resolve(store, &mut ids, &rel.source)?;
        let target = resolve(store, &mut ids, &rel.target)?;

        match (source, target) {
            (Some(source_id), Some(target_id)) => relationships.push(
                NewRelationship::new(source_id, target_id, rel.relation_type)
                    .with_confidence(rel.confidence)
                    .with_metadata(rel.metadata.clone()),
            ),
            (source, _) => {
                let missing = if source.is_none() {
                    &rel.source
                } else {
                    &rel.target
                };
                let message = format!(
                    "holding {} edge {} -> {} until {} is indexed",
                    rel.relation_type, rel.source, rel.target, missing
                );
                warn!("{}", message);
                summary.warnings.push(message);
                if pending_keys.insert(edge_key(rel)) {
                    pending.push(rel.clone());
                }
            }
        }
    }

    let earlier = load_pending(store)?;
    let retried = earlier.len();
    let mut recovered = 0;
    for rel in &earlier {
        // Re-read sources produced their edges afresh above
        if owners.contains(&rel.source) || pending_keys.contains(&edge_key(rel)) {
            continue;
        }
        let Some(source_id) = resolve_owned(store, &rel.source)? else {
            debug!("discarding pending edge from removed {}", rel.source);
            continue;
        };
        match resolve_owned(store, &rel.target)? {
            Some(target_id) => {
                recovered += 1;
                relationships.push(
                    NewRelationship::new(source_id, target_id, rel.relation_type)
                        .with_confidence(rel.confidence)
                        .with_metadata(rel.metadata.clone()),
                );
            }
            None => {
                pending_keys.insert(edge_key(rel));
                pending.push(rel.clone());
            }
        }
    }

    // Step 5
    let mut owner_ids = Vec::with_capacity(owners.len());
    for owner in &owners {
        if let Some(id) = resolve(store, &mut ids, *owner)? {
            owner_ids.push(id);
        }
    }
    let (changed, removed) = store.sync_relationships(&owner_ids, &relationships)?;
    summary.relationships_changed = changed;
    summary.relationships_removed = removed;

    // Step 6
    summary.pending_edges = pending.len();
    store.set_meta(META_PENDING_EDGES, &serde_json::to_string(&pending)?)?;
    store.set_meta(META_LAST_INDEXED, &Utc::now().to_rfc3339())?;

    info!(
        "ingested {} result(s): {} entities changed, {} removed, {} relationships changed, {} removed, {} of {} pending edges recovered, {} pending",
        results.len(),
        summary.entities_changed,
        summary.entities_removed,
        summary.relationships_changed,
        summary.relationships_removed,
        recovered,
        retried,
        summary.pending_edges
    );

    Ok(summary)
}

fn edge_key(rel: &ExtractedRelationship) -> (CanonicalRef, CanonicalRef, RelationType) {
    (rel.source.clone(), rel.target.clone(), rel.relation_type)
}

/// Edges recorded as pending by earlier passes; an unreadable record is
/// treated as empty
fn load_pending<S: GraphStore + ?Sized>(store: &S) -> StorageResult<Vec<ExtractedRelationship>> {
    let Some(raw) = store.get_meta(META_PENDING_EDGES)? else {
        return Ok(Vec::new());
    };
    match serde_json::from_str(&raw) {
        Ok(edges) => Ok(edges),
        Err(e) => {
            warn!(error = %e, "unreadable pending edges, discarding");
            Ok(Vec::new())
        }
    }
}

fn resolve_owned<S: GraphStore + ?Sized>(
    store: &S,
    reference: &CanonicalRef,
) -> StorageResult<Option<EntityId>> {
    Ok(store
        .get_entity(&reference.to_string(), Some(reference.entity_type))?
        .map(|e| e.id))
}

fn resolve<'a, S: GraphStore + ?Sized>(
    store: &S,
    cache: &mut HashMap<&'a CanonicalRef, Option<EntityId>>,
    reference: &'a CanonicalRef,
) -> StorageResult<Option<EntityId>> {
    if let Some(id) = cache.get(reference) {
        return Ok(*id);
    }
    let id = store
        .get_entity(&reference.to_string(), Some(reference.entity_type))?
        .map(|e| e.id);
    cache.insert(reference, id);
    Ok(id)
}

/// Delete stored entities rooted at a source that was just re-read but no
/// longer yields them (a removed feature heading, for instance).
fn remove_vanished<S: GraphStore + ?Sized>(
    store: &S,
    results: &[ExtractionResult],
) -> StorageResult<usize> {
    let mut produced: HashMap<&str, HashSet<String>> = HashMap::new();
    for entity in results.iter().flat_map(|r| &r.entities) {
        if let Some(source) = entity.source_path.as_deref() {
            produced
                .entry(source)
                .or_default()
                .insert(entity.canonical_id());
        }
    }

    let mut removed = 0;
    for (source, canonical_ids) in &produced {
        for stored in store.entities_by_source(source)? {
            if !canonical_ids.contains(&stored.canonical_id) && store.delete_entity(stored.id)? {
                debug!("removed {} (no longer in {})", stored.canonical_id, source);
                removed += 1;
            }
        }
    }
    Ok(removed)
}

/// Whether an extraction result would change the store.
///
/// True when any source file it read has changed since it was last
/// ingested, or when its plan is not stored yet.
pub fn needs_ingest<S: GraphStore + ?Sized>(
    store: &S,
    result: &ExtractionResult,
) -> StorageResult<bool> {
    for (source, hash) in result.source_hashes() {
        if has_changed(store, source, hash)? {
            return Ok(true);
        }
    }

    match &result.plan_id {
        Some(plan_id) => {
            let plan = CanonicalRef::plan(plan_id);
            Ok(store
                .get_entity(&plan.to_string(), Some(plan.entity_type))?
                .map_or(true, |e| e.metadata.get(PLACEHOLDER_KEY) == Some(&Value::Bool(true))))
        }
        None => Ok(false),
    }
}

/// Delete entities whose source file lies under `root` but no longer exists.
///
/// Returns the number of entities removed.
pub fn prune_missing_sources<S: GraphStore + ?Sized>(
    store: &S,
    root: impl AsRef<Path>,
) -> StorageResult<usize> {
    let root = root.as_ref();
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());

    let missing: BTreeSet<String> = store
        .list_entities(None)?
        .into_iter()
        .filter_map(|e| e.source_path)
        .filter(|source| {
            let path = Path::new(source);
            path.starts_with(&root) && !path.exists()
        })
        .collect();

    let mut removed = 0;
    for source in &missing {
        let count = store.delete_entities_by_source(source)?;
        info!("pruned {} entities from removed source {}", count, source);
        removed += count;
    }
    Ok(removed)
}
