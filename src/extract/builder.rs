//! Per-extraction accumulator with canonical-ID and edge-key deduplication

use super::{ExtractedRelationship, ExtractionResult};
use crate::graph::{CanonicalRef, NewEntity, RelationType};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Metadata flag marking auto-created stand-in entities
pub(crate) const PLACEHOLDER_KEY: &str = "placeholder";

pub(crate) fn is_placeholder(entity: &NewEntity) -> bool {
    entity.metadata.get(PLACEHOLDER_KEY) == Some(&Value::Bool(true))
}

type EdgeKey = (CanonicalRef, CanonicalRef, RelationType);

/// Collects entities, relationships and warnings for one extraction call.
///
/// Lives only as long as the call, so IDs and counters never leak between
/// plans.
#[derive(Debug, Default)]
pub(crate) struct ExtractionBuilder {
    entities: Vec<NewEntity>,
    index: HashMap<CanonicalRef, usize>,
    relationships: Vec<ExtractedRelationship>,
    edge_keys: HashSet<EdgeKey>,
    warnings: Vec<String>,
}

impl ExtractionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a non-fatal problem
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn contains(&self, reference: &CanonicalRef) -> bool {
        self.index.contains_key(reference)
    }

    /// Add an entity, merging with an earlier one of the same canonical ID.
    ///
    /// A real entity replaces a placeholder; a placeholder never replaces
    /// anything. Otherwise metadata keys are merged (later keys win) and the
    /// later name, source and hash take over.
    pub fn add_entity(&mut self, entity: NewEntity) {
        let Some(&pos) = self.index.get(&entity.reference) else {
            self.index.insert(entity.reference.clone(), self.entities.len());
            self.entities.push(entity);
            return;
        };

        let existing = &mut self.entities[pos];
        if is_placeholder(&entity) {
            return;
        }
        if is_placeholder(existing) {
            *existing = entity;
            return;
        }

        if !entity.name.is_empty() {
            existing.name = entity.name;
        }
        if entity.source_path.is_some() {
            existing.source_path = entity.source_path;
        }
        if entity.content_hash.is_some() {
            existing.content_hash = entity.content_hash;
        }
        existing.metadata.extend(entity.metadata);
    }

    /// Add a `plan:{id}` stand-in unless the plan is already known
    pub fn ensure_plan_placeholder(&mut self, plan_id: &str) {
        let reference = CanonicalRef::plan(plan_id);
        if self.contains(&reference) {
            return;
        }
        self.add_entity(
            NewEntity::new(reference, format!("Plan {}", plan_id))
                .with_metadata("planId", plan_id)
                .with_metadata(PLACEHOLDER_KEY, true),
        );
    }

    /// Add a relationship. Self-loops and repeated edge keys are skipped.
    pub fn relate(&mut self, source: &CanonicalRef, target: &CanonicalRef, relation_type: RelationType) {
        if source == target {
            return;
        }
        let key = (source.clone(), target.clone(), relation_type);
        if !self.edge_keys.insert(key) {
            return;
        }
        self.relationships.push(ExtractedRelationship::new(
            source.clone(),
            target.clone(),
            relation_type,
        ));
    }

    pub fn finish(self, plan_id: Option<String>) -> ExtractionResult {
        ExtractionResult {
            plan_id,
            entities: self.entities,
            relationships: self.relationships,
            warnings: self.warnings,
        }
    }
}
