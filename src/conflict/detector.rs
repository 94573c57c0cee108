//! Read-only conflict heuristics over a graph store

use super::types::{ConflictConfig, ConflictKind, ConflictReport, Severity};
use crate::graph::{Entity, EntityId, EntityType, RelationType};
use crate::storage::{GraphStore, StorageResult};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Runs the conflict heuristics against a store.
///
/// Every detector is read-only and returns an empty list on an empty graph.
pub struct ConflictDetector<'a, S: GraphStore + ?Sized> {
    store: &'a S,
    config: ConflictConfig,
}

impl<'a, S: GraphStore + ?Sized> ConflictDetector<'a, S> {
    /// Create a detector with default thresholds
    pub fn new(store: &'a S) -> Self {
        Self::with_config(store, ConflictConfig::default())
    }

    pub fn with_config(store: &'a S, config: ConflictConfig) -> Self {
        Self { store, config }
    }

    /// All four detectors, in order: contention, overlap, cycles, staleness
    pub fn detect_all(&self) -> StorageResult<Vec<ConflictReport>> {
        let mut reports = self.detect_file_contention()?;
        reports.extend(self.detect_feature_overlap()?);
        reports.extend(self.detect_circular_dependencies()?);
        reports.extend(self.detect_stale_wip()?);
        debug!("conflict detection produced {} reports", reports.len());
        Ok(reports)
    }

    /// Files modified by two or more WIP entities at once
    pub fn detect_file_contention(&self) -> StorageResult<Vec<ConflictReport>> {
        let mut by_file: BTreeMap<EntityId, Vec<EntityId>> = BTreeMap::new();
        for rel in self.store.list_relationships(Some(RelationType::Modifies))? {
            by_file.entry(rel.target_id).or_default().push(rel.source_id);
        }

        let mut lookup = Lookup::new(self.store);
        let mut reports = Vec::new();

        for (file_id, sources) in by_file {
            if sources.len() < 2 {
                continue;
            }

            let mut wip = Vec::new();
            for source in sources {
                if lookup.get(source)?.map_or(false, Entity::is_wip) {
                    wip.push(source);
                }
            }
            if wip.len() < 2 {
                continue;
            }

            let mut entities = Vec::with_capacity(wip.len() + 1);
            let mut names = Vec::with_capacity(wip.len());
            for &id in &wip {
                entities.push(lookup.label(id)?);
                names.push(lookup.name(id)?);
            }
            entities.push(lookup.label(file_id)?);
            let file = lookup.name(file_id)?;

            reports.push(ConflictReport::new(
                ConflictKind::FileContention,
                Severity::Error,
                format!(
                    "{} is being modified by {} WIP tasks: {}",
                    file,
                    wip.len(),
                    names.join(", ")
                ),
                entities,
            ));
        }

        Ok(reports)
    }

    /// SIMILAR_TO edges at or above the overlap threshold
    pub fn detect_feature_overlap(&self) -> StorageResult<Vec<ConflictReport>> {
        let mut lookup = Lookup::new(self.store);
        let mut reports = Vec::new();

        for rel in self.store.list_relationships(Some(RelationType::SimilarTo))? {
            if rel.confidence < self.config.overlap_threshold {
                continue;
            }
            let source = lookup.name(rel.source_id)?;
            let target = lookup.name(rel.target_id)?;
            reports.push(ConflictReport::new(
                ConflictKind::FeatureOverlap,
                Severity::Warning,
                format!(
                    "{} and {} may overlap ({:.0}% similar)",
                    source,
                    target,
                    rel.confidence * 100.0
                ),
                vec![lookup.label(rel.source_id)?, lookup.label(rel.target_id)?],
            ));
        }

        Ok(reports)
    }

    /// Cycles among DEPENDS_ON edges, one report per distinct node set
    pub fn detect_circular_dependencies(&self) -> StorageResult<Vec<ConflictReport>> {
        let mut adjacency: BTreeMap<EntityId, Vec<EntityId>> = BTreeMap::new();
        for rel in self.store.list_relationships(Some(RelationType::DependsOn))? {
            adjacency.entry(rel.source_id).or_default().push(rel.target_id);
            adjacency.entry(rel.target_id).or_default();
        }
        for targets in adjacency.values_mut() {
            targets.sort_unstable();
            targets.dedup();
        }

        let cycles = find_cycles(&adjacency);
        let mut lookup = Lookup::new(self.store);
        let mut reports = Vec::with_capacity(cycles.len());

        for cycle in cycles {
            let mut entities = Vec::with_capacity(cycle.len());
            for &id in &cycle {
                entities.push(lookup.label(id)?);
            }
            let mut chain = entities.clone();
            chain.push(entities[0].clone());

            reports.push(ConflictReport::new(
                ConflictKind::CircularDependency,
                Severity::Error,
                format!("circular dependency: {}", chain.join(" -> ")),
                entities,
            ));
        }

        Ok(reports)
    }

    /// WIP agents that have not been updated recently
    pub fn detect_stale_wip(&self) -> StorageResult<Vec<ConflictReport>> {
        self.detect_stale_wip_at(Utc::now())
    }

    /// Staleness measured against a fixed point in time
    pub fn detect_stale_wip_at(&self, now: DateTime<Utc>) -> StorageResult<Vec<ConflictReport>> {
        let mut reports = Vec::new();

        for agent in self.store.list_entities(Some(EntityType::Agent))? {
            if !agent.is_wip() {
                continue;
            }
            let days = (now - agent.updated_at).num_days();
            let severity = if days >= self.config.stale_error_days {
                Severity::Error
            } else if days >= self.config.stale_warning_days {
                Severity::Warning
            } else {
                continue;
            };

            reports.push(ConflictReport::new(
                ConflictKind::StaleWip,
                severity,
                format!("{} has been WIP for {} days without an update", agent.name, days),
                vec![agent.canonical_id],
            ));
        }

        Ok(reports)
    }
}

/// Memoized entity lookups that tolerate missing endpoints
struct Lookup<'a, S: GraphStore + ?Sized> {
    store: &'a S,
    cache: HashMap<EntityId, Option<Entity>>,
}

impl<'a, S: GraphStore + ?Sized> Lookup<'a, S> {
    fn new(store: &'a S) -> Self {
        Self {
            store,
            cache: HashMap::new(),
        }
    }

    fn get(&mut self, id: EntityId) -> StorageResult<Option<&Entity>> {
        if !self.cache.contains_key(&id) {
            let entity = self.store.get_entity_by_id(id)?;
            if entity.is_none() {
                debug!("entity {} referenced by an edge is missing", id);
            }
            self.cache.insert(id, entity);
        }
        Ok(self.cache.get(&id).and_then(Option::as_ref))
    }

    /// Canonical ID, or `unknown:{id}`
    fn label(&mut self, id: EntityId) -> StorageResult<String> {
        Ok(self
            .get(id)?
            .map(|e| e.canonical_id.clone())
            .unwrap_or_else(|| format!("unknown:{}", id)))
    }

    /// Display name, or `unknown:{id}`
    fn name(&mut self, id: EntityId) -> StorageResult<String> {
        Ok(self
            .get(id)?
            .map(|e| e.name.clone())
            .unwrap_or_else(|| format!("unknown:{}", id)))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Three-color DFS with an explicit stack.
///
/// A gray target closes a cycle made of the stack from that node upward.
/// Cycles are deduplicated by their sorted node set.
fn find_cycles(adjacency: &BTreeMap<EntityId, Vec<EntityId>>) -> Vec<Vec<EntityId>> {
    let mut color: HashMap<EntityId, Color> =
        adjacency.keys().map(|&id| (id, Color::White)).collect();
    let mut seen: HashSet<Vec<EntityId>> = HashSet::new();
    let mut cycles = Vec::new();

    for &start in adjacency.keys() {
        if color.get(&start) != Some(&Color::White) {
            continue;
        }

        // (node, index of the next neighbor to visit)
        let mut stack: Vec<(EntityId, usize)> = vec![(start, 0)];
        color.insert(start, Color::Gray);

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let next = adjacency.get(&node).and_then(|n| n.get(frame.1)).copied();
            frame.1 += 1;

            let Some(next) = next else {
                color.insert(node, Color::Black);
                stack.pop();
                continue;
            };

            match color.get(&next).copied().unwrap_or(Color::White) {
                Color::White => {
                    color.insert(next, Color::Gray);
                    stack.push((next, 0));
                }
                Color::Gray => {
                    let Some(pos) = stack.iter().position(|&(id, _)| id == next) else {
                        continue;
                    };
                    let cycle: Vec<EntityId> = stack[pos..].iter().map(|&(id, _)| id).collect();
                    let key: BTreeSet<EntityId> = cycle.iter().copied().collect();
                    if seen.insert(key.into_iter().collect()) {
                        cycles.push(cycle);
                    }
                }
                Color::Black => {}
            }
        }
    }

    cycles
}
