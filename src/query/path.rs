//! Bounded path enumeration

use crate::graph::{Entity, EntityId};
use crate::storage::{GraphStore, StorageResult};
use std::collections::{HashMap, VecDeque};

/// Hard upper bound on path length in edges
pub const MAX_PATH_DEPTH: usize = 10;

/// Hard upper bound on the number of paths returned
pub const MAX_PATH_COUNT: usize = 1000;

/// Number of paths returned when the caller does not say
pub const DEFAULT_MAX_PATHS: usize = 25;

/// Query for enumerating simple paths between two entities
///
/// Paths follow outgoing edges of any relation type. Expansion is
/// breadth-first, so shorter paths are found first; which paths survive
/// the `max_paths` cap among equal-length candidates follows discovery
/// order and is otherwise unspecified.
#[derive(Debug, Clone)]
pub struct PathQuery {
    /// Source entity ID
    pub from: EntityId,
    /// Target entity ID
    pub to: EntityId,
    /// Maximum path length in edges, clamped to `[1, 10]`; zero means no result
    pub max_depth: usize,
    /// Maximum number of paths, clamped to `[1, 1000]`
    pub max_paths: usize,
}

impl PathQuery {
    /// Create a new path query between two entities
    pub fn between(from: EntityId, to: EntityId) -> Self {
        Self {
            from,
            to,
            max_depth: MAX_PATH_DEPTH,
            max_paths: DEFAULT_MAX_PATHS,
        }
    }

    /// Set maximum path length
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set maximum number of paths
    pub fn max_paths(mut self, max_paths: usize) -> Self {
        self.max_paths = max_paths;
        self
    }

    /// Execute the query against a store.
    ///
    /// Returns `None` when either endpoint is missing, when `max_depth` is
    /// zero, or when no path exists within bounds. A query from an entity to
    /// itself yields the single trivial path `[[from]]`.
    pub fn execute<S: GraphStore + ?Sized>(
        &self,
        store: &S,
    ) -> StorageResult<Option<Vec<Vec<Entity>>>> {
        if self.max_depth < 1 {
            return Ok(None);
        }
        let max_depth = self.max_depth.min(MAX_PATH_DEPTH);
        let max_paths = self.max_paths.clamp(1, MAX_PATH_COUNT);

        let Some(from) = store.get_entity_by_id(self.from)? else {
            return Ok(None);
        };
        if self.from == self.to {
            return Ok(Some(vec![vec![from]]));
        }
        if store.get_entity_by_id(self.to)?.is_none() {
            return Ok(None);
        }

        let mut entities: HashMap<EntityId, Entity> = HashMap::new();
        let mut adjacency: HashMap<EntityId, Vec<EntityId>> = HashMap::new();
        entities.insert(from.id, from);

        let mut found: Vec<Vec<EntityId>> = Vec::new();
        let mut queue: VecDeque<Vec<EntityId>> = VecDeque::new();
        queue.push_back(vec![self.from]);

        'search: while let Some(path) = queue.pop_front() {
            // Edges in the path so far
            if path.len() > max_depth {
                continue;
            }
            let Some(&last) = path.last() else {
                continue;
            };

            if !adjacency.contains_key(&last) {
                let neighbors = store.get_neighbors(last, None)?;
                let ids = neighbors.iter().map(|e| e.id).collect();
                for neighbor in neighbors {
                    entities.entry(neighbor.id).or_insert(neighbor);
                }
                adjacency.insert(last, ids);
            }

            for &next in &adjacency[&last] {
                if path.contains(&next) {
                    continue;
                }

                let mut extended = path.clone();
                extended.push(next);

                if next == self.to {
                    found.push(extended);
                    if found.len() >= max_paths {
                        break 'search;
                    }
                } else if extended.len() <= max_depth {
                    queue.push_back(extended);
                }
            }
        }

        if found.is_empty() {
            return Ok(None);
        }

        let paths = found
            .into_iter()
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| entities.get(id).cloned())
                    .collect()
            })
            .collect();

        Ok(Some(paths))
    }
}
