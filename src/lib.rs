//! Plangraph: Planning Knowledge Graph Engine
//!
//! Turns a tree of plan and agent markdown documents into a typed knowledge
//! graph stored in SQLite, and checks that graph for workflow hazards.
//!
//! # Core Concepts
//!
//! - **Entities**: plans, agents, features, files and tags, identified by
//!   stable canonical IDs such as `plan:0042` or `agent:0042#003`
//! - **Relationships**: typed, directed edges (CONTAINS, DEPENDS_ON, MODIFIES, ...)
//! - **Extraction**: a pure pass over one plan folder producing entities and edges
//! - **Conflicts**: contended files, overlapping features, dependency cycles
//!   and stale work in progress
//!
//! # Example
//!
//! ```
//! use plangraph::{ConflictDetector, GraphStore, OpenStore, SqliteStore};
//! use plangraph::{CanonicalRef, NewEntity};
//!
//! let store = SqliteStore::open_in_memory().unwrap();
//! store
//!     .upsert_entity(&NewEntity::new(CanonicalRef::plan("0001"), "First plan"))
//!     .unwrap();
//!
//! let reports = ConflictDetector::new(&store).detect_all().unwrap();
//! assert!(reports.is_empty());
//! ```

pub mod change;
pub mod conflict;
pub mod extract;
pub mod graph;
pub mod ingest;
pub mod query;
pub mod storage;

pub use change::{compute_content_hash, has_changed};
pub use conflict::{ConflictConfig, ConflictDetector, ConflictKind, ConflictReport, Severity};
pub use extract::{extract_plan, ExtractedRelationship, ExtractionResult};
pub use graph::{
    CanonicalRef, Entity, EntityId, EntityType, Metadata, NewEntity, NewRelationship,
    RelationType, Relationship,
};
pub use ingest::{ingest_batch, ingest_extraction, needs_ingest, prune_missing_sources, IngestSummary};
pub use query::PathQuery;
pub use storage::{GraphStats, GraphStore, OpenStore, SqliteStore, StorageError, StorageResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
