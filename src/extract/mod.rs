//! Entity extraction from plan folders
//!
//! A plan folder is a directory whose name starts with a four-digit plan ID
//! (`0042-search-rework/`). It holds one plan document and an `agents/`
//! directory with one markdown file per agent task:
//!
//! ```text
//! 0042-search-rework/
//!   0042-search-rework-plan.md
//!   agents/
//!     000-index-schema.md
//!     001-query-parser.md
//! ```
//!
//! [`extract_plan`] reads such a folder into an [`ExtractionResult`]. It is a
//! pure function of the files on disk: nothing is persisted, and every
//! problem with the input becomes a warning rather than an error.

mod builder;
mod frontmatter;
mod markdown;
mod plan;
mod refs;

pub use plan::extract_plan;

pub(crate) use builder::{is_placeholder, PLACEHOLDER_KEY};

use crate::graph::{CanonicalRef, Metadata, NewEntity, RelationType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A relationship whose endpoints are still canonical references.
///
/// Numeric IDs only exist once the endpoints are stored, so edges are
/// resolved during ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub source: CanonicalRef,
    pub target: CanonicalRef,
    pub relation_type: RelationType,
    pub confidence: f64,
    pub metadata: Metadata,
}

impl ExtractedRelationship {
    pub fn new(source: CanonicalRef, target: CanonicalRef, relation_type: RelationType) -> Self {
        Self {
            source,
            target,
            relation_type,
            confidence: 1.0,
            metadata: Metadata::new(),
        }
    }
}

/// Everything extracted from one plan folder
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionResult {
    /// Four-digit plan ID, `None` when the folder could not be resolved
    pub plan_id: Option<String>,
    /// Entities, unique by canonical ID
    pub entities: Vec<NewEntity>,
    /// Relationships, unique by edge key and free of self-loops
    pub relationships: Vec<ExtractedRelationship>,
    pub warnings: Vec<String>,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    pub fn entity(&self, reference: &CanonicalRef) -> Option<&NewEntity> {
        self.entities.iter().find(|e| &e.reference == reference)
    }

    /// Source files read during extraction, with their content hashes
    pub fn source_hashes(&self) -> BTreeMap<&str, &str> {
        self.entities
            .iter()
            .filter_map(|e| Some((e.source_path.as_deref()?, e.content_hash.as_deref()?)))
            .collect()
    }
}
