//! Directed, typed relationships between entities

use super::canonical::ParseTypeError;
use super::entity::{EntityId, Metadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Relationship kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    Contains,
    DependsOn,
    Modifies,
    Implements,
    /// Produced by an external similarity pass; `confidence` carries the score
    SimilarTo,
    Blocks,
    TaggedWith,
}

impl RelationType {
    pub const ALL: [RelationType; 7] = [
        RelationType::Contains,
        RelationType::DependsOn,
        RelationType::Modifies,
        RelationType::Implements,
        RelationType::SimilarTo,
        RelationType::Blocks,
        RelationType::TaggedWith,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Contains => "CONTAINS",
            RelationType::DependsOn => "DEPENDS_ON",
            RelationType::Modifies => "MODIFIES",
            RelationType::Implements => "IMPLEMENTS",
            RelationType::SimilarTo => "SIMILAR_TO",
            RelationType::Blocks => "BLOCKS",
            RelationType::TaggedWith => "TAGGED_WITH",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RelationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseTypeError {
                kind: "relation type",
                value: s.to_string(),
            })
    }
}

/// Relationship data to be written to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRelationship {
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub relation_type: RelationType,
    pub confidence: f64,
    pub metadata: Metadata,
}

impl NewRelationship {
    pub fn new(source_id: EntityId, target_id: EntityId, relation_type: RelationType) -> Self {
        Self {
            source_id,
            target_id,
            relation_type,
            confidence: 1.0,
            metadata: Metadata::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_self_loop(&self) -> bool {
        self.source_id == self.target_id
    }
}

/// A stored relationship, unique on `(source_id, target_id, relation_type)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: i64,
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub relation_type: RelationType,
    pub confidence: f64,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}
