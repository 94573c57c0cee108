//! Core graph data structures

mod canonical;
mod entity;
mod relationship;


pub use canonical::{is_valid_tag, normalize_tag, CanonicalRef, EntityType, ParseTypeError};
pub use entity::{Entity, EntityId, Metadata, NewEntity};
pub use relationship::{NewRelationship, RelationType, Relationship};

/// Metadata value recorded for work in progress.
pub const STATUS_WIP: &str = "WIP";
