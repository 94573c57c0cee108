//! Typed canonical identities
//!
//! Every entity carries a canonical ID of the form `type:value` that stays
//! stable across rebuilds. Callers build [`CanonicalRef`] values directly;
//! parsing raw strings only happens where untyped IDs cross the storage
//! boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of entity stored in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Plan,
    Agent,
    Feature,
    File,
    Tag,
    Concept,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        EntityType::Plan,
        EntityType::Agent,
        EntityType::Feature,
        EntityType::File,
        EntityType::Tag,
        EntityType::Concept,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Plan => "plan",
            EntityType::Agent => "agent",
            EntityType::Feature => "feature",
            EntityType::File => "file",
            EntityType::Tag => "tag",
            EntityType::Concept => "concept",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a known type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseTypeError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for EntityType {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseTypeError {
                kind: "entity type",
                value: s.to_string(),
            })
    }
}

/// A `type:value` reference to an entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalRef {
    pub entity_type: EntityType,
    pub value: String,
}

impl CanonicalRef {
    pub fn new(entity_type: EntityType, value: impl Into<String>) -> Self {
        Self {
            entity_type,
            value: value.into(),
        }
    }

    /// `plan:{plan_id}`
    pub fn plan(plan_id: &str) -> Self {
        Self::new(EntityType::Plan, plan_id)
    }

    /// `agent:{plan_id}#{number}`
    pub fn agent(plan_id: &str, number: &str) -> Self {
        Self::new(EntityType::Agent, format!("{}#{}", plan_id, number))
    }

    /// `feature:{plan_id}#{number}`
    pub fn feature(plan_id: &str, number: u32) -> Self {
        Self::new(EntityType::Feature, format!("{}#{}", plan_id, number))
    }

    /// `file:{path}` with a leading `./` removed
    pub fn file(path: &str) -> Self {
        let path = path.trim();
        let path = path.strip_prefix("./").unwrap_or(path);
        Self::new(EntityType::File, path)
    }

    /// `tag:{normalized}`, or `None` when the name is not a valid tag
    pub fn tag(name: &str) -> Option<Self> {
        normalize_tag(name).map(|tag| Self::new(EntityType::Tag, tag))
    }

    /// Parse a raw `type:value` string.
    ///
    /// Returns `None` unless the prefix names a known entity type and the
    /// value is non-empty.
    pub fn parse(raw: &str) -> Option<Self> {
        let (prefix, value) = raw.split_once(':')?;
        let entity_type = prefix.parse().ok()?;
        if value.is_empty() {
            return None;
        }
        Some(Self::new(entity_type, value))
    }

    /// Type implied by the prefix of a raw canonical ID, if recognized
    pub fn infer_type(raw: &str) -> Option<EntityType> {
        raw.split_once(':').and_then(|(prefix, _)| prefix.parse().ok())
    }
}

impl fmt::Display for CanonicalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.value)
    }
}

impl Serialize for CanonicalRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CanonicalRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        CanonicalRef::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid canonical id: {}", raw)))
    }
}

/// Lowercase, trim and strip one leading `#`; `None` if the result is not a valid tag
pub fn normalize_tag(name: &str) -> Option<String> {
    let tag = name.trim().to_lowercase();
    let tag = tag.strip_prefix('#').unwrap_or(&tag);
    is_valid_tag(tag).then(|| tag.to_string())
}

/// `[a-z][\w-]*`
pub fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
