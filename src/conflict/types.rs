//! Conflict report and configuration types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which heuristic produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    FileContention,
    FeatureOverlap,
    CircularDependency,
    StaleWip,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::FileContention => "file_contention",
            ConflictKind::FeatureOverlap => "feature_overlap",
            ConflictKind::CircularDependency => "circular_dependency",
            ConflictKind::StaleWip => "stale_wip",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How seriously a report should be taken.
///
/// `Error` is meant to fail a check; `Warning` is informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single detected hazard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub kind: ConflictKind,
    pub severity: Severity,
    /// Human-readable description
    pub message: String,
    /// Canonical IDs of the entities involved; `unknown:{id}` when an
    /// endpoint could not be looked up
    pub entities: Vec<String>,
}

impl ConflictReport {
    pub fn new(
        kind: ConflictKind,
        severity: Severity,
        message: impl Into<String>,
        entities: Vec<String>,
    ) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            entities,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.kind, self.message)
    }
}

fn default_stale_warning_days() -> i64 {
    7
}

fn default_stale_error_days() -> i64 {
    14
}

fn default_overlap_threshold() -> f64 {
    0.85
}

/// Thresholds for the conflict heuristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictConfig {
    /// Days without an update before a WIP agent is a warning
    #[serde(default = "default_stale_warning_days")]
    pub stale_warning_days: i64,
    /// Days without an update before a WIP agent is an error
    #[serde(default = "default_stale_error_days")]
    pub stale_error_days: i64,
    /// Minimum SIMILAR_TO confidence reported as overlap
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: f64,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            stale_warning_days: default_stale_warning_days(),
            stale_error_days: default_stale_error_days(),
            overlap_threshold: default_overlap_threshold(),
        }
    }
}
