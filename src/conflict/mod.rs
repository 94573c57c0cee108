//! Workflow hazard detection
//!
//! Four independent heuristics read the graph and produce [`ConflictReport`]s:
//! contended files, overlapping features, circular dependencies and stale
//! work in progress.

mod detector;
mod types;

pub use detector::ConflictDetector;
pub use types::{ConflictConfig, ConflictKind, ConflictReport, Severity};
