//! Query algorithms over a `GraphStore`
//!
//! Traversal is backend-independent: it only needs entity lookup and
//! outgoing neighbors, so any store gets bounded path search for free.

mod path;

pub use path::{PathQuery, DEFAULT_MAX_PATHS, MAX_PATH_COUNT, MAX_PATH_DEPTH};
