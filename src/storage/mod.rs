//! Storage backends for the planning graph
//!
//! All graph access goes through the `GraphStore` trait. The primary
//! implementation is `SqliteStore`, a single embedded database file.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{
    GraphStats, GraphStore, OpenStore, StorageError, StorageResult, MAX_SEARCH_LIMIT,
    META_LAST_INDEXED,
};
