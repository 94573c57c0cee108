//! Common test utilities for plangraph integration tests
//!
//! Builds plan folders on disk and opens fresh stores.

#![allow(dead_code)]

pub mod plan_tree;

pub use plan_tree::{agent_doc, PlanFolder, PlanTree};

use plangraph::{OpenStore, SqliteStore};

/// In-memory store with the full schema
pub fn create_test_store() -> SqliteStore {
    SqliteStore::open_in_memory().expect("open in-memory store")
}
