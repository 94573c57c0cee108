//! Content hashing for change detection
//!
//! A reindex driver hashes each source file and calls [`has_changed`] to
//! decide whether the plan needs to be extracted again.

use crate::storage::{GraphStore, StorageResult};
use sha2::{Digest, Sha256};

/// SHA-256 of the content as lowercase hex
pub fn compute_content_hash(content: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_ref());
    hex::encode(hasher.finalize())
}

/// True when nothing is stored for `source_path` yet, or when any entity
/// rooted there has a missing or different content hash.
pub fn has_changed<S: GraphStore + ?Sized>(
    store: &S,
    source_path: &str,
    current_hash: &str,
) -> StorageResult<bool> {
    let entities = store.entities_by_source(source_path)?;
    if entities.is_empty() {
        return Ok(true);
    }

    Ok(entities
        .iter()
        .any(|e| e.content_hash.as_deref() != Some(current_hash)))
}
