//! Record identifiers.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Compute the lowercase hex SHA-256 of chunk content. Identical content yields identical ids,
/// so re-ingesting a document overwrites rather than duplicates.
pub fn compute_record_id(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Qdrant only accepts integers or UUIDs as point ids; derive a stable UUIDv5 from the record id.
pub(crate) fn point_id_for(record_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, record_id.as_bytes())
}
