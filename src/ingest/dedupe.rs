use crate::segment::Chunk;
use std::collections::HashSet;

/// Remove chunks whose content already appeared earlier in the document, keeping the first
/// occurrence. Returns the kept chunks and the number skipped.
pub(crate) fn dedupe_chunks(chunks: Vec<Chunk>) -> (Vec<Chunk>, usize) {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(chunks.len());
    let mut skipped = 0;

    for chunk in chunks {
        if seen.insert(chunk.record_id()) {
            kept.push(chunk);
        } else {
            skipped += 1;
        }
    }

    (kept, skipped)
}
