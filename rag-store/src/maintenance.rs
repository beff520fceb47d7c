//! Idempotent maintenance plans over a scan of the collection.
//!
//! The planners are pure: they take the scanned points and return what must
//! change. Running a plan against a collection already in the target state
//! yields an empty plan.

use std::collections::HashMap;

use qdrant_client::qdrant::FieldType;

use crate::filters::{CATEGORY_FIELD, TEXT_FIELD};
use crate::record::{ChunkRow, PointKey, StoredPoint};

/// Payload indexes every collection is expected to carry.
pub const REQUIRED_INDEXES: &[(&str, FieldType)] = &[
    (TEXT_FIELD, FieldType::Text),
    ("doc_id", FieldType::Keyword),
    (CATEGORY_FIELD, FieldType::Keyword),
];

/// Content identity of a chunk: `(doc_id, ord, text)`.
fn dedup_key(row: &ChunkRow) -> blake3::Hash {
    let mut h = blake3::Hasher::new();
    h.update(row.doc_id.as_bytes());
    h.update(&[0]);
    h.update(&row.ord.to_le_bytes());
    h.update(&[0]);
    h.update(row.text.as_bytes());
    h.finalize()
}

/// Points to delete so that each `(doc_id, ord, text)` group keeps only its lowest key.
///
/// Returned keys are sorted.
pub fn plan_duplicates(points: &[StoredPoint]) -> Vec<PointKey> {
    let mut keep: HashMap<blake3::Hash, &PointKey> = HashMap::new();
    let mut drop = Vec::new();

    for p in points {
        let Some(row) = &p.row else { continue };
        match keep.entry(dedup_key(row)) {
            std::collections::hash_map::Entry::Vacant(v) => {
                v.insert(&p.key);
            }
            std::collections::hash_map::Entry::Occupied(mut o) => {
                if p.key < **o.get() {
                    drop.push((*o.get()).clone());
                    o.insert(&p.key);
                } else {
                    drop.push(p.key.clone());
                }
            }
        }
    }

    drop.sort();
    drop.dedup();
    drop
}

/// Points whose payload cannot be mapped to a chunk, or whose text is blank.
pub fn plan_invalid(points: &[StoredPoint]) -> Vec<PointKey> {
    let mut out = points
        .iter()
        .filter(|p| match &p.row {
            None => true,
            Some(row) => row.text.trim().is_empty(),
        })
        .map(|p| p.key.clone())
        .collect::<Vec<_>>();
    out.sort();
    out
}

/// Required indexes absent from `existing`.
pub fn plan_missing_indexes(existing: &[String]) -> Vec<(&'static str, FieldType)> {
    REQUIRED_INDEXES
        .iter()
        .filter(|(field, _)| !existing.iter().any(|e| e == field))
        .copied()
        .collect()
}
