//! Retrieval facade over a Qdrant chunk collection.
//!
//! This crate exposes the two query primitives the answer engine needs:
//! - [`RagStore::search_vector`]: dense KNN, ordered by ascending distance
//! - [`RagStore::search_fulltext`]: text-match filter + BM25, ordered by descending score
//!
//! plus the collection checks and maintenance actions used by the ops loop
//! (dimension probe, payload-index repair, invalid-row purge, duplicate compaction).
//! Ingestion is handled elsewhere; chunks are expected to already be stored
//! with a `{chunk_id, doc_id, ord, page, text, category}` payload.

mod bm25;
mod config;
mod embed;
mod errors;
mod filters;
mod maintenance;
mod qdrant_facade;
mod record;

pub use bm25::{Bm25, tokenize};
pub use config::{DistanceKind, RagConfig};
pub use embed::{EmbeddingsProvider, llm_embedder::LlmEmbedder};
pub use errors::RagError;
pub use maintenance::{REQUIRED_INDEXES, plan_duplicates, plan_invalid, plan_missing_indexes};
pub use record::{ChunkRow, LexicalHit, PointKey, RagFilter, StoredPoint, VectorHit, clamp_snippet};

use tracing::{debug, info, trace};

/// High-level facade that wires configuration and Qdrant client.
///
/// This is the single entry point recommended for application code.
pub struct RagStore {
    cfg: RagConfig,
    client: qdrant_facade::QdrantFacade,
    bm25: Bm25,
}

impl RagStore {
    /// Constructs a new store from the given configuration.
    ///
    /// # Errors
    /// Returns `RagError::Config` / `RagError::Qdrant` if the client cannot be built.
    pub fn new(cfg: RagConfig) -> Result<Self, RagError> {
        trace!("RagStore::new collection={}", cfg.collection);
        let client = qdrant_facade::QdrantFacade::new(&cfg)?;
        Ok(Self {
            cfg,
            client,
            bm25: Bm25::default(),
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.cfg
    }

    /// Dense search. Hits are ordered by ascending distance; chunk id breaks ties.
    ///
    /// # Errors
    /// Returns `RagError::Qdrant` if search fails.
    pub async fn search_vector(
        &self,
        embedding: Vec<f32>,
        limit: usize,
        filter: &RagFilter,
    ) -> Result<Vec<VectorHit>, RagError> {
        trace!("RagStore::search_vector limit={limit}");
        let qfilter = filters::to_qdrant_filter(filter);
        let raw = self
            .client
            .search(embedding, limit as u64, qfilter, self.cfg.exact_search)
            .await?;

        let distance = self.client.distance();
        let mut hits = raw
            .into_iter()
            .filter_map(|(key, score, payload)| {
                let row = ChunkRow::from_payload(&key, &payload)?;
                Some(VectorHit {
                    row,
                    distance: distance.score_to_distance(score),
                })
            })
            .collect::<Vec<_>>();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.row.chunk_id.cmp(&b.row.chunk_id))
        });
        hits.truncate(limit);
        debug!(hits = hits.len(), "vector search done");
        Ok(hits)
    }

    /// Lexical search: chunks matching `keyword` scored with BM25.
    ///
    /// At most `lexical_scan_limit` matching chunks are scored. Hits are
    /// ordered by descending score; chunk id breaks ties.
    pub async fn search_fulltext(
        &self,
        keyword: &str,
        limit: usize,
        filter: &RagFilter,
    ) -> Result<Vec<LexicalHit>, RagError> {
        trace!("RagStore::search_fulltext limit={limit}");
        if keyword.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let qfilter = filters::text_match_filter(keyword, filter);
        let raw = self
            .client
            .scroll(
                Some(qfilter),
                self.cfg.scroll_page,
                Some(self.cfg.lexical_scan_limit),
            )
            .await?;

        let rows = raw
            .into_iter()
            .filter_map(|(key, payload)| ChunkRow::from_payload(&key, &payload))
            .collect::<Vec<_>>();
        let hits = rank_lexical(&self.bm25, keyword, rows, limit);
        debug!(hits = hits.len(), "lexical search done");
        Ok(hits)
    }

    /// Vector size configured on the collection, if it can be determined.
    pub async fn vector_size(&self) -> Result<Option<usize>, RagError> {
        Ok(self.client.vector_size().await?.map(|s| s as usize))
    }

    /// Fails with [`RagError::VectorSizeMismatch`] if the collection size differs from `dim`.
    pub async fn verify_dimension(&self, dim: usize) -> Result<(), RagError> {
        match self.vector_size().await? {
            Some(size) if size != dim => Err(RagError::VectorSizeMismatch {
                got: dim,
                want: size,
            }),
            Some(_) => Ok(()),
            None => Err(RagError::Config(format!(
                "cannot determine vector size of collection '{}'",
                self.cfg.collection
            ))),
        }
    }

    /// Every point in the collection, with its mapped row when the payload is valid.
    pub async fn scan_points(&self) -> Result<Vec<StoredPoint>, RagError> {
        let raw = self.client.scroll(None, self.cfg.scroll_page, None).await?;
        Ok(raw
            .into_iter()
            .map(|(key, payload)| StoredPoint {
                row: ChunkRow::from_payload(&key, &payload),
                key,
            })
            .collect())
    }

    /// Creates required payload indexes that are missing; returns how many were created.
    pub async fn ensure_indexes(&self) -> Result<usize, RagError> {
        let existing = self.client.indexed_fields().await?;
        let missing = plan_missing_indexes(&existing);
        for (field, kind) in &missing {
            self.client.create_field_index(field, *kind).await?;
        }
        info!(created = missing.len(), "payload indexes checked");
        Ok(missing.len())
    }

    /// Deletes points that cannot serve as chunks; returns the deleted count.
    pub async fn purge_invalid(&self) -> Result<usize, RagError> {
        let points = self.scan_points().await?;
        let plan = plan_invalid(&points);
        let n = self.client.delete_points(&plan).await?;
        info!(scanned = points.len(), deleted = n, "invalid rows purged");
        Ok(n)
    }

    /// Removes duplicate `(doc_id, ord, text)` chunks keeping the lowest id; returns the deleted count.
    pub async fn compact_duplicates(&self) -> Result<usize, RagError> {
        let points = self.scan_points().await?;
        let plan = plan_duplicates(&points);
        let n = self.client.delete_points(&plan).await?;
        info!(scanned = points.len(), deleted = n, "duplicate chunks compacted");
        Ok(n)
    }
}

/// BM25-ranks `rows` for `keyword`, keeping the best `limit`.
fn rank_lexical(bm25: &Bm25, keyword: &str, rows: Vec<ChunkRow>, limit: usize) -> Vec<LexicalHit> {
    let scores = {
        let texts = rows.iter().map(|r| r.text.as_str()).collect::<Vec<_>>();
        bm25.score_all(keyword, &texts)
    };

    let mut hits = rows
        .into_iter()
        .zip(scores)
        .map(|(row, s)| LexicalHit {
            row,
            bm25: s as f32,
        })
        .collect::<Vec<_>>();

    hits.sort_by(|a, b| {
        b.bm25
            .total_cmp(&a.bm25)
            .then_with(|| a.row.chunk_id.cmp(&b.row.chunk_id))
    });
    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, text: &str) -> ChunkRow {
        ChunkRow {
            chunk_id: id.into(),
            doc_id: "d".into(),
            ord: 0,
            page: None,
            text: text.into(),
            category: None,
        }
    }

    #[test]
    fn lexical_ranking_is_descending_and_truncated() {
        let rows = vec![
            row("c", "retention"),
            row("a", "retention retention"),
            row("b", "retention"),
            row("z", "nothing relevant"),
        ];
        let hits = rank_lexical(&Bm25::default(), "retention", rows, 3);
        let ids = hits.iter().map(|h| h.row.chunk_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids[0], "a");
        // Equal scores fall back to chunk id order.
        assert_eq!(&ids[1..], &["b", "c"]);
        assert!(hits.windows(2).all(|w| w[0].bm25 >= w[1].bm25));
    }
}
