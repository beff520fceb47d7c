//! Candidate source adapters: vector and lexical lists fetched concurrently.
//!
//! The vector list is the primary signal; its failure or timeout fails the
//! request. The lexical list is an enhancement: failure or timeout degrades
//! the request to pure-vector mode with a warning.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use rag_store::{LexicalHit, RagError, RagFilter, RagStore, VectorHit};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::api_types::RetrievalMode;
use crate::error::ContextorError;

/// Dense KNN primitive. Hits are ordered by ascending distance.
pub trait VectorSource: Send + Sync {
    fn search_vector<'a>(
        &'a self,
        embedding: Vec<f32>,
        limit: usize,
        filter: &'a RagFilter,
    ) -> BoxFuture<'a, Result<Vec<VectorHit>, RagError>>;
}

/// Full-text primitive. Hits are ordered by descending BM25 score.
pub trait LexicalSource: Send + Sync {
    fn search_fulltext<'a>(
        &'a self,
        keyword: &'a str,
        limit: usize,
        filter: &'a RagFilter,
    ) -> BoxFuture<'a, Result<Vec<LexicalHit>, RagError>>;
}

impl VectorSource for RagStore {
    fn search_vector<'a>(
        &'a self,
        embedding: Vec<f32>,
        limit: usize,
        filter: &'a RagFilter,
    ) -> BoxFuture<'a, Result<Vec<VectorHit>, RagError>> {
        Box::pin(RagStore::search_vector(self, embedding, limit, filter))
    }
}

impl LexicalSource for RagStore {
    fn search_fulltext<'a>(
        &'a self,
        keyword: &'a str,
        limit: usize,
        filter: &'a RagFilter,
    ) -> BoxFuture<'a, Result<Vec<LexicalHit>, RagError>> {
        Box::pin(RagStore::search_fulltext(self, keyword, limit, filter))
    }
}

/// Pool sizes and per-call budgets for one fetch.
#[derive(Clone, Copy, Debug)]
pub struct SourceLimits {
    pub vec_candidates: usize,
    pub ft_candidates: usize,
    pub vector_timeout: Duration,
    pub lexical_timeout: Duration,
}

/// Raw ranked lists of one request.
#[derive(Clone, Debug, Default)]
pub struct SourceLists {
    pub vector: Vec<VectorHit>,
    /// `None` in pure-vector mode or after lexical degradation.
    pub lexical: Option<Vec<LexicalHit>>,
    /// `true` when a keyword was supplied but the lexical call failed.
    pub lexical_degraded: bool,
}

/// Runs both primitives concurrently. The lexical source is not called in
/// pure-vector mode.
///
/// # Errors
/// [`ContextorError::VectorSearch`] or [`ContextorError::Timeout`] when the
/// vector call fails; lexical problems never produce an error.
pub async fn gather_candidates(
    vector: &Arc<dyn VectorSource>,
    lexical: &Arc<dyn LexicalSource>,
    embedding: Vec<f32>,
    mode: &RetrievalMode,
    filter: &RagFilter,
    limits: SourceLimits,
) -> Result<SourceLists, ContextorError> {
    let vec_fut = timeout(
        limits.vector_timeout,
        vector.search_vector(embedding, limits.vec_candidates, filter),
    );

    let lex_fut = async {
        match mode {
            RetrievalMode::PureVector => None,
            RetrievalMode::Hybrid { keyword } => Some(
                timeout(
                    limits.lexical_timeout,
                    lexical.search_fulltext(keyword, limits.ft_candidates, filter),
                )
                .await,
            ),
        }
    };

    let (vec_res, lex_res) = tokio::join!(vec_fut, lex_fut);

    let vector = match vec_res {
        Ok(Ok(hits)) => hits,
        Ok(Err(e)) => return Err(ContextorError::VectorSearch(e.to_string())),
        Err(_) => {
            return Err(ContextorError::Timeout {
                stage: "vector",
                after: limits.vector_timeout,
            });
        }
    };

    let (lexical, lexical_degraded) = match lex_res {
        None => (None, false),
        Some(Ok(Ok(hits))) => (Some(hits), false),
        Some(Ok(Err(e))) => {
            warn!(error = %e, "lexical search failed, continuing in pure-vector mode");
            (None, true)
        }
        Some(Err(_)) => {
            warn!(
                timeout_ms = limits.lexical_timeout.as_millis() as u64,
                "lexical search timed out, continuing in pure-vector mode"
            );
            (None, true)
        }
    };

    debug!(
        vector = vector.len(),
        lexical = lexical.as_ref().map(Vec::len),
        lexical_degraded,
        "candidate lists gathered"
    );

    Ok(SourceLists {
        vector,
        lexical,
        lexical_degraded,
    })
}
