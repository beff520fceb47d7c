//! Typed error for the contextor crate.
//!
//! Only failures that leave the engine unable to retrieve at all are
//! represented here. Lexical, reranker and template problems are absorbed
//! by the pipeline and never reach the caller.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextorError {
    /// The query embedding could not be produced.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The primary (vector) retrieval signal is unavailable.
    #[error("vector search failed: {0}")]
    VectorSearch(String),

    /// A stage exceeded its time budget.
    #[error("{stage} timed out after {}ms", after.as_millis())]
    Timeout {
        stage: &'static str,
        after: Duration,
    },

    /// The generation backend failed before producing an answer.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Cross-encoder scoring failed. Never surfaced by the engine.
    #[error("rerank failed: {0}")]
    Rerank(String),

    /// Rejected request (e.g. blank query text).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Invalid or inconsistent configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Errors from the underlying rag-store crate.
    #[error("RAG error: {0}")]
    Rag(#[from] rag_store::RagError),
}

impl ContextorError {
    /// `true` for failures a caller may retry as-is: the retrieval or
    /// generation backends were unreachable or too slow.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ContextorError::Embedding(_)
                | ContextorError::VectorSearch(_)
                | ContextorError::Timeout { .. }
                | ContextorError::Generation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ContextorError::VectorSearch("down".into()).is_retryable());
        assert!(
            ContextorError::Timeout {
                stage: "vector",
                after: Duration::from_millis(5)
            }
            .is_retryable()
        );
        assert!(!ContextorError::InvalidQuery("empty".into()).is_retryable());
        assert!(!ContextorError::Config("bad".into()).is_retryable());
    }

    #[test]
    fn timeout_message_names_stage() {
        let e = ContextorError::Timeout {
            stage: "embed",
            after: Duration::from_millis(1500),
        };
        assert_eq!(e.to_string(), "embed timed out after 1500ms");
    }
}
