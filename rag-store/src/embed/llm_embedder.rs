//! Embedding provider backed by the shared LLM service.

use std::sync::Arc;

use ai_llm_service::service_profiles::LlmServiceProfiles;
use futures::future::BoxFuture;
use tracing::warn;

use crate::{EmbeddingsProvider, RagError};

/// Embeds through the `embedding` profile and enforces the expected dimension.
#[derive(Clone)]
pub struct LlmEmbedder {
    svc: Arc<LlmServiceProfiles>,
    dim: usize,
}

impl LlmEmbedder {
    pub fn new(svc: Arc<LlmServiceProfiles>, dim: usize) -> Self {
        Self { svc, dim }
    }
}

impl EmbeddingsProvider for LlmEmbedder {
    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>, RagError>> {
        Box::pin(async move {
            let v = self
                .svc
                .embed(text)
                .await
                .map_err(|e| RagError::Embedding(e.to_string()))?;

            if v.len() != self.dim {
                warn!(got = v.len(), want = self.dim, "embedding dimension mismatch");
                return Err(RagError::VectorSizeMismatch {
                    got: v.len(),
                    want: self.dim,
                });
            }
            Ok(v)
        })
    }

    fn dim(&self) -> usize {
        self.dim
    }
}
