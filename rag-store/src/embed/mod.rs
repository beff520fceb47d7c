//! Query embedding seam.

use futures::future::BoxFuture;

use crate::errors::RagError;

/// Provider interface for embedding generation.
///
/// Async is required because real providers (Ollama, OpenAI, etc.) perform
/// HTTP requests.
pub trait EmbeddingsProvider: Send + Sync {
    /// Embeds `text` into a fixed-dimension vector.
    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>, RagError>>;

    /// Dimension every returned vector has.
    fn dim(&self) -> usize;
}

pub mod llm_embedder;
