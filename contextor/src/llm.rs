//! Engine seams implemented over the shared LLM service.
//!
//! [`LlmGenerator`] drives the `primary` profile (batch and streaming),
//! [`CrossEncoderScorer`] the optional cross-encoder profile.

use std::sync::Arc;

use ai_llm_service::AiLlmError;
use ai_llm_service::service_profiles::LlmServiceProfiles;
use futures::future::BoxFuture;
use futures::stream::StreamExt;

use crate::error::ContextorError;
use crate::rerank::PairScorer;
use crate::synth::{GenStream, Generator};

/// Generation backend over the **primary** profile.
#[derive(Clone)]
pub struct LlmGenerator {
    svc: Arc<LlmServiceProfiles>,
    model: String,
}

impl LlmGenerator {
    pub fn new(svc: Arc<LlmServiceProfiles>) -> Self {
        let model = svc.profiles().0.model.clone();
        Self { svc, model }
    }
}

fn generation_error(e: AiLlmError) -> ContextorError {
    ContextorError::Generation(e.to_string())
}

impl Generator for LlmGenerator {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
        system: &'a str,
    ) -> BoxFuture<'a, Result<String, ContextorError>> {
        Box::pin(async move {
            self.svc
                .generate_primary(prompt, Some(system))
                .await
                .map_err(generation_error)
        })
    }

    fn generate_stream<'a>(
        &'a self,
        prompt: &'a str,
        system: &'a str,
    ) -> BoxFuture<'a, Result<GenStream, ContextorError>> {
        Box::pin(async move {
            let inner = self
                .svc
                .generate_stream_primary(prompt, Some(system))
                .await
                .map_err(generation_error)?;
            Ok(inner.map(|r| r.map_err(generation_error)).boxed())
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Pair scorer over the cross-encoder profile.
#[derive(Clone)]
pub struct CrossEncoderScorer {
    svc: Arc<LlmServiceProfiles>,
    model: String,
}

impl CrossEncoderScorer {
    /// Returns `None` when no cross-encoder profile is configured.
    pub fn new(svc: Arc<LlmServiceProfiles>) -> Option<Self> {
        let model = svc.rerank_profile()?.model.clone();
        Some(Self { svc, model })
    }
}

impl PairScorer for CrossEncoderScorer {
    fn score_pairs<'a>(
        &'a self,
        query: &'a str,
        passages: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<f32>, ContextorError>> {
        Box::pin(async move {
            self.svc
                .score_pairs(query, passages)
                .await
                .map_err(|e| ContextorError::Rerank(e.to_string()))
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
