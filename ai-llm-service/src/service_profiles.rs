//! Shared LLM service: a `primary` generation profile, an `embedding`
//! profile and an optional `rerank` cross-encoder.
//!
//! - Lives in the same Tokio runtime as the application.
//! - Construct once, wrap in `Arc`, and pass clones to dependents.
//! - Caches underlying HTTP clients per config (endpoint+model+key+timeout).
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use ai_llm_service::service_profiles::LlmServiceProfiles;
//! use ai_llm_service::config::default_config::{config_embedding, config_primary};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let svc = Arc::new(LlmServiceProfiles::new(
//!         config_primary()?,
//!         config_embedding()?,
//!         None,
//!         Some(10),
//!     )?);
//!
//!     let txt = svc.generate_primary("Hello world", None).await?;
//!     println!("PRIMARY: {}", txt);
//!
//!     let emb = svc.embed("Ferris").await?;
//!     println!("Embedding dim = {}", emb.len());
//!     Ok(())
//! }
//! ```

use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    config::{
        llm_model_config::LlmModelConfig, llm_provider::LlmProvider,
        rerank_model_config::RerankModelConfig,
    },
    error_handler::{AiLlmError, ConfigError},
    health_service::{BackendRole, HealthService, HealthStatus},
    services::{
        cross_encoder_service::CrossEncoderService, ollama_service::OllamaService,
        open_ai_service::OpenAiService,
    },
    stream::FragmentStream,
};

/// Shared service that manages the **primary**, **embedding** and optional
/// **rerank** profiles.
pub struct LlmServiceProfiles {
    primary: LlmModelConfig,
    embedding: LlmModelConfig,
    rerank: Option<(RerankModelConfig, Arc<CrossEncoderService>)>,

    ollama: RwLock<HashMap<ClientKey, Arc<OllamaService>>>,
    openai: RwLock<HashMap<ClientKey, Arc<OpenAiService>>>,

    health: HealthService,
}

impl LlmServiceProfiles {
    /// Creates a new service.
    ///
    /// - `primary`: answer synthesis profile.
    /// - `embedding`: required embedding profile.
    /// - `rerank_opt`: optional cross-encoder.
    /// - `health_timeout_secs`: optional timeout for the health checker.
    pub fn new(
        primary: LlmModelConfig,
        embedding: LlmModelConfig,
        rerank_opt: Option<RerankModelConfig>,
        health_timeout_secs: Option<u64>,
    ) -> Result<Self, AiLlmError> {
        if primary.model.trim().is_empty() || embedding.model.trim().is_empty() {
            return Err(ConfigError::EmptyModel.into());
        }
        let rerank = match rerank_opt {
            Some(cfg) => {
                let svc = Arc::new(CrossEncoderService::new(cfg.clone())?);
                Some((cfg, svc))
            }
            None => None,
        };

        Ok(Self {
            primary,
            embedding,
            rerank,
            ollama: RwLock::new(HashMap::new()),
            openai: RwLock::new(HashMap::new()),
            health: HealthService::new(health_timeout_secs)?,
        })
    }

    /// Generates text using the **primary** profile.
    ///
    /// # Errors
    /// Returns [`AiLlmError`] if generation fails.
    pub async fn generate_primary(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<String, AiLlmError> {
        self.generate_with(&self.primary, prompt, system).await
    }

    /// Starts a streamed generation on the **primary** profile.
    pub async fn generate_stream_primary(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<FragmentStream, AiLlmError> {
        match self.primary.provider {
            LlmProvider::Ollama => {
                let cli = self.get_or_init_ollama(&self.primary).await?;
                cli.generate_stream(prompt, system).await
            }
            LlmProvider::OpenAI => {
                let cli = self.get_or_init_openai(&self.primary).await?;
                cli.generate_stream(prompt, system).await
            }
        }
    }

    /// Computes embeddings using the **embedding** profile.
    pub async fn embed(&self, input: &str) -> Result<Vec<f32>, AiLlmError> {
        match self.embedding.provider {
            LlmProvider::Ollama => {
                let cli = self.get_or_init_ollama(&self.embedding).await?;
                cli.embeddings(input).await
            }
            LlmProvider::OpenAI => {
                let cli = self.get_or_init_openai(&self.embedding).await?;
                cli.embeddings(input).await
            }
        }
    }

    /// Scores `(query, passage)` pairs with the cross-encoder.
    ///
    /// # Errors
    /// [`ConfigError::MissingVar`] when no rerank profile was configured.
    pub async fn score_pairs(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, AiLlmError> {
        let (_, svc) = self
            .rerank
            .as_ref()
            .ok_or(ConfigError::MissingVar("RERANK_URL"))?;
        svc.score_pairs(query, passages).await
    }

    /// `true` when a cross-encoder profile is configured.
    pub fn has_reranker(&self) -> bool {
        self.rerank.is_some()
    }

    /// One probe per role; an embedding profile identical to the primary is
    /// probed once.
    pub async fn health_all(&self) -> Vec<HealthStatus> {
        let mut out = vec![self.health.check_model(BackendRole::Generation, &self.primary).await];
        if self.embedding != self.primary {
            out.push(self.health.check_model(BackendRole::Embedding, &self.embedding).await);
        }
        if let Some((cfg, _)) = &self.rerank {
            out.push(self.health.check_rerank(cfg).await);
        }
        out
    }

    /// Returns the `(primary, embedding)` profiles.
    pub fn profiles(&self) -> (&LlmModelConfig, &LlmModelConfig) {
        (&self.primary, &self.embedding)
    }

    /// Cross-encoder config, when present.
    pub fn rerank_profile(&self) -> Option<&RerankModelConfig> {
        self.rerank.as_ref().map(|(cfg, _)| cfg)
    }

    /* --------------------- Internals --------------------- */

    async fn generate_with(
        &self,
        cfg: &LlmModelConfig,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<String, AiLlmError> {
        match cfg.provider {
            LlmProvider::Ollama => {
                let cli = self.get_or_init_ollama(cfg).await?;
                cli.generate(prompt, system).await
            }
            LlmProvider::OpenAI => {
                let cli = self.get_or_init_openai(cfg).await?;
                cli.generate(prompt, system).await
            }
        }
    }

    async fn get_or_init_ollama(
        &self,
        cfg: &LlmModelConfig,
    ) -> Result<Arc<OllamaService>, AiLlmError> {
        let key = ClientKey::from(cfg);
        if let Some(cli) = self.ollama.read().await.get(&key).cloned() {
            return Ok(cli);
        }
        let mut w = self.ollama.write().await;
        if let Some(cli) = w.get(&key) {
            return Ok(cli.clone());
        }
        debug!(model = %cfg.model, "initializing Ollama client");
        let cli = Arc::new(OllamaService::new(cfg.clone())?);
        w.insert(key, cli.clone());
        Ok(cli)
    }

    async fn get_or_init_openai(
        &self,
        cfg: &LlmModelConfig,
    ) -> Result<Arc<OpenAiService>, AiLlmError> {
        let key = ClientKey::from(cfg);
        if let Some(cli) = self.openai.read().await.get(&key).cloned() {
            return Ok(cli);
        }
        let mut w = self.openai.write().await;
        if let Some(cli) = w.get(&key) {
            return Ok(cli.clone());
        }
        debug!(model = %cfg.model, "initializing OpenAI client");
        let cli = Arc::new(OpenAiService::new(cfg.clone())?);
        w.insert(key, cli.clone());
        Ok(cli)
    }
}

/// Internal cache key to identify unique client configs.
#[derive(Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    provider: LlmProvider,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout: Option<u64>,
}

impl From<&LlmModelConfig> for ClientKey {
    fn from(cfg: &LlmModelConfig) -> Self {
        Self {
            provider: cfg.provider,
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            api_key: cfg.api_key.clone(),
            timeout: cfg.timeout_secs,
        }
    }
}
