//! Lightweight Ollama service for text generation and embeddings.
//!
//! This module implements a thin client for the local Ollama API:
//! - `POST {endpoint}/api/generate`   : text generation (`stream=false` or NDJSON stream)
//! - `POST {endpoint}/api/embeddings` : embeddings retrieval
//!
//! # Examples
//!
//! ```no_run
//! use ai_llm_service::config::llm_model_config::LlmModelConfig;
//! use ai_llm_service::config::llm_provider::LlmProvider;
//! use ai_llm_service::services::ollama_service::OllamaService;
//! use futures::StreamExt;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = LlmModelConfig {
//!     provider: LlmProvider::Ollama,
//!     model: "qwen3:14b".into(),
//!     endpoint: "http://localhost:11434".into(),
//!     api_key: None,
//!     max_tokens: Some(256),
//!     temperature: Some(0.2),
//!     top_p: None,
//!     timeout_secs: Some(30),
//! };
//!
//! let svc = OllamaService::new(cfg)?;
//! let text = svc.generate("Summarize [Evidence #1].", Some("Cite evidence.")).await?;
//! println!("{text}");
//!
//! let mut stream = svc.generate_stream("Same, streamed.", None).await?;
//! while let Some(fragment) = stream.next().await {
//!     print!("{}", fragment?);
//! }
//! # Ok(()) }
//! ```

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::config::llm_model_config::LlmModelConfig;
use crate::config::llm_provider::LlmProvider;
use crate::error_handler::{
    AiLlmError, HttpError, Provider, ProviderError, ProviderErrorKind, check_provider_endpoint,
    make_snippet,
};
use crate::stream::{FragmentStream, line_stream, parse_ollama_line};

/// Thin client for Ollama.
///
/// Initialized with a full [`LlmModelConfig`]. Reuses an HTTP client with
/// a configurable timeout.
pub struct OllamaService {
    client: reqwest::Client,
    cfg: LlmModelConfig,
    url_generate: String,
    url_embeddings: String,
}

impl OllamaService {
    /// Creates a new [`OllamaService`] from the given config.
    ///
    /// # Errors
    /// - [`AiLlmError::Provider`] if `cfg.provider` is not `Ollama` or the endpoint is invalid
    /// - [`AiLlmError::HttpTransport`] if HTTP client cannot be built
    pub fn new(cfg: LlmModelConfig) -> Result<Self, AiLlmError> {
        if cfg.provider != LlmProvider::Ollama {
            return Err(
                ProviderError::new(Provider::Ollama, ProviderErrorKind::InvalidProvider).into(),
            );
        }
        let base = check_provider_endpoint(Provider::Ollama, &cfg.endpoint)?;

        let timeout = cfg
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(60));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;

        Ok(Self {
            client,
            url_generate: format!("{base}/api/generate"),
            url_embeddings: format!("{base}/api/embeddings"),
            cfg,
        })
    }

    /// Model identifier this client talks to.
    pub fn model(&self) -> &str {
        &self.cfg.model
    }

    /// Performs a **non-streaming** generation request via `/api/generate`.
    ///
    /// Mapped options:
    /// - `model`        ← `self.cfg.model`
    /// - `system`       ← argument
    /// - `num_predict`  ← `self.cfg.max_tokens`
    /// - `temperature`  ← `self.cfg.temperature`
    /// - `top_p`        ← `self.cfg.top_p`
    #[instrument(skip_all, fields(model = %self.cfg.model))]
    pub async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, AiLlmError> {
        let started = Instant::now();
        let body = GenerateRequest::from_cfg(&self.cfg, prompt, system, false);

        debug!(prompt_len = prompt.len(), "POST {}", self.url_generate);
        let resp = self
            .client
            .post(&self.url_generate)
            .json(&body)
            .send()
            .await?;
        let resp = self.ensure_success(resp, &self.url_generate, started).await?;

        let out: GenerateResponse = resp.json().await.map_err(|e| {
            ProviderError::new(
                Provider::Ollama,
                ProviderErrorKind::Decode(format!("serde error: {e}; ensure `stream=false` is used")),
            )
        })?;

        debug!(latency_ms = started.elapsed().as_millis(), "generation completed");
        Ok(out.response)
    }

    /// Starts a **streaming** generation request via `/api/generate` (`stream=true`).
    ///
    /// Resolves once response headers arrive; fragments are then pulled from
    /// the returned stream. Dropping the stream cancels generation.
    #[instrument(skip_all, fields(model = %self.cfg.model))]
    pub async fn generate_stream(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<FragmentStream, AiLlmError> {
        let started = Instant::now();
        let body = GenerateRequest::from_cfg(&self.cfg, prompt, system, true);

        debug!(prompt_len = prompt.len(), "POST {} (stream)", self.url_generate);
        let resp = self
            .client
            .post(&self.url_generate)
            .json(&body)
            .send()
            .await?;
        let resp = self.ensure_success(resp, &self.url_generate, started).await?;

        Ok(line_stream(resp, Provider::Ollama, parse_ollama_line))
    }

    /// Retrieves embeddings via `/api/embeddings`.
    #[instrument(skip_all, fields(model = %self.cfg.model))]
    pub async fn embeddings(&self, input: &str) -> Result<Vec<f32>, AiLlmError> {
        let started = Instant::now();
        let body = EmbeddingsRequest {
            model: &self.cfg.model,
            prompt: input,
        };

        debug!("POST {}", self.url_embeddings);
        let resp = self
            .client
            .post(&self.url_embeddings)
            .json(&body)
            .send()
            .await?;
        let resp = self.ensure_success(resp, &self.url_embeddings, started).await?;

        let out: EmbeddingsResponse = resp.json().await.map_err(|e| {
            ProviderError::new(
                Provider::Ollama,
                ProviderErrorKind::Decode(format!(
                    "serde error: {e}; expected `{{ embedding: number[] }}`"
                )),
            )
        })?;

        Ok(out.embedding)
    }

    async fn ensure_success(
        &self,
        resp: reqwest::Response,
        url: &str,
        started: Instant,
    ) -> Result<reqwest::Response, AiLlmError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let snippet = make_snippet(&text);

        error!(
            %status,
            %url,
            %snippet,
            latency_ms = started.elapsed().as_millis(),
            "Ollama returned non-success status"
        );

        Err(ProviderError::new(
            Provider::Ollama,
            ProviderErrorKind::HttpStatus(HttpError {
                status,
                url: url.to_string(),
                snippet,
            }),
        )
        .into())
    }
}

/* ==========================
HTTP payloads & options
========================== */

/// Request body for `/api/generate`.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

impl<'a> GenerateRequest<'a> {
    fn from_cfg(
        cfg: &'a LlmModelConfig,
        prompt: &'a str,
        system: Option<&'a str>,
        stream: bool,
    ) -> Self {
        let options = GenerateOptions {
            temperature: cfg.temperature,
            top_p: cfg.top_p,
            num_predict: cfg.max_tokens,
        };

        Self {
            model: &cfg.model,
            prompt,
            system,
            stream,
            options: Some(options),
        }
    }
}

/// Subset of Ollama `options`.
#[derive(Debug, Default, Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(provider: LlmProvider, endpoint: &str) -> LlmModelConfig {
        LlmModelConfig {
            provider,
            model: "qwen3:14b".into(),
            endpoint: endpoint.into(),
            api_key: None,
            max_tokens: Some(64),
            temperature: Some(0.2),
            top_p: None,
            timeout_secs: Some(5),
        }
    }

    #[test]
    fn rejects_foreign_provider_and_bad_endpoint() {
        assert!(OllamaService::new(cfg(LlmProvider::OpenAI, "http://localhost:11434")).is_err());
        assert!(OllamaService::new(cfg(LlmProvider::Ollama, "localhost:11434")).is_err());
    }

    #[test]
    fn generate_request_carries_system_and_stream_flag() {
        let c = cfg(LlmProvider::Ollama, "http://localhost:11434");
        let body = GenerateRequest::from_cfg(&c, "q", Some("sys"), true);
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["stream"], true);
        assert_eq!(v["system"], "sys");
        assert_eq!(v["options"]["num_predict"], 64);

        let body = GenerateRequest::from_cfg(&c, "q", None, false);
        let v = serde_json::to_value(&body).unwrap();
        assert!(v.get("system").is_none());
    }
}
