//! Startup probes for the backends the answer engine depends on.
//!
//! One probe per configured role:
//! - generation / embedding on Ollama: `GET {endpoint}/api/tags`, model must be listed
//! - generation / embedding on OpenAI-compatible: `GET {endpoint}/v1/models`, model must be listed
//! - cross-encoder: `GET {endpoint}/health`
//!
//! Probes never fail. Transport, status and decode problems become
//! `ok = false` with the error text in `message`.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::llm_model_config::LlmModelConfig;
use crate::config::llm_provider::LlmProvider;
use crate::config::rerank_model_config::RerankModelConfig;
use crate::error_handler::{AiLlmError, HealthError, HttpError, make_snippet};

/// What the engine uses a backend for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendRole {
    Generation,
    Embedding,
    Rerank,
}

impl fmt::Display for BackendRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendRole::Generation => "generation",
            BackendRole::Embedding => "embedding",
            BackendRole::Rerank => "rerank",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub role: BackendRole,
    /// "Ollama", "OpenAI" or "CrossEncoder".
    pub provider: &'static str,
    pub endpoint: String,
    pub model: String,
    pub ok: bool,
    pub latency_ms: u128,
    pub message: String,
}

/// How the probe response proves the model is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Listing {
    /// `{"models":[{"name": ..}]}`
    OllamaTags,
    /// `{"data":[{"id": ..}]}`
    OpenAiModels,
    /// Any 2xx is enough.
    StatusOnly,
}

struct Probe<'a> {
    role: BackendRole,
    provider: &'static str,
    endpoint: &'a str,
    path: &'static str,
    model: &'a str,
    bearer: Option<&'a str>,
    timeout: Option<u64>,
    listing: Listing,
}

pub struct HealthService {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl HealthService {
    /// # Errors
    /// [`AiLlmError::HttpTransport`] if the HTTP client cannot be built.
    pub fn new(timeout_secs: Option<u64>) -> Result<Self, AiLlmError> {
        let default_timeout = Duration::from_secs(timeout_secs.unwrap_or(10));
        let client = reqwest::Client::builder().timeout(default_timeout).build()?;
        Ok(Self {
            client,
            default_timeout,
        })
    }

    /// Probes a generation or embedding profile.
    pub async fn check_model(&self, role: BackendRole, cfg: &LlmModelConfig) -> HealthStatus {
        let (provider, path, listing) = match cfg.provider {
            LlmProvider::Ollama => ("Ollama", "/api/tags", Listing::OllamaTags),
            LlmProvider::OpenAI => ("OpenAI", "/v1/models", Listing::OpenAiModels),
        };
        self.run(Probe {
            role,
            provider,
            endpoint: &cfg.endpoint,
            path,
            model: &cfg.model,
            bearer: cfg.api_key.as_deref(),
            timeout: cfg.timeout_secs,
            listing,
        })
        .await
    }

    pub async fn check_rerank(&self, cfg: &RerankModelConfig) -> HealthStatus {
        self.run(Probe {
            role: BackendRole::Rerank,
            provider: "CrossEncoder",
            endpoint: &cfg.endpoint,
            path: "/health",
            model: &cfg.model,
            bearer: cfg.api_key.as_deref(),
            timeout: cfg.timeout_secs,
            listing: Listing::StatusOnly,
        })
        .await
    }

    async fn run(&self, probe: Probe<'_>) -> HealthStatus {
        let started = Instant::now();
        let outcome = self.fetch(&probe).await;
        let latency_ms = started.elapsed().as_millis();

        let (ok, message) = match outcome {
            Ok(true) => (true, "model available".to_string()),
            Ok(false) => (false, "backend up, model not listed".to_string()),
            Err(e) => (false, e.to_string()),
        };
        if ok {
            info!(role = %probe.role, model = probe.model, latency_ms = latency_ms as u64, "backend healthy");
        } else {
            warn!(role = %probe.role, model = probe.model, %message, "backend unhealthy");
        }

        HealthStatus {
            role: probe.role,
            provider: probe.provider,
            endpoint: probe.endpoint.to_string(),
            model: probe.model.to_string(),
            ok,
            latency_ms,
            message,
        }
    }

    /// `Ok(listed)` once the backend answered 2xx.
    async fn fetch(&self, probe: &Probe<'_>) -> Result<bool, AiLlmError> {
        let base = probe.endpoint.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(HealthError::InvalidEndpoint(base.to_string()).into());
        }
        let url = format!("{}{}", base.trim_end_matches('/'), probe.path);
        let timeout = probe
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let mut req = self.client.get(&url).timeout(timeout);
        if let Some(key) = probe.bearer {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(HealthError::HttpStatus(HttpError {
                status,
                url,
                snippet: make_snippet(&body),
            })
            .into());
        }
        model_listed(probe.listing, &body, probe.model).map_err(AiLlmError::from)
    }
}

fn model_listed(listing: Listing, body: &str, model: &str) -> Result<bool, HealthError> {
    #[derive(Deserialize)]
    struct Tags {
        #[serde(default)]
        models: Vec<Tag>,
    }
    #[derive(Deserialize)]
    struct Tag {
        name: String,
    }
    #[derive(Deserialize)]
    struct Models {
        data: Vec<ModelItem>,
    }
    #[derive(Deserialize)]
    struct ModelItem {
        id: String,
    }

    let decode = |e: serde_json::Error| HealthError::Decode(e.to_string());
    match listing {
        Listing::StatusOnly => Ok(true),
        Listing::OllamaTags => {
            let tags: Tags = serde_json::from_str(body).map_err(decode)?;
            // Ollama reports an untagged pull as `name:latest`.
            let latest = format!("{model}:latest");
            Ok(tags.models.iter().any(|t| t.name == model || t.name == latest))
        }
        Listing::OpenAiModels => {
            let models: Models = serde_json::from_str(body).map_err(decode)?;
            Ok(models.data.iter().any(|m| m.id == model))
        }
    }
}
