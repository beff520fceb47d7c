//! Default LLM configs loaded from environment variables.
//!
//! Roles:
//! - **Primary**   → answer synthesis model (quality)
//! - **Embedding** → query embedding model
//! - **Rerank**    → optional HTTP cross-encoder
//!
//! # Environment variables
//!
//! Common:
//! - `LLM_KIND` = provider kind (`ollama` default, `openai`)
//! - `LLM_MAX_TOKENS` = optional max tokens (u32)
//! - `GENERATION_TIMEOUT_SECS` = optional request timeout for generation
//!
//! Ollama:
//! - `OLLAMA_URL` or `OLLAMA_PORT`
//!
//! OpenAI-compatible:
//! - `OPENAI_URL` (default `https://api.openai.com`), `OPENAI_API_KEY`
//!
//! Models:
//! - `PRIMARY_MODEL` (required), `EMBEDDING_MODEL` (required)
//! - `RERANK_URL`, `RERANK_MODEL_ID`, `RERANK_API_KEY`, `RERANK_TIMEOUT_SECS`

use crate::{
    config::{
        llm_model_config::LlmModelConfig, llm_provider::LlmProvider,
        rerank_model_config::RerankModelConfig,
    },
    error_handler::{
        AiLlmError, ConfigError, env_opt, env_opt_u32, env_opt_u64, must_env,
        validate_http_endpoint,
    },
};

/// Default cross-encoder identifier.
pub const DEFAULT_RERANK_MODEL: &str = "cross-encoder/ms-marco-MiniLM-L-6-v2";

/// Resolves the provider from `LLM_KIND` (default: Ollama).
pub fn provider_from_env() -> Result<LlmProvider, AiLlmError> {
    match env_opt("LLM_KIND") {
        Some(kind) => Ok(kind.parse::<LlmProvider>()?),
        None => Ok(LlmProvider::Ollama),
    }
}

/// Resolves the Ollama endpoint strictly from environment.
///
/// Precedence:
/// 1. `OLLAMA_URL` if present and non-empty
/// 2. `OLLAMA_PORT` → `http://localhost:{port}`
fn ollama_endpoint() -> Result<String, AiLlmError> {
    if let Some(url) = env_opt("OLLAMA_URL") {
        validate_http_endpoint("OLLAMA_URL", url.trim())?;
        return Ok(url);
    }
    if let Some(port) = env_opt("OLLAMA_PORT") {
        port.trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidNumber {
                var: "OLLAMA_PORT",
                reason: "expected u16 (1..=65535)",
            })?;
        return Ok(format!("http://localhost:{}", port.trim()));
    }
    Err(AiLlmError::Config(ConfigError::MissingVar(
        "OLLAMA_URL or OLLAMA_PORT",
    )))
}

fn provider_endpoint(provider: LlmProvider) -> Result<(String, Option<String>), AiLlmError> {
    match provider {
        LlmProvider::Ollama => Ok((ollama_endpoint()?, None)),
        LlmProvider::OpenAI => {
            let url = env_opt("OPENAI_URL").unwrap_or_else(|| "https://api.openai.com".into());
            validate_http_endpoint("OPENAI_URL", url.trim())?;
            let key = must_env("OPENAI_API_KEY")?;
            Ok((url, Some(key)))
        }
    }
}

/// Constructs the **primary** (answer synthesis) profile.
///
/// # Env
/// - `PRIMARY_MODEL` (required)
///
/// # Defaults
/// - `temperature = Some(0.2)`
/// - `timeout_secs = Some(600)`
pub fn config_primary() -> Result<LlmModelConfig, AiLlmError> {
    let provider = provider_from_env()?;
    let (endpoint, api_key) = provider_endpoint(provider)?;
    let model = must_env("PRIMARY_MODEL")?;
    let max_tokens = env_opt_u32("LLM_MAX_TOKENS")?;
    let timeout = env_opt_u64("GENERATION_TIMEOUT_SECS")?.unwrap_or(600);

    Ok(LlmModelConfig {
        provider,
        model,
        endpoint,
        api_key,
        max_tokens,
        temperature: Some(0.2),
        top_p: None,
        timeout_secs: Some(timeout),
    })
}

/// Constructs the **embedding** profile.
///
/// # Env
/// - `EMBEDDING_MODEL` (required)
pub fn config_embedding() -> Result<LlmModelConfig, AiLlmError> {
    let provider = provider_from_env()?;
    let (endpoint, api_key) = provider_endpoint(provider)?;
    let model = must_env("EMBEDDING_MODEL")?;

    Ok(LlmModelConfig {
        provider,
        model,
        endpoint,
        api_key,
        max_tokens: None,
        temperature: Some(0.0),
        top_p: None,
        timeout_secs: Some(30),
    })
}

/// Constructs the cross-encoder profile, or `None` when `RERANK_URL` is unset.
pub fn config_rerank() -> Result<Option<RerankModelConfig>, AiLlmError> {
    let Some(endpoint) = env_opt("RERANK_URL") else {
        return Ok(None);
    };
    validate_http_endpoint("RERANK_URL", endpoint.trim())?;

    Ok(Some(RerankModelConfig {
        model: env_opt("RERANK_MODEL_ID").unwrap_or_else(|| DEFAULT_RERANK_MODEL.into()),
        endpoint,
        api_key: env_opt("RERANK_API_KEY"),
        timeout_secs: env_opt_u64("RERANK_TIMEOUT_SECS")?.or(Some(10)),
    }))
}
