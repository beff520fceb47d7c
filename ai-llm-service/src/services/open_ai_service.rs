//! OpenAI-compatible chat backend for answer synthesis and query embeddings.
//!
//! - `POST {base}/v1/chat/completions`: grounded answer, batch or SSE stream
//! - `POST {base}/v1/embeddings`: one vector per query text
//!
//! The bearer key is attached once as a default header on the client.

use std::time::{Duration, Instant};

use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{
    config::{llm_model_config::LlmModelConfig, llm_provider::LlmProvider},
    error_handler::{
        AiLlmError, HttpError, Provider, ProviderError, ProviderErrorKind,
        check_provider_endpoint, make_snippet,
    },
    stream::{FragmentStream, line_stream, parse_openai_sse_line},
};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug)]
pub struct OpenAiService {
    client: reqwest::Client,
    cfg: LlmModelConfig,
    chat_url: String,
    embeddings_url: String,
}

impl OpenAiService {
    /// # Errors
    /// - `InvalidProvider` if `cfg.provider` is not OpenAI
    /// - `MissingApiKey` if `cfg.api_key` is `None`
    /// - `InvalidEndpoint` if `cfg.endpoint` is not http(s)
    pub fn new(cfg: LlmModelConfig) -> Result<Self, AiLlmError> {
        if cfg.provider != LlmProvider::OpenAI {
            return Err(fail(ProviderErrorKind::InvalidProvider));
        }
        let key = cfg
            .api_key
            .as_deref()
            .ok_or_else(|| fail(ProviderErrorKind::MissingApiKey))?;
        let base = check_provider_endpoint(Provider::OpenAI, &cfg.endpoint)?;

        let mut auth = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
            fail(ProviderErrorKind::Decode(format!("invalid API key header: {e}")))
        })?;
        auth.set_sensitive(true);

        let timeout = Duration::from_secs(cfg.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(HeaderMap::from_iter([(header::AUTHORIZATION, auth)]))
            .build()?;

        debug!(model = %cfg.model, endpoint = %base, timeout_secs = timeout.as_secs(), "openai-compatible client ready");

        Ok(Self {
            client,
            chat_url: format!("{base}/v1/chat/completions"),
            embeddings_url: format!("{base}/v1/embeddings"),
            cfg,
        })
    }

    /// Full answer text for one prompt.
    #[instrument(skip_all, fields(model = %self.cfg.model, prompt_chars = prompt.len()))]
    pub async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, AiLlmError> {
        let started = Instant::now();
        let resp = self.post(&self.chat_url, &ChatRequest::new(&self.cfg, prompt, system, false)).await?;
        let out: ChatResponse = decode(resp, "choices[0].message.content").await?;

        let text = out
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or_else(|| fail(ProviderErrorKind::EmptyChoices))?;

        debug!(latency_ms = started.elapsed().as_millis() as u64, chars = text.len(), "answer generated");
        Ok(text)
    }

    /// Answer fragments as SSE `delta.content` events arrive.
    ///
    /// Resolves once headers are received; dropping the stream closes the
    /// connection and stops generation upstream.
    #[instrument(skip_all, fields(model = %self.cfg.model, prompt_chars = prompt.len()))]
    pub async fn generate_stream(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<FragmentStream, AiLlmError> {
        let resp = self.post(&self.chat_url, &ChatRequest::new(&self.cfg, prompt, system, true)).await?;
        Ok(line_stream(resp, Provider::OpenAI, parse_openai_sse_line))
    }

    pub async fn embeddings(&self, input: &str) -> Result<Vec<f32>, AiLlmError> {
        let body = EmbeddingsRequest {
            model: &self.cfg.model,
            input,
        };
        let resp = self.post(&self.embeddings_url, &body).await?;
        let out: EmbeddingsResponse = decode(resp, "data[0].embedding").await?;
        out.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| fail(ProviderErrorKind::Decode("empty `data` in embeddings response".into())))
    }

    async fn post<B: Serialize>(&self, url: &str, body: &B) -> Result<reqwest::Response, AiLlmError> {
        let resp = self.client.post(url).json(body).send().await?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let snippet = make_snippet(&resp.text().await.unwrap_or_default());
        warn!(%status, %url, %snippet, model = %self.cfg.model, "openai-compatible backend rejected request");
        Err(fail(ProviderErrorKind::HttpStatus(HttpError {
            status,
            url: url.to_string(),
            snippet,
        })))
    }
}

fn fail(kind: ProviderErrorKind) -> AiLlmError {
    ProviderError::new(Provider::OpenAI, kind).into()
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response, expected: &str) -> Result<T, AiLlmError> {
    resp.json()
        .await
        .map_err(|e| fail(ProviderErrorKind::Decode(format!("{e}; expected `{expected}`"))))
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

impl<'a> ChatRequest<'a> {
    fn new(cfg: &'a LlmModelConfig, prompt: &'a str, system: Option<&'a str>, stream: bool) -> Self {
        let messages = system
            .map(|content| ChatMessage { role: "system", content })
            .into_iter()
            .chain([ChatMessage { role: "user", content: prompt }])
            .collect();
        Self {
            model: &cfg.model,
            messages,
            stream,
            temperature: cfg.temperature,
            top_p: cfg.top_p,
            max_tokens: cfg.max_tokens,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageOut,
}

#[derive(Debug, Deserialize)]
struct ChatMessageOut {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(api_key: Option<&str>) -> LlmModelConfig {
        LlmModelConfig {
            provider: LlmProvider::OpenAI,
            model: "gpt-4o-mini".into(),
            endpoint: "https://api.openai.com/".into(),
            api_key: api_key.map(str::to_string),
            max_tokens: None,
            temperature: Some(0.2),
            top_p: None,
            timeout_secs: Some(5),
        }
    }

    #[test]
    fn requires_api_key() {
        let err = OpenAiService::new(cfg(None)).unwrap_err();
        assert!(matches!(
            err,
            AiLlmError::Provider(ProviderError {
                kind: ProviderErrorKind::MissingApiKey,
                ..
            })
        ));
    }

    #[test]
    fn urls_are_derived_from_endpoint() {
        let svc = OpenAiService::new(cfg(Some("sk-test"))).unwrap();
        assert_eq!(svc.chat_url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(svc.embeddings_url, "https://api.openai.com/v1/embeddings");
    }

    #[test]
    fn stream_flag_only_serialized_when_set() {
        let c = cfg(Some("k"));
        let v = serde_json::to_value(ChatRequest::new(&c, "q", Some("s"), false)).unwrap();
        assert!(v.get("stream").is_none());
        assert_eq!(v["messages"][0]["role"], "system");
        assert_eq!(v["messages"][1]["content"], "q");

        let v = serde_json::to_value(ChatRequest::new(&c, "q", None, true)).unwrap();
        assert_eq!(v["stream"], true);
        assert_eq!(v["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn choices_without_content_decode() {
        let out: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant"}}]}"#).unwrap();
        assert!(out.choices[0].message.content.is_none());
    }
}
