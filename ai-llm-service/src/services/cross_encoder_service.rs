//! HTTP cross-encoder client.
//!
//! Scores `(query, passage)` pairs in one batch request:
//! `POST {endpoint}/rerank` with `{"model","query","documents"}` and reads
//! `{"results":[{"index": usize, "relevance_score": f32}]}`. Scores are
//! returned aligned with the input passage order.

use std::time::{Duration, Instant};

use reqwest::header;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::config::rerank_model_config::RerankModelConfig;
use crate::error_handler::{
    AiLlmError, HttpError, Provider, ProviderError, ProviderErrorKind, check_provider_endpoint,
    make_snippet,
};

pub struct CrossEncoderService {
    client: reqwest::Client,
    cfg: RerankModelConfig,
    url_rerank: String,
}

impl CrossEncoderService {
    pub fn new(cfg: RerankModelConfig) -> Result<Self, AiLlmError> {
        let base = check_provider_endpoint(Provider::CrossEncoder, &cfg.endpoint)?;
        let timeout = Duration::from_secs(cfg.timeout_secs.unwrap_or(10));

        let mut headers = header::HeaderMap::new();
        if let Some(key) = cfg.api_key.as_deref() {
            let value = header::HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                ProviderError::new(
                    Provider::CrossEncoder,
                    ProviderErrorKind::Decode(format!("invalid API key header: {e}")),
                )
            })?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            url_rerank: format!("{base}/rerank"),
            cfg,
        })
    }

    pub fn model(&self) -> &str {
        &self.cfg.model
    }

    /// Scores every passage against `query`; output is index-aligned with `passages`.
    #[instrument(skip_all, fields(model = %self.cfg.model, pairs = passages.len()))]
    pub async fn score_pairs(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, AiLlmError> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        let body = RerankRequest {
            model: &self.cfg.model,
            query,
            documents: passages,
        };

        debug!("POST {}", self.url_rerank);
        let resp = self.client.post(&self.url_rerank).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            let snippet = make_snippet(&text);
            error!(
                %status,
                url = %self.url_rerank,
                %snippet,
                latency_ms = started.elapsed().as_millis(),
                "cross-encoder returned non-success status"
            );
            return Err(ProviderError::new(
                Provider::CrossEncoder,
                ProviderErrorKind::HttpStatus(HttpError {
                    status,
                    url: self.url_rerank.clone(),
                    snippet,
                }),
            )
            .into());
        }

        let out: RerankResponse = resp.json().await.map_err(|e| {
            ProviderError::new(
                Provider::CrossEncoder,
                ProviderErrorKind::Decode(format!("serde error: {e}; expected `results[]`")),
            )
        })?;

        let scores = align_scores(passages.len(), out.results)?;
        debug!(latency_ms = started.elapsed().as_millis(), "pairs scored");
        Ok(scores)
    }
}

/// Places each `(index, score)` result at its passage position.
///
/// Every passage must receive exactly one score.
fn align_scores(expected: usize, results: Vec<RerankResult>) -> Result<Vec<f32>, AiLlmError> {
    let mismatch = |got| {
        AiLlmError::from(ProviderError::new(
            Provider::CrossEncoder,
            ProviderErrorKind::ScoreCount { expected, got },
        ))
    };
    if results.len() != expected {
        return Err(mismatch(results.len()));
    }

    let mut slots: Vec<Option<f32>> = vec![None; expected];
    for r in results {
        let Some(slot) = slots.get_mut(r.index) else {
            return Err(mismatch(expected));
        };
        if slot.is_some() {
            return Err(mismatch(expected));
        }
        *slot = Some(r.relevance_score);
    }
    slots
        .into_iter()
        .collect::<Option<Vec<f32>>>()
        .ok_or_else(|| mismatch(expected))
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(index: usize, relevance_score: f32) -> RerankResult {
        RerankResult {
            index,
            relevance_score,
        }
    }

    #[test]
    fn aligns_sorted_results_back_to_input_order() {
        let scores = align_scores(3, vec![r(2, 0.9), r(0, 0.5), r(1, 0.1)]).unwrap();
        assert_eq!(scores, vec![0.5, 0.1, 0.9]);
    }

    #[test]
    fn rejects_missing_duplicate_or_out_of_range_indices() {
        assert!(align_scores(3, vec![r(0, 0.5), r(1, 0.1)]).is_err());
        assert!(align_scores(2, vec![r(0, 0.5), r(0, 0.1)]).is_err());
        assert!(align_scores(2, vec![r(0, 0.5), r(5, 0.1)]).is_err());
    }

    #[test]
    fn response_shape_decodes() {
        let raw = r#"{"results":[{"index":0,"relevance_score":3.25}],"model":"x"}"#;
        let out: RerankResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(out.results[0].index, 0);
        assert!((out.results[0].relevance_score - 3.25).abs() < f32::EPSILON);
    }
}
