//! Fire-and-forget evaluation events for the calibration loop.
//!
//! Every `query`/`answer`/`answer_stream` call emits exactly one
//! [`EvalEvent`], success or failure. Delivery is best effort: when the
//! consumer lags and the channel is full the event is dropped with a warning,
//! and the request path never waits.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::api_types::{EvidencePassage, Origin};
use crate::error::ContextorError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Query,
    Answer,
    Stream,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    /// Stream dropped by the consumer before completion.
    Cancelled,
    Error { message: String, retryable: bool },
}

impl Outcome {
    pub fn from_error(e: &ContextorError) -> Self {
        Outcome::Error {
            message: e.to_string(),
            retryable: e.is_retryable(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error { .. })
    }
}

/// Per-stage wall-clock timings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTimings {
    pub embed_ms: u64,
    pub search_ms: u64,
    pub rerank_ms: u64,
    pub llm_ms: u64,
}

/// Degraded stages of one request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degraded {
    pub lexical: bool,
    pub rerank: bool,
}

impl Degraded {
    pub fn any(&self) -> bool {
        self.lexical || self.rerank
    }
}

/// One request as seen by the calibration loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvalEvent {
    pub eval_id: Uuid,
    pub ts: DateTime<Utc>,
    pub route: Route,
    #[serde(default)]
    pub origin: Origin,
    pub query: String,
    pub keyword: Option<String>,
    pub top_k: usize,
    pub category: Option<String>,
    pub latency_ms: u64,
    #[serde(default)]
    pub steps: StepTimings,
    pub evidence_ids: Vec<String>,
    pub doc_ids: Vec<String>,
    pub pool: usize,
    pub confidence: Option<f32>,
    pub low_evidence: Option<bool>,
    pub model: Option<String>,
    pub outcome: Outcome,
    #[serde(default)]
    pub degraded: Degraded,
    #[serde(default)]
    pub template_fallback: bool,
    /// Valid-marker ratio of the answer text, when it cites anything.
    pub citation_validity: Option<f32>,
}

impl EvalEvent {
    /// Event skeleton stamped with a fresh id; latency is measured from `started`.
    pub fn begin(route: Route, query: &str, started: Instant) -> Self {
        Self {
            eval_id: Uuid::new_v4(),
            ts: Utc::now(),
            route,
            origin: Origin::Live,
            query: query.to_string(),
            keyword: None,
            top_k: 0,
            category: None,
            latency_ms: started.elapsed().as_millis() as u64,
            steps: StepTimings::default(),
            evidence_ids: Vec::new(),
            doc_ids: Vec::new(),
            pool: 0,
            confidence: None,
            low_evidence: None,
            model: None,
            outcome: Outcome::Ok,
            degraded: Degraded::default(),
            template_fallback: false,
            citation_validity: None,
        }
    }

    pub fn with_evidence(mut self, evidence: &[EvidencePassage]) -> Self {
        self.evidence_ids = evidence.iter().map(|p| p.id.clone()).collect();
        let mut docs: Vec<String> = Vec::new();
        for p in evidence {
            if !docs.contains(&p.doc_id) {
                docs.push(p.doc_id.clone());
            }
        }
        self.doc_ids = docs;
        self
    }
}

/// Sender half handed to the engine.
#[derive(Clone, Debug)]
pub struct EvalSink {
    tx: Option<mpsc::Sender<EvalEvent>>,
}

impl EvalSink {
    /// Bounded channel; the receiver belongs to the eval-log consumer.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EvalEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that discards everything (tests, one-off tools).
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Never blocks. Returns `true` when the event was queued.
    pub fn emit(&self, event: EvalEvent) -> bool {
        let Some(tx) = &self.tx else { return false };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(ev)) => {
                warn!(eval_id = %ev.eval_id, "eval channel full, event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(ev)) => {
                warn!(eval_id = %ev.eval_id, "eval consumer gone, event dropped");
                false
            }
        }
    }
}
