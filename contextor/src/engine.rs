//! The answer engine: `query`, `answer`, `answer_stream`.
//!
//! Pipeline per request:
//! 1) snapshot the low-evidence threshold
//! 2) embed the query text
//! 3) fetch vector + lexical lists concurrently
//! 4) fuse, 5) rerank (optional), 6) select + score confidence
//! 7) synthesize (answer routes only)
//! 8) emit one evaluation event, whatever the outcome

use std::sync::Arc;
use std::time::Instant;

use ai_llm_service::service_profiles::LlmServiceProfiles;
use futures::stream::{self, StreamExt};
use rag_store::{EmbeddingsProvider, LlmEmbedder, RagStore, clamp_snippet};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

use crate::api_types::{
    AnswerMeta, AnswerResult, AnswerStream, EvidencePassage, Query, RerankedCandidate,
};
use crate::cfg::ContextorConfig;
use crate::error::ContextorError;
use crate::eval_sink::{Degraded, EvalEvent, EvalSink, Outcome, Route};
use crate::fusion::fuse;
use crate::llm::{CrossEncoderScorer, LlmGenerator};
use crate::rerank::{PairScorer, RerankStatus, Reranker};
use crate::select::{SelectParams, select};
use crate::sources::{LexicalSource, SourceLimits, VectorSource, gather_candidates};
use crate::synth::{Generator, GenStream, Synthesizer, extract_citations, parse_sections};
use crate::threshold::ThresholdReader;

/// External collaborators of the engine.
#[derive(Clone)]
pub struct Backends {
    pub embedder: Arc<dyn EmbeddingsProvider>,
    pub vector: Arc<dyn VectorSource>,
    pub lexical: Arc<dyn LexicalSource>,
    /// Cross-encoder; only used when reranking is enabled.
    pub scorer: Option<Arc<dyn PairScorer>>,
    pub generator: Arc<dyn Generator>,
}

impl Backends {
    /// Production wiring: Qdrant for both lists, the LLM service for the rest.
    pub fn from_services(
        svc: Arc<LlmServiceProfiles>,
        store: Arc<RagStore>,
        embed_dim: usize,
    ) -> Self {
        let scorer = CrossEncoderScorer::new(svc.clone())
            .map(|s| Arc::new(s) as Arc<dyn PairScorer>);
        Self {
            embedder: Arc::new(LlmEmbedder::new(svc.clone(), embed_dim)),
            vector: store.clone(),
            lexical: store,
            scorer,
            generator: Arc::new(LlmGenerator::new(svc)),
        }
    }
}

/// Retrieval outcome shared by every route.
struct Retrieval {
    passages: Vec<EvidencePassage>,
    confidence: f32,
    low_evidence: bool,
}

pub struct Engine {
    cfg: ContextorConfig,
    embedder: Arc<dyn EmbeddingsProvider>,
    vector: Arc<dyn VectorSource>,
    lexical: Arc<dyn LexicalSource>,
    reranker: Reranker,
    synth: Synthesizer,
    threshold: ThresholdReader,
    eval: EvalSink,
}

impl Engine {
    pub fn new(
        cfg: ContextorConfig,
        backends: Backends,
        threshold: ThresholdReader,
        eval: EvalSink,
    ) -> Self {
        let reranker = match (cfg.rerank_enabled, backends.scorer) {
            (true, Some(scorer)) => {
                info!(
                    model = scorer.model(),
                    configured = %cfg.rerank_model_id,
                    top_n = cfg.rerank_top_n,
                    max_concurrency = cfg.rerank_max_concurrency,
                    "reranker enabled"
                );
                Reranker::new(
                    scorer,
                    cfg.rerank_top_n,
                    cfg.rerank_timeout,
                    Arc::new(Semaphore::new(cfg.rerank_max_concurrency.max(1))),
                )
            }
            (true, None) => {
                warn!("RERANK_ENABLED is set but no cross-encoder is configured; reranking off");
                Reranker::disabled()
            }
            (false, _) => Reranker::disabled(),
        };

        let synth = Synthesizer::new(
            backends.generator,
            cfg.max_ctx_chars,
            cfg.generation_timeout,
        );

        Self {
            embedder: backends.embedder,
            vector: backends.vector,
            lexical: backends.lexical,
            reranker,
            synth,
            threshold,
            eval,
            cfg,
        }
    }

    pub fn config(&self) -> &ContextorConfig {
        &self.cfg
    }

    pub fn threshold(&self) -> &ThresholdReader {
        &self.threshold
    }

    /// Retrieval only: the ranked evidence for `q`.
    ///
    /// # Errors
    /// Retryable [`ContextorError`] when embedding or vector search fails.
    #[instrument(skip_all, fields(route = "query", top_k = q.top_k))]
    pub async fn query(&self, q: &Query) -> Result<Vec<EvidencePassage>, ContextorError> {
        let started = Instant::now();
        let mut ev = EvalEvent::begin(Route::Query, &q.text, started);

        let res = self.retrieve(q, &mut ev).await;
        match &res {
            Ok(r) => {
                ev = ev.with_evidence(&r.passages);
                info!(
                    selected = r.passages.len(),
                    confidence = r.confidence,
                    low_evidence = r.low_evidence,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "query served"
                );
            }
            Err(e) => self.record_failure(&mut ev, e),
        }
        self.finish_event(ev, started);
        res.map(|r| r.passages)
    }

    /// Batch answer with cited evidence.
    ///
    /// Low evidence never fails the call: the answer is hedged instead.
    ///
    /// # Errors
    /// Retryable [`ContextorError`] when retrieval or generation fails.
    #[instrument(skip_all, fields(route = "answer", top_k = q.top_k))]
    pub async fn answer(&self, q: &Query) -> Result<AnswerResult, ContextorError> {
        let started = Instant::now();
        let mut ev = EvalEvent::begin(Route::Answer, &q.text, started);
        ev.model = Some(self.synth.model().to_string());

        let retrieval = match self.retrieve(q, &mut ev).await {
            Ok(r) => r,
            Err(e) => {
                self.record_failure(&mut ev, &e);
                self.finish_event(ev, started);
                return Err(e);
            }
        };

        let llm_started = Instant::now();
        let synthesis = self
            .synth
            .synthesize(
                &q.text,
                q.template.as_deref(),
                &retrieval.passages,
                retrieval.low_evidence,
            )
            .await;
        ev.steps.llm_ms = llm_started.elapsed().as_millis() as u64;

        let synthesis = match synthesis {
            Ok(s) => s,
            Err(e) => {
                ev = ev.with_evidence(&retrieval.passages);
                self.record_failure(&mut ev, &e);
                self.finish_event(ev, started);
                return Err(e);
            }
        };

        let cited = if synthesis.citations.cited.is_empty() {
            retrieval.passages.clone()
        } else {
            retrieval
                .passages
                .iter()
                .filter(|p| synthesis.citations.cited.contains(&p.marker))
                .cloned()
                .collect()
        };

        ev = ev.with_evidence(&cited);
        ev.template_fallback = synthesis.template_fallback;
        ev.citation_validity = synthesis.citations.valid_ratio();
        let eval_id = ev.eval_id;

        info!(
            %eval_id,
            cited = cited.len(),
            confidence = retrieval.confidence,
            low_evidence = retrieval.low_evidence,
            template_fallback = synthesis.template_fallback,
            latency_ms = started.elapsed().as_millis() as u64,
            "answer served"
        );
        self.finish_event(ev, started);

        Ok(AnswerResult {
            text: synthesis.text,
            summary: synthesis.summary,
            sections: synthesis.sections,
            template_fallback: synthesis.template_fallback,
            evidence: cited,
            confidence: retrieval.confidence,
            low_evidence: retrieval.low_evidence,
            eval_id,
        })
    }

    /// Streamed answer. Evidence and confidence are returned up front in
    /// [`AnswerMeta`]; the evaluation event is emitted when the stream ends
    /// or is dropped.
    ///
    /// A backend failure after streaming started ends the stream with a
    /// `"\n[stream_error: ...]"` fragment.
    ///
    /// # Errors
    /// Retryable [`ContextorError`] when retrieval fails or generation
    /// cannot be started.
    #[instrument(skip_all, fields(route = "stream", top_k = q.top_k))]
    pub async fn answer_stream(&self, q: &Query) -> Result<AnswerStream, ContextorError> {
        let started = Instant::now();
        let mut ev = EvalEvent::begin(Route::Stream, &q.text, started);
        ev.model = Some(self.synth.model().to_string());

        let retrieval = match self.retrieve(q, &mut ev).await {
            Ok(r) => r,
            Err(e) => {
                self.record_failure(&mut ev, &e);
                self.finish_event(ev, started);
                return Err(e);
            }
        };
        ev = ev.with_evidence(&retrieval.passages);

        let llm_started = Instant::now();
        let inner = match self
            .synth
            .synthesize_stream(
                &q.text,
                q.template.as_deref(),
                &retrieval.passages,
                retrieval.low_evidence,
            )
            .await
        {
            Ok(s) => s,
            Err(e) => {
                ev.steps.llm_ms = llm_started.elapsed().as_millis() as u64;
                self.record_failure(&mut ev, &e);
                self.finish_event(ev, started);
                return Err(e);
            }
        };

        let meta = AnswerMeta {
            evidence: retrieval.passages.clone(),
            confidence: retrieval.confidence,
            low_evidence: retrieval.low_evidence,
            eval_id: ev.eval_id,
        };

        let guard = StreamGuard {
            sink: self.eval.clone(),
            event: Some(ev),
            started,
            llm_started,
            text: String::new(),
            evidence: retrieval.passages,
            template_requested: q.template.as_deref().is_some_and(|t| !t.trim().is_empty()),
            failed: false,
            finished: false,
        };

        Ok(AnswerStream {
            meta,
            fragments: guarded(inner, guard),
        })
    }

    async fn retrieve(&self, q: &Query, ev: &mut EvalEvent) -> Result<Retrieval, ContextorError> {
        let threshold = self.threshold.current();
        let top_k = if q.top_k == 0 {
            self.cfg.default_top_k
        } else {
            q.top_k
        };
        ev.origin = q.origin;
        ev.keyword = q.mode.keyword().map(str::to_string);
        ev.category = q.filter.category.clone();
        ev.top_k = top_k;

        if q.text.trim().is_empty() {
            return Err(ContextorError::InvalidQuery("query text is empty".into()));
        }

        let t = Instant::now();
        let embedding = match timeout(self.cfg.embed_timeout, self.embedder.embed(&q.text)).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return Err(ContextorError::Embedding(e.to_string())),
            Err(_) => {
                return Err(ContextorError::Timeout {
                    stage: "embed",
                    after: self.cfg.embed_timeout,
                });
            }
        };
        ev.steps.embed_ms = t.elapsed().as_millis() as u64;

        let t = Instant::now();
        let limits = SourceLimits {
            vec_candidates: self.cfg.vec_candidates.max(top_k),
            ft_candidates: self.cfg.ft_candidates.max(top_k),
            vector_timeout: self.cfg.vector_timeout,
            lexical_timeout: self.cfg.lexical_timeout,
        };
        let lists = gather_candidates(
            &self.vector,
            &self.lexical,
            embedding,
            &q.mode,
            &q.filter,
            limits,
        )
        .await?;
        ev.steps.search_ms = t.elapsed().as_millis() as u64;

        let fused = fuse(
            &lists.vector,
            lists.lexical.as_deref(),
            self.cfg.fusion_mode,
            self.cfg.rrf_k,
        );

        let reranked = self.reranker.rerank(&q.text, fused).await;
        ev.steps.rerank_ms = reranked.elapsed.as_millis() as u64;
        ev.degraded = Degraded {
            lexical: lists.lexical_degraded,
            rerank: reranked.status == RerankStatus::FellBack,
        };

        let selection = select(
            reranked.candidates,
            SelectParams {
                top_k,
                rrf_k: self.cfg.rrf_k,
                min_pool: self.cfg.min_evidence_pool,
                threshold: threshold.value,
                weights: self.cfg.weights,
            },
        );
        ev.pool = selection.pool;
        ev.confidence = Some(selection.confidence);
        ev.low_evidence = Some(selection.low_evidence);

        let passages = selection
            .selected
            .into_iter()
            .enumerate()
            .map(|(i, c)| self.to_passage(i + 1, c))
            .collect::<Vec<_>>();

        if selection.low_evidence {
            info!(
                pool = selection.pool,
                confidence = selection.confidence,
                threshold = threshold.value,
                threshold_version = threshold.version,
                "low evidence"
            );
        }

        Ok(Retrieval {
            passages,
            confidence: selection.confidence,
            low_evidence: selection.low_evidence,
        })
    }

    fn to_passage(&self, marker: usize, c: RerankedCandidate) -> EvidencePassage {
        let distance = c.fused.chunk.signals.vector().map(|v| v.distance);
        let row = c.fused.chunk.row;
        let snippet = clamp_snippet(&row.text, self.cfg.snippet_chars, self.cfg.snippet_lines, true);
        EvidencePassage {
            marker,
            id: row.chunk_id,
            doc_id: row.doc_id,
            ord: row.ord,
            page: row.page,
            snippet: (!snippet.is_empty()).then_some(snippet),
            text: row.text,
            category: row.category,
            distance,
            fused_score: c.fused.fused_score,
            rerank_score: c.rerank_score,
        }
    }

    fn record_failure(&self, ev: &mut EvalEvent, e: &ContextorError) {
        if e.is_retryable() {
            error!(error = %e, route = ?ev.route, "request failed");
        } else {
            warn!(error = %e, route = ?ev.route, "request rejected");
        }
        ev.outcome = Outcome::from_error(e);
    }

    fn finish_event(&self, mut ev: EvalEvent, started: Instant) {
        ev.latency_ms = started.elapsed().as_millis() as u64;
        self.eval.emit(ev);
    }
}

/// Emits the stream's evaluation event exactly once: on completion,
/// failure, or when the consumer drops the stream.
struct StreamGuard {
    sink: EvalSink,
    event: Option<EvalEvent>,
    started: Instant,
    llm_started: Instant,
    text: String,
    evidence: Vec<EvidencePassage>,
    template_requested: bool,
    failed: bool,
    finished: bool,
}

impl StreamGuard {
    fn observe(&mut self, fragment: &str) {
        self.text.push_str(fragment);
    }

    fn fail(&mut self, e: &ContextorError) {
        self.failed = true;
        if let Some(ev) = self.event.as_mut() {
            ev.outcome = Outcome::from_error(e);
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let Some(mut ev) = self.event.take() else {
            return;
        };
        if !self.finished && !self.failed {
            ev.outcome = Outcome::Cancelled;
        }

        let citations = extract_citations(&self.text, self.evidence.len());
        if !citations.cited.is_empty() {
            let cited = self
                .evidence
                .iter()
                .filter(|p| citations.cited.contains(&p.marker))
                .cloned()
                .collect::<Vec<_>>();
            ev = ev.with_evidence(&cited);
        }
        ev.citation_validity = citations.valid_ratio();
        ev.template_fallback = self.template_requested && parse_sections(&self.text).is_none();
        ev.steps.llm_ms = self.llm_started.elapsed().as_millis() as u64;
        ev.latency_ms = self.started.elapsed().as_millis() as u64;

        info!(
            eval_id = %ev.eval_id,
            outcome = ?ev.outcome,
            chars = self.text.len(),
            latency_ms = ev.latency_ms,
            "answer stream closed"
        );
        self.sink.emit(ev);
    }
}

/// Wraps the synthesizer stream: errors become a trailing marker fragment
/// and the guard travels with the stream state.
fn guarded(inner: GenStream, guard: StreamGuard) -> futures::stream::BoxStream<'static, String> {
    stream::unfold(Some((inner, guard)), |state| async move {
        let (mut inner, mut guard) = state?;
        match inner.next().await {
            Some(Ok(fragment)) => {
                guard.observe(&fragment);
                Some((fragment, Some((inner, guard))))
            }
            Some(Err(e)) => {
                error!(error = %e, "answer stream failed mid-flight");
                guard.fail(&e);
                // Dropping `guard` with the state emits the event.
                Some((format!("\n[stream_error: {e}]"), None))
            }
            None => {
                guard.finished = true;
                None
            }
        }
    })
    .boxed()
}
