//! In-memory backends for engine tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use contextor::synth::GenStream;
use contextor::{
    Backends, ContextorConfig, ContextorError, Engine, EvalEvent, EvalSink, Generator,
    LexicalSource, PairScorer, ThresholdPublisher, VectorSource, threshold_channel,
};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use rag_store::{ChunkRow, EmbeddingsProvider, LexicalHit, RagError, RagFilter, VectorHit};
use tokio::sync::mpsc;

pub fn row(id: &str) -> ChunkRow {
    ChunkRow {
        chunk_id: id.into(),
        doc_id: format!("doc-{}", id.to_lowercase()),
        ord: 0,
        page: Some(1),
        text: format!("Clause {id}: the supplier's liability is capped at fees paid."),
        category: Some("legal".into()),
    }
}

pub struct StubEmbedder {
    pub fail: bool,
}

impl EmbeddingsProvider for StubEmbedder {
    fn embed<'a>(&'a self, _text: &'a str) -> BoxFuture<'a, Result<Vec<f32>, RagError>> {
        Box::pin(async move {
            if self.fail {
                Err(RagError::Embedding("model offline".into()))
            } else {
                Ok(vec![0.1, 0.2, 0.3])
            }
        })
    }

    fn dim(&self) -> usize {
        3
    }
}

/// Returns `ids` in order with increasing distance.
pub struct StubVector {
    pub ids: Vec<&'static str>,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl StubVector {
    pub fn new(ids: &[&'static str]) -> Self {
        Self {
            ids: ids.to_vec(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }
}

impl VectorSource for StubVector {
    fn search_vector<'a>(
        &'a self,
        _embedding: Vec<f32>,
        limit: usize,
        _filter: &'a RagFilter,
    ) -> BoxFuture<'a, Result<Vec<VectorHit>, RagError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if self.fail {
                return Err(RagError::Qdrant("connection refused".into()));
            }
            Ok(self
                .ids
                .iter()
                .take(limit)
                .enumerate()
                .map(|(i, id)| VectorHit {
                    row: row(id),
                    distance: 0.1 + 0.05 * i as f32,
                })
                .collect())
        })
    }
}

pub enum LexicalBehavior {
    Hits(Vec<&'static str>),
    Fail,
    Hang,
}

pub struct StubLexical {
    pub behavior: LexicalBehavior,
    pub calls: AtomicUsize,
}

impl StubLexical {
    pub fn new(behavior: LexicalBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }
}

impl LexicalSource for StubLexical {
    fn search_fulltext<'a>(
        &'a self,
        _keyword: &'a str,
        limit: usize,
        _filter: &'a RagFilter,
    ) -> BoxFuture<'a, Result<Vec<LexicalHit>, RagError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            match &self.behavior {
                LexicalBehavior::Hits(ids) => Ok(ids
                    .iter()
                    .take(limit)
                    .enumerate()
                    .map(|(i, id)| LexicalHit {
                        row: row(id),
                        bm25: 9.0 - i as f32,
                    })
                    .collect()),
                LexicalBehavior::Fail => Err(RagError::Qdrant("text index missing".into())),
                LexicalBehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Vec::new())
                }
            }
        })
    }
}

/// Deterministic generator: the same fragments for batch and stream.
pub struct StubGenerator {
    pub fragments: Vec<String>,
    pub calls: AtomicUsize,
}

impl StubGenerator {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl Generator for StubGenerator {
    fn generate<'a>(
        &'a self,
        _prompt: &'a str,
        _system: &'a str,
    ) -> BoxFuture<'a, Result<String, ContextorError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(self.fragments.concat()) })
    }

    fn generate_stream<'a>(
        &'a self,
        _prompt: &'a str,
        _system: &'a str,
    ) -> BoxFuture<'a, Result<GenStream, ContextorError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let items = self
            .fragments
            .iter()
            .cloned()
            .map(Ok)
            .collect::<Vec<Result<String, ContextorError>>>();
        Box::pin(async move { Ok(stream::iter(items).boxed()) })
    }

    fn model(&self) -> &str {
        "stub-llm"
    }
}

/// Scores passages by a fixed table keyed on chunk id, optionally slow.
pub struct StubScorer {
    pub delay: Duration,
}

impl PairScorer for StubScorer {
    fn score_pairs<'a>(
        &'a self,
        _query: &'a str,
        passages: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<f32>, ContextorError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            // Prefer later passages: reverses the fused order.
            Ok((0..passages.len()).map(|i| i as f32).collect())
        })
    }

    fn model(&self) -> &str {
        "stub-cross-encoder"
    }
}

pub struct Harness {
    pub engine: Engine,
    pub events: mpsc::Receiver<EvalEvent>,
    pub publisher: ThresholdPublisher,
    pub vector: Arc<StubVector>,
    pub lexical: Arc<StubLexical>,
    pub generator: Arc<StubGenerator>,
}

pub struct HarnessBuilder {
    pub cfg: ContextorConfig,
    pub vector: StubVector,
    pub lexical: StubLexical,
    pub generator: StubGenerator,
    pub scorer: Option<StubScorer>,
    pub embed_fails: bool,
}

impl HarnessBuilder {
    pub fn new(vector_ids: &[&'static str]) -> Self {
        Self {
            cfg: ContextorConfig::default(),
            vector: StubVector::new(vector_ids),
            lexical: StubLexical::new(LexicalBehavior::Hits(Vec::new())),
            generator: StubGenerator::new(&["Liability is capped ", "[Evidence #1]."]),
            scorer: None,
            embed_fails: false,
        }
    }

    pub fn lexical(mut self, behavior: LexicalBehavior) -> Self {
        self.lexical = StubLexical::new(behavior);
        self
    }

    pub fn generator(mut self, fragments: &[&str]) -> Self {
        self.generator = StubGenerator::new(fragments);
        self
    }

    pub fn build(self) -> Harness {
        let vector = Arc::new(self.vector);
        let lexical = Arc::new(self.lexical);
        let generator = Arc::new(self.generator);
        let backends = Backends {
            embedder: Arc::new(StubEmbedder {
                fail: self.embed_fails,
            }),
            vector: vector.clone(),
            lexical: lexical.clone(),
            scorer: self.scorer.map(|s| Arc::new(s) as Arc<dyn PairScorer>),
            generator: generator.clone(),
        };
        let (publisher, reader) = threshold_channel(self.cfg.low_evidence_threshold);
        let (sink, events) = EvalSink::channel(64);
        Harness {
            engine: Engine::new(self.cfg, backends, reader, sink),
            events,
            publisher,
            vector,
            lexical,
            generator,
        }
    }
}
