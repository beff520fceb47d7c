//! Hybrid retrieval and evidence-grounded answer engine.
//!
//! Public API: [`Engine`] with three routes.
//! - [`Engine::query`]: ranked evidence only
//! - [`Engine::answer`]: batch answer with cited evidence and confidence
//! - [`Engine::answer_stream`]: the same answer as an ordered fragment stream
//!
//! A query is embedded, matched against the vector and (when a keyword is
//! given) lexical lists concurrently, fused with Reciprocal Rank Fusion,
//! optionally reranked by a cross-encoder, truncated to `top_k` and scored
//! for confidence. Answers are generated from `[Evidence #n]`-tagged
//! passages and hedged when evidence is weak. Every call emits one
//! [`EvalEvent`] for the calibration loop.
//!
//! # Example
//! ```no_run
//! # use contextor::{Backends, ContextorConfig, Engine, EvalSink, Query, threshold_channel};
//! # async fn run(backends: Backends) -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = ContextorConfig::from_env()?;
//! let (_publisher, reader) = threshold_channel(cfg.low_evidence_threshold);
//! let engine = Engine::new(cfg, backends, reader, EvalSink::disabled());
//!
//! let q = Query::new("What is the liability cap?").with_keyword(Some("liability"));
//! let answer = engine.answer(&q).await?;
//! println!("{} (confidence {:.2})", answer.text, answer.confidence);
//! # Ok(()) }
//! ```

pub mod api_types;
pub mod cfg;
pub mod engine;
pub mod error;
pub mod eval_sink;
pub mod fusion;
pub mod llm;
pub mod prompt;
pub mod rerank;
pub mod select;
pub mod sources;
pub mod synth;
pub mod threshold;

pub use api_types::{
    AnswerMeta, AnswerResult, AnswerSections, AnswerStream, CandidateChunk, EvidencePassage,
    FusedCandidate, LexicalSignal, Origin, Query, RerankedCandidate, RetrievalMode, Signals, VectorSignal,
};
pub use cfg::{ConfidenceWeights, ContextorConfig, FusionMode};
pub use engine::{Backends, Engine};
pub use error::ContextorError;
pub use eval_sink::{Degraded, EvalEvent, EvalSink, Outcome, Route, StepTimings};
pub use rerank::{PairScorer, Reranker};
pub use sources::{LexicalSource, VectorSource};
pub use synth::{GenStream, Generator, Template};
pub use threshold::{
    ThresholdPublisher, ThresholdReader, ThresholdSnapshot, ThresholdSource, threshold_channel,
};
