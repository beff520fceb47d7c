//! Optional cross-encoder pass over the top fused candidates.
//!
//! Only the first `top_n` candidates are scored; they are reordered by
//! descending score (fused position breaks ties) and the remainder keeps its
//! fused order behind them without a score. Any failure, timeout or
//! malformed response returns the fused order untouched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::api_types::{FusedCandidate, RerankedCandidate};
use crate::error::ContextorError;

/// Joint (query, passage) relevance scoring.
pub trait PairScorer: Send + Sync {
    /// Returns one score per passage, index-aligned with `passages`.
    fn score_pairs<'a>(
        &'a self,
        query: &'a str,
        passages: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<f32>, ContextorError>>;

    fn model(&self) -> &str;
}

/// What happened during a rerank call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RerankStatus {
    /// No scorer configured; fused order passed through.
    Disabled,
    /// Nothing to score.
    Skipped,
    Applied,
    /// Scorer failed or timed out; fused order kept.
    FellBack,
}

#[derive(Debug)]
pub struct RerankOutcome {
    pub candidates: Vec<RerankedCandidate>,
    pub status: RerankStatus,
    pub elapsed: Duration,
}

/// Cross-encoder reranker bounded by a process-wide permit pool.
#[derive(Clone)]
pub struct Reranker {
    scorer: Option<Arc<dyn PairScorer>>,
    top_n: usize,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl Reranker {
    /// Pass-through reranker.
    pub fn disabled() -> Self {
        Self {
            scorer: None,
            top_n: 0,
            timeout: Duration::ZERO,
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// `permits` is shared by every request of the process; waiting for a
    /// permit counts against `timeout`.
    pub fn new(
        scorer: Arc<dyn PairScorer>,
        top_n: usize,
        timeout: Duration,
        permits: Arc<Semaphore>,
    ) -> Self {
        Self {
            scorer: Some(scorer),
            top_n: top_n.max(1),
            timeout,
            permits,
        }
    }

    pub async fn rerank(&self, query: &str, fused: Vec<FusedCandidate>) -> RerankOutcome {
        let started = Instant::now();
        let Some(scorer) = &self.scorer else {
            return passthrough(fused, RerankStatus::Disabled, started);
        };
        if fused.is_empty() {
            return passthrough(fused, RerankStatus::Skipped, started);
        }

        let n = self.top_n.min(fused.len());
        let passages = fused[..n]
            .iter()
            .map(|c| c.chunk.row.text.clone())
            .collect::<Vec<_>>();

        let call = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|e| ContextorError::Rerank(e.to_string()))?;
            scorer.score_pairs(query, &passages).await
        };

        let scores = match timeout(self.timeout, call).await {
            Ok(Ok(scores)) if scores.len() == n && scores.iter().all(|s| s.is_finite()) => scores,
            Ok(Ok(scores)) => {
                warn!(
                    expected = n,
                    got = scores.len(),
                    "reranker returned unusable scores, keeping fused order"
                );
                return passthrough(fused, RerankStatus::FellBack, started);
            }
            Ok(Err(e)) => {
                warn!(error = %e, model = scorer.model(), "reranker failed, keeping fused order");
                return passthrough(fused, RerankStatus::FellBack, started);
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    model = scorer.model(),
                    "reranker timed out, keeping fused order"
                );
                return passthrough(fused, RerankStatus::FellBack, started);
            }
        };

        let candidates = apply_scores(fused, scores);
        debug!(scored = n, model = scorer.model(), "rerank applied");
        RerankOutcome {
            candidates,
            status: RerankStatus::Applied,
            elapsed: started.elapsed(),
        }
    }
}

fn passthrough(fused: Vec<FusedCandidate>, status: RerankStatus, started: Instant) -> RerankOutcome {
    RerankOutcome {
        candidates: fused.into_iter().map(RerankedCandidate::from).collect(),
        status,
        elapsed: started.elapsed(),
    }
}

/// Reorders the scored prefix; `scores.len()` is the prefix length.
fn apply_scores(fused: Vec<FusedCandidate>, scores: Vec<f32>) -> Vec<RerankedCandidate> {
    let n = scores.len();
    let mut iter = fused.into_iter();

    let mut head = iter
        .by_ref()
        .take(n)
        .zip(scores)
        .enumerate()
        .map(|(pos, (fused, s))| (pos, fused, s))
        .collect::<Vec<_>>();
    head.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| a.0.cmp(&b.0)));

    head.into_iter()
        .map(|(_, fused, s)| RerankedCandidate {
            fused,
            rerank_score: Some(s),
        })
        .chain(iter.map(RerankedCandidate::from))
        .collect()
}
