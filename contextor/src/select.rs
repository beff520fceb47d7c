//! Evidence selection and confidence scoring.
//!
//! Confidence is a weighted blend of four components of the top result,
//! scaled down when the fused pool is thinner than `min_pool`:
//!
//! - agreement: share of independent signals (vector, lexical, reranker)
//!   that back the top result
//! - strength: mean `(k+1)/(k+rank)` over the top result's list ranks
//! - proximity: `1 - distance` of the top result (0.5 when it has no vector signal)
//! - margin: `1 - s2/s1` between the first and second result
//!
//! The weights are tunables; calibration adjusts the threshold, not the blend.

use crate::api_types::RerankedCandidate;
use crate::cfg::ConfidenceWeights;

/// Parameters of one selection.
#[derive(Clone, Copy, Debug)]
pub struct SelectParams {
    pub top_k: usize,
    pub rrf_k: u32,
    pub min_pool: usize,
    pub threshold: f32,
    pub weights: ConfidenceWeights,
}

#[derive(Clone, Debug)]
pub struct Selection {
    pub selected: Vec<RerankedCandidate>,
    /// Fused pool size before truncation.
    pub pool: usize,
    pub confidence: f32,
    pub low_evidence: bool,
}

/// Truncates to `top_k` (never pads) and scores the result.
///
/// # Example
/// ```
/// use contextor::select::{select, SelectParams};
/// use contextor::cfg::ConfidenceWeights;
/// let s = select(Vec::new(), SelectParams {
///     top_k: 5, rrf_k: 60, min_pool: 2, threshold: 0.6,
///     weights: ConfidenceWeights::default(),
/// });
/// assert_eq!(s.confidence, 0.0);
/// assert!(s.low_evidence);
/// ```
pub fn select(mut ranked: Vec<RerankedCandidate>, p: SelectParams) -> Selection {
    let pool = ranked.len();
    ranked.truncate(p.top_k);

    let confidence = confidence(&ranked, pool, &p);
    let low_evidence = pool < p.min_pool.max(1) || confidence < p.threshold;

    Selection {
        selected: ranked,
        pool,
        confidence,
        low_evidence,
    }
}

/// Confidence in `[0, 1]`; exactly `0` for an empty selection.
pub fn confidence(selected: &[RerankedCandidate], pool: usize, p: &SelectParams) -> f32 {
    let Some(top) = selected.first() else {
        return 0.0;
    };
    let signals = &top.fused.chunk.signals;
    let k = p.rrf_k as f32;

    let agreement = {
        let votes = [
            signals.vector().is_some(),
            signals.lexical().is_some(),
            top.rerank_score.map(rerank_probability).is_some_and(|pr| pr > 0.5),
        ];
        votes.iter().filter(|v| **v).count() as f32 / votes.len() as f32
    };

    let strength = {
        let ranks = [
            signals.vector().map(|v| v.rank),
            signals.lexical().map(|l| l.rank),
        ];
        let terms = ranks
            .iter()
            .flatten()
            .map(|r| (k + 1.0) / (k + *r as f32))
            .collect::<Vec<_>>();
        terms.iter().sum::<f32>() / terms.len().max(1) as f32
    };

    let proximity = signals
        .vector()
        .map_or(0.5, |v| (1.0 - v.distance).clamp(0.0, 1.0));

    let margin = match selected.get(1) {
        None => 1.0,
        Some(second) => {
            let (s1, s2) = match (top.rerank_score, second.rerank_score) {
                (Some(a), Some(b)) => (rerank_probability(a), rerank_probability(b)),
                _ => (top.fused.fused_score as f32, second.fused.fused_score as f32),
            };
            if s1 > 0.0 {
                (1.0 - s2 / s1).clamp(0.0, 1.0)
            } else {
                0.0
            }
        }
    };

    let w = &p.weights;
    let blend = (w.agreement * agreement
        + w.strength * strength
        + w.proximity * proximity
        + w.margin * margin)
        / w.sum();

    let pool_factor = if p.min_pool == 0 {
        1.0
    } else {
        (pool as f32 / p.min_pool as f32).min(1.0)
    };

    (blend * pool_factor).clamp(0.0, 1.0)
}

/// Maps a cross-encoder score to `[0, 1]`: values already in range are
/// taken as probabilities, anything else as a logit.
pub fn rerank_probability(score: f32) -> f32 {
    if (0.0..=1.0).contains(&score) {
        score
    } else {
        1.0 / (1.0 + (-score).exp())
    }
}
