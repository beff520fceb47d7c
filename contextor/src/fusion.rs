//! Rank fusion of the vector and lexical lists.
//!
//! RRF: `fused(id) = Σ_L 1 / (k + rank_L(id))` over the lists containing
//! `id`, with 1-based ranks. Only ranks are used, so cosine distances and
//! BM25 scores never need to be comparable.
//!
//! Output is sorted by descending fused score, then ascending vector rank,
//! then ascending lexical rank (missing ranks last), then chunk id. The
//! order is a pure function of the input lists.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use rag_store::{LexicalHit, VectorHit};
use tracing::debug;

use crate::api_types::{CandidateChunk, FusedCandidate, LexicalSignal, Signals, VectorSignal};
use crate::cfg::FusionMode;

/// Merges the two lists according to `mode`.
///
/// `lexical` is `None` in pure-vector mode (or after lexical degradation);
/// both modes then return the vector ranking unchanged.
pub fn fuse(
    vector: &[VectorHit],
    lexical: Option<&[LexicalHit]>,
    mode: FusionMode,
    k: u32,
) -> Vec<FusedCandidate> {
    let out = match mode {
        FusionMode::Rrf => rrf(vector, lexical, k),
        FusionMode::Intersect => intersect(vector, lexical, k),
    };
    debug!(?mode, k, fused = out.len(), "fusion done");
    out
}

/// Contribution of one list position.
pub fn rrf_term(k: u32, rank: usize) -> f64 {
    1.0 / (k as f64 + rank as f64)
}

fn rrf(vector: &[VectorHit], lexical: Option<&[LexicalHit]>, k: u32) -> Vec<FusedCandidate> {
    let mut slots: Vec<CandidateChunk> = Vec::with_capacity(vector.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for (i, hit) in dedup_vector(vector).into_iter().enumerate() {
        index.insert(hit.row.chunk_id.clone(), slots.len());
        slots.push(CandidateChunk {
            row: hit.row.clone(),
            signals: Signals::Vector(VectorSignal {
                rank: i + 1,
                distance: hit.distance,
            }),
        });
    }

    for (i, hit) in dedup_lexical(lexical.unwrap_or_default())
        .into_iter()
        .enumerate()
    {
        let signal = LexicalSignal {
            rank: i + 1,
            bm25: hit.bm25,
        };
        match index.get(&hit.row.chunk_id) {
            Some(&slot) => {
                let c = &mut slots[slot];
                c.signals = c.signals.with_lexical(signal);
            }
            None => {
                index.insert(hit.row.chunk_id.clone(), slots.len());
                slots.push(CandidateChunk {
                    row: hit.row.clone(),
                    signals: Signals::Lexical(signal),
                });
            }
        }
    }

    let mut fused = slots
        .into_iter()
        .map(|chunk| FusedCandidate {
            fused_score: score_signals(&chunk.signals, k),
            chunk,
        })
        .collect::<Vec<_>>();
    fused.sort_by(fused_order);
    fused
}

/// Vector order restricted to ids present in the lexical list.
fn intersect(vector: &[VectorHit], lexical: Option<&[LexicalHit]>, k: u32) -> Vec<FusedCandidate> {
    let lexical_ranks: Option<HashMap<&str, LexicalSignal>> = lexical.map(|l| {
        dedup_lexical(l)
            .into_iter()
            .enumerate()
            .map(|(i, h)| {
                (
                    h.row.chunk_id.as_str(),
                    LexicalSignal {
                        rank: i + 1,
                        bm25: h.bm25,
                    },
                )
            })
            .collect()
    });

    let mut out = Vec::new();
    for (i, hit) in dedup_vector(vector).into_iter().enumerate() {
        let v = VectorSignal {
            rank: i + 1,
            distance: hit.distance,
        };
        let signals = match &lexical_ranks {
            None => Signals::Vector(v),
            Some(ranks) => match ranks.get(hit.row.chunk_id.as_str()) {
                Some(l) => Signals::Both(v, *l),
                None => continue,
            },
        };
        out.push(FusedCandidate {
            chunk: CandidateChunk {
                row: hit.row.clone(),
                signals,
            },
            fused_score: rrf_term(k, v.rank),
        });
    }
    out
}

fn score_signals(signals: &Signals, k: u32) -> f64 {
    let v = signals.vector().map_or(0.0, |v| rrf_term(k, v.rank));
    let l = signals.lexical().map_or(0.0, |l| rrf_term(k, l.rank));
    v + l
}

/// Total order used for fused output.
pub fn fused_order(a: &FusedCandidate, b: &FusedCandidate) -> Ordering {
    b.fused_score
        .total_cmp(&a.fused_score)
        .then_with(|| {
            rank_or_last(a.chunk.signals.vector().map(|v| v.rank))
                .cmp(&rank_or_last(b.chunk.signals.vector().map(|v| v.rank)))
        })
        .then_with(|| {
            rank_or_last(a.chunk.signals.lexical().map(|l| l.rank))
                .cmp(&rank_or_last(b.chunk.signals.lexical().map(|l| l.rank)))
        })
        .then_with(|| a.chunk.id().cmp(b.chunk.id()))
}

fn rank_or_last(rank: Option<usize>) -> usize {
    rank.unwrap_or(usize::MAX)
}

/// First occurrence wins; later duplicates of an id are dropped.
fn dedup_vector(hits: &[VectorHit]) -> Vec<&VectorHit> {
    let mut seen = HashSet::new();
    hits.iter()
        .filter(|h| seen.insert(h.row.chunk_id.as_str()))
        .collect()
}

fn dedup_lexical(hits: &[LexicalHit]) -> Vec<&LexicalHit> {
    let mut seen = HashSet::new();
    hits.iter()
        .filter(|h| seen.insert(h.row.chunk_id.as_str()))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rag_store::ChunkRow;

    pub(crate) fn row(id: &str) -> ChunkRow {
        ChunkRow {
            chunk_id: id.into(),
            doc_id: format!("doc-{id}"),
            ord: 0,
            page: None,
            text: format!("text of {id}"),
            category: None,
        }
    }

    pub(crate) fn vhits(ids: &[&str]) -> Vec<VectorHit> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| VectorHit {
                row: row(id),
                distance: 0.1 + i as f32 * 0.05,
            })
            .collect()
    }

    pub(crate) fn lhits(ids: &[&str]) -> Vec<LexicalHit> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| LexicalHit {
                row: row(id),
                bm25: 10.0 - i as f32,
            })
            .collect()
    }

    fn ids(out: &[FusedCandidate]) -> Vec<&str> {
        out.iter().map(|c| c.chunk.id()).collect()
    }

    #[test]
    fn scenario_abc_bad() {
        let v = vhits(&["A", "B", "C"]);
        let l = lhits(&["B", "A", "D"]);
        let out = fuse(&v, Some(&l), FusionMode::Rrf, 60);
        assert_eq!(ids(&out), vec!["A", "B", "C", "D"]);

        let both = 1.0 / 61.0 + 1.0 / 62.0;
        assert!((out[0].fused_score - both).abs() < 1e-15);
        assert!((out[1].fused_score - both).abs() < 1e-15);
        assert!((out[2].fused_score - 1.0 / 63.0).abs() < 1e-15);
        assert!((out[3].fused_score - 1.0 / 63.0).abs() < 1e-15);
        assert!(out[1].fused_score > out[2].fused_score);
    }

    #[test]
    fn pure_vector_keeps_vector_order() {
        let v = vhits(&["x", "a", "m"]);
        for mode in [FusionMode::Rrf, FusionMode::Intersect] {
            let out = fuse(&v, None, mode, 60);
            assert_eq!(ids(&out), vec!["x", "a", "m"]);
            assert!(out.iter().all(|c| c.chunk.signals.lexical().is_none()));
        }
    }

    #[test]
    fn intersect_filters_by_lexical_ids() {
        let v = vhits(&["A", "B", "C", "E"]);
        let l = lhits(&["E", "A", "D"]);
        let out = fuse(&v, Some(&l), FusionMode::Intersect, 60);
        assert_eq!(ids(&out), vec!["A", "E"]);
        assert!(matches!(out[1].chunk.signals, Signals::Both(v, l) if v.rank == 4 && l.rank == 1));
    }

    #[test]
    fn duplicate_ids_keep_first_position() {
        let v = vhits(&["A", "A", "B"]);
        let out = fuse(&v, None, FusionMode::Rrf, 60);
        assert_eq!(ids(&out), vec!["A", "B"]);
        assert_eq!(out[1].chunk.signals.vector().map(|s| s.rank), Some(2));
    }

    #[test]
    fn lexical_only_chunks_enter_fusion() {
        let out = fuse(&[], Some(&lhits(&["q", "r"])), FusionMode::Rrf, 60);
        assert_eq!(ids(&out), vec!["q", "r"]);
        assert!(matches!(out[0].chunk.signals, Signals::Lexical(_)));
    }
}
