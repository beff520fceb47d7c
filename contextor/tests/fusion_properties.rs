use std::collections::HashSet;

use contextor::FusionMode;
use contextor::fusion::fuse;
use proptest::prelude::*;
use rag_store::{ChunkRow, LexicalHit, VectorHit};

fn row(id: &str) -> ChunkRow {
    ChunkRow {
        chunk_id: id.into(),
        doc_id: "doc".into(),
        ord: 0,
        page: None,
        text: format!("chunk {id}"),
        category: None,
    }
}

fn vhits(ids: &[String]) -> Vec<VectorHit> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| VectorHit {
            row: row(id),
            distance: 0.01 * i as f32,
        })
        .collect()
}

fn lhits(ids: &[String]) -> Vec<LexicalHit> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| LexicalHit {
            row: row(id),
            bm25: 20.0 - i as f32,
        })
        .collect()
}

fn ids_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-h]", 0..12)
}

fn order(out: &[contextor::FusedCandidate]) -> Vec<String> {
    out.iter().map(|c| c.chunk.row.chunk_id.clone()).collect()
}

fn fillers(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

fn with(base: &[String], id: &str) -> Vec<String> {
    let mut out = base.to_vec();
    out.push(id.into());
    out
}

fn score(out: &[contextor::FusedCandidate], id: &str) -> f64 {
    out.iter()
        .find(|c| c.chunk.row.chunk_id == id)
        .map(|c| c.fused_score)
        .unwrap_or(f64::NAN)
}

proptest! {
    #[test]
    fn fusion_is_deterministic(v in ids_strategy(), l in ids_strategy(), k in 1u32..100) {
        let (v, l) = (vhits(&v), lhits(&l));
        let a = fuse(&v, Some(&l), FusionMode::Rrf, k);
        let b = fuse(&v, Some(&l), FusionMode::Rrf, k);
        prop_assert_eq!(order(&a), order(&b));
    }

    #[test]
    fn every_chunk_appears_once(v in ids_strategy(), l in ids_strategy()) {
        let out = fuse(&vhits(&v), Some(&lhits(&l)), FusionMode::Rrf, 60);
        let got = order(&out);
        let unique: HashSet<&String> = got.iter().collect();
        prop_assert_eq!(unique.len(), got.len());

        let expected: HashSet<&String> = v.iter().chain(l.iter()).collect();
        prop_assert_eq!(unique, expected);
    }

    #[test]
    fn scores_are_non_increasing(v in ids_strategy(), l in ids_strategy()) {
        let out = fuse(&vhits(&v), Some(&lhits(&l)), FusionMode::Rrf, 60);
        for w in out.windows(2) {
            prop_assert!(w[0].fused_score >= w[1].fused_score);
        }
    }

    #[test]
    fn pure_vector_keeps_vector_order(v in prop::collection::hash_set("[a-z]{1,3}", 0..10)) {
        let v: Vec<String> = v.into_iter().collect();
        let out = fuse(&vhits(&v), None, FusionMode::Rrf, 60);
        prop_assert_eq!(order(&out), v.clone());

        let filtered = fuse(&vhits(&v), None, FusionMode::Intersect, 60);
        prop_assert_eq!(order(&filtered), v);
    }

    #[test]
    fn cross_signal_chunk_beats_single_signal_at_same_rank(
        rank in 1usize..40,
        k in 1u32..100,
    ) {
        let vf = fillers("v", rank - 1);
        let lf = fillers("l", rank - 1);

        // x at `rank` in both lists.
        let both = fuse(
            &vhits(&with(&vf, "x")),
            Some(&lhits(&with(&lf, "x"))),
            FusionMode::Rrf,
            k,
        );
        // y at `rank` in the vector list only.
        let single = fuse(&vhits(&with(&vf, "y")), Some(&lhits(&lf)), FusionMode::Rrf, k);
        prop_assert!(score(&both, "x") > score(&single, "y"));

        // Same fusion: x one rank behind y in the vector list, but also lexical.
        let mut v = with(&vf, "y");
        v.push("x".into());
        let mut l = lf.clone();
        l.push("l-pad".into());
        l.push("x".into());
        let out = fuse(&vhits(&v), Some(&lhits(&l)), FusionMode::Rrf, k);
        let got = order(&out);
        let pos = |id: &str| got.iter().position(|c| c == id);
        prop_assert!(pos("x") < pos("y"), "{:?}", got);
        prop_assert!(score(&out, "x") > score(&out, "y"));
    }

    #[test]
    fn intersect_is_subset_of_lexical_in_vector_order(
        v in prop::collection::hash_set("[a-h]", 0..8),
        l in prop::collection::hash_set("[a-h]", 0..8),
    ) {
        let v: Vec<String> = v.into_iter().collect();
        let l: Vec<String> = l.into_iter().collect();
        let out = fuse(&vhits(&v), Some(&lhits(&l)), FusionMode::Intersect, 60);
        let expected: Vec<String> = v.iter().filter(|id| l.contains(id)).cloned().collect();
        prop_assert_eq!(order(&out), expected);
    }
}

#[test]
fn chunk_found_by_both_lists_outranks_vector_only_neighbour() {
    let v = vhits(&["x".into(), "y".into()]);
    let l = lhits(&["y".into()]);
    let out = fuse(&v, Some(&l), FusionMode::Rrf, 60);
    assert_eq!(order(&out), vec!["y", "x"]);
}
