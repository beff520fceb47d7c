//! Gold-set scoring metrics.
//!
//! Each metric returns `None` when the gold item carries no label for it, so
//! the combined score averages only what can be judged.

use std::collections::HashSet;

use contextor::synth::extract_citations;

/// Share of expected keywords mentioned in `text` (case-insensitive).
pub fn keyword_recall(expected: &[String], text: &str) -> Option<f32> {
    let expected: Vec<String> = expected
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    if expected.is_empty() {
        return None;
    }
    let hay = text.to_lowercase();
    let hits = expected.iter().filter(|k| hay.contains(k.as_str())).count();
    Some(hits as f32 / expected.len() as f32)
}

/// Share of expected documents present among the retrieved ones.
pub fn doc_recall(expected: &[String], retrieved: &[String]) -> Option<f32> {
    let exp: HashSet<&str> = expected.iter().map(String::as_str).collect();
    if exp.is_empty() {
        return None;
    }
    let got: HashSet<&str> = retrieved.iter().map(String::as_str).collect();
    Some(exp.intersection(&got).count() as f32 / exp.len() as f32)
}

/// Binary-relevance nDCG of the retrieved document order.
pub fn ndcg(expected: &[String], retrieved: &[String]) -> Option<f32> {
    let exp: HashSet<&str> = expected.iter().map(String::as_str).collect();
    if exp.is_empty() {
        return None;
    }
    let gain = |i: usize| 1.0 / ((i + 2) as f64).log2();

    let dcg: f64 = retrieved
        .iter()
        .enumerate()
        .filter(|(_, d)| exp.contains(d.as_str()))
        .map(|(i, _)| gain(i))
        .sum();
    let ideal_len = exp.len().min(retrieved.len());
    let idcg: f64 = (0..ideal_len).map(gain).sum();
    if idcg == 0.0 {
        return Some(0.0);
    }
    Some((dcg / idcg) as f32)
}

/// Grounding score: valid-citation ratio of the answer, blended 50/50 with
/// expected-document coverage of the evidence when labels exist.
pub fn faithfulness(
    text: &str,
    evidence_len: usize,
    evidence_doc_ids: &[String],
    expected_doc_ids: &[String],
) -> Option<f32> {
    let citation = extract_citations(text, evidence_len).valid_ratio();
    let overlap = doc_recall(expected_doc_ids, evidence_doc_ids);
    match (citation, overlap) {
        (Some(c), Some(o)) => Some(0.5 * c + 0.5 * o),
        (Some(c), None) => Some(c),
        (None, Some(o)) => Some(o),
        (None, None) => None,
    }
}

/// Mean of the available metrics; zero when none apply.
pub fn combined_score(parts: &[Option<f32>]) -> f32 {
    let present: Vec<f32> = parts.iter().flatten().copied().collect();
    if present.is_empty() {
        0.0
    } else {
        present.iter().sum::<f32>() / present.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn keyword_recall_is_case_insensitive() {
        let r = keyword_recall(&s(&["Liability", "indemnity"]), "The LIABILITY cap is 12 months of fees.");
        assert_eq!(r, Some(0.5));
        assert_eq!(keyword_recall(&[], "anything"), None);
    }

    #[test]
    fn ndcg_rewards_early_hits() {
        let exp = s(&["d1"]);
        assert_eq!(ndcg(&exp, &s(&["d1", "d2"])), Some(1.0));
        let late = ndcg(&exp, &s(&["d2", "d1"])).unwrap();
        assert!(late < 1.0 && late > 0.0);
        assert_eq!(ndcg(&exp, &s(&["d2"])), Some(0.0));
        assert_eq!(ndcg(&exp, &[]), Some(0.0));
    }

    #[test]
    fn doc_recall_ignores_duplicates() {
        assert_eq!(doc_recall(&s(&["a", "b"]), &s(&["a", "a", "c"])), Some(0.5));
    }

    #[test]
    fn faithfulness_blends_citations_and_coverage() {
        let text = "Capped [Evidence #1], see [Evidence #4].";
        assert_eq!(faithfulness(text, 2, &s(&["a"]), &[]), Some(0.5));
        assert_eq!(faithfulness(text, 2, &s(&["a"]), &s(&["a"])), Some(0.75));
        assert_eq!(faithfulness("no markers", 2, &s(&["a"]), &[]), None);
    }

    #[test]
    fn combined_score_skips_missing_metrics() {
        assert_eq!(combined_score(&[Some(1.0), None, Some(0.5)]), 0.75);
        assert_eq!(combined_score(&[None, None]), 0.0);
    }
}
