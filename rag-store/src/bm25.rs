//! Okapi BM25 over the set of chunks returned by the text-match filter.
//!
//! `score = Σ IDF(q) × f(q,D)×(k1+1) / (f(q,D) + k1×(1-b+b×|D|/avgdl))`
//! with `IDF(q) = ln((N - n(q) + 0.5) / (n(q) + 0.5) + 1)`.
//!
//! Statistics (N, n(q), avgdl) are taken from the scored set itself, so
//! scores are comparable within one query only.

use std::collections::{HashMap, HashSet};

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "that", "the", "this", "to", "was", "with",
];

#[derive(Clone, Copy, Debug)]
pub struct Bm25 {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25 {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// Lowercases and splits on non-alphanumeric chars, dropping stop words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

impl Bm25 {
    /// Scores each document against `query`; output is index-aligned with `docs`.
    pub fn score_all(&self, query: &str, docs: &[&str]) -> Vec<f64> {
        let terms: Vec<String> = {
            let mut seen = HashSet::new();
            tokenize(query)
                .into_iter()
                .filter(|t| seen.insert(t.clone()))
                .collect()
        };
        if terms.is_empty() || docs.is_empty() {
            return vec![0.0; docs.len()];
        }

        let doc_terms: Vec<Vec<String>> = docs.iter().map(|d| tokenize(d)).collect();
        let n = doc_terms.len() as f64;
        let avgdl = (doc_terms.iter().map(Vec::len).sum::<usize>() as f64 / n).max(1.0);

        let idf: HashMap<&str, f64> = terms
            .iter()
            .map(|t| {
                let df = doc_terms.iter().filter(|d| d.contains(t)).count() as f64;
                (t.as_str(), ((n - df + 0.5) / (df + 0.5) + 1.0).ln())
            })
            .collect();

        doc_terms
            .iter()
            .map(|d| {
                let len_norm = 1.0 - self.b + self.b * (d.len() as f64 / avgdl);
                terms
                    .iter()
                    .map(|t| {
                        let tf = d.iter().filter(|w| *w == t).count() as f64;
                        if tf == 0.0 {
                            return 0.0;
                        }
                        let idf = idf.get(t.as_str()).copied().unwrap_or(0.0);
                        idf * (tf * (self.k1 + 1.0)) / (tf + self.k1 * len_norm)
                    })
                    .sum()
            })
            .collect()
    }
}
