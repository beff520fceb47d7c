//! Persisted records of the ops loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_top_k() -> usize {
    10
}

/// One labeled query of the gold set (one JSON object per line).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GoldItem {
    pub id: String,
    pub query: String,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub template: Option<String>,
    /// Terms the answer text should mention.
    #[serde(default)]
    pub expected_keywords: Vec<String>,
    /// Documents the evidence should come from.
    #[serde(default)]
    pub expected_doc_ids: Vec<String>,
}

/// Result of running one gold item through the answer path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GoldRunRecord {
    pub run_id: Uuid,
    pub gold_id: String,
    pub ts: DateTime<Utc>,
    pub eval_id: Option<Uuid>,
    pub keyword_recall: Option<f32>,
    pub doc_recall: Option<f32>,
    pub ndcg: Option<f32>,
    pub faithfulness: Option<f32>,
    /// Mean of the metrics that apply to the item.
    pub score: f32,
    pub passed: bool,
    /// Engine confidence for the answer; `None` when the call failed.
    pub confidence: Option<f32>,
    pub low_evidence: Option<bool>,
    pub evidence_ids: Vec<String>,
    pub answer_chars: usize,
    pub latency_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
}

/// Threshold state persisted across restarts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationState {
    pub threshold: f32,
    /// Gold runs the threshold was derived from.
    pub samples: usize,
    pub target_false_hedge: f32,
    pub last_run: DateTime<Utc>,
}

/// Operator rating attached to a logged evaluation id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub eval_id: Uuid,
    /// 1..=5, or `None` to clear a previous rating.
    pub rating: Option<u8>,
    #[serde(default)]
    pub note: Option<String>,
    pub ts: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gold_item_fills_defaults() {
        let item: GoldItem =
            serde_json::from_str(r#"{"id":"g1","query":"What is the liability cap?"}"#).unwrap();
        assert_eq!(item.top_k, 10);
        assert!(item.keyword.is_none());
        assert!(item.expected_doc_ids.is_empty());
    }
}
