//! Gold-set evaluation through the live answer path.

use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use contextor::{AnswerResult, ContextorError, Engine, Origin, Query};
use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::CalibrationError;
use crate::eval_log::{append_jsonl, read_jsonl};
use crate::metrics::{combined_score, doc_recall, faithfulness, keyword_recall, ndcg};
use crate::progress::Progress;
use crate::records::{GoldItem, GoldRunRecord};

/// What a gold run calls. [`Engine`] in production.
pub trait AnswerTarget: Send + Sync {
    fn answer<'a>(&'a self, q: &'a Query) -> BoxFuture<'a, Result<AnswerResult, ContextorError>>;
}

impl AnswerTarget for Engine {
    fn answer<'a>(&'a self, q: &'a Query) -> BoxFuture<'a, Result<AnswerResult, ContextorError>> {
        Box::pin(Engine::answer(self, q))
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct GoldSummary {
    pub run_id: Uuid,
    pub total: usize,
    pub passed: usize,
    pub errors: usize,
    pub avg_score: f32,
    #[serde(skip)]
    pub records: Vec<GoldRunRecord>,
}

pub async fn load_gold_set(path: &Path) -> Result<Vec<GoldItem>, CalibrationError> {
    let items: Vec<GoldItem> = read_jsonl(path).await?;
    let valid: Vec<GoldItem> = items
        .into_iter()
        .filter(|g| {
            let ok = !g.query.trim().is_empty();
            if !ok {
                warn!(gold_id = %g.id, "gold item without query skipped");
            }
            ok
        })
        .collect();
    Ok(valid)
}

/// Runs every item sequentially and scores it. A failed call counts as a
/// failed item; the run itself never aborts.
#[instrument(skip_all, fields(items = items.len()))]
pub async fn run_gold_eval(
    target: &dyn AnswerTarget,
    items: &[GoldItem],
    pass_threshold: f32,
    progress: &dyn Progress,
) -> GoldSummary {
    let run_id = Uuid::new_v4();
    progress.set_total(items.len() as u64);

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        let rec = run_item(target, item, run_id, pass_threshold).await;
        progress.step(&item.id);
        records.push(rec);
    }

    let passed = records.iter().filter(|r| r.passed).count();
    let errors = records.iter().filter(|r| r.error.is_some()).count();
    let avg_score = if records.is_empty() {
        0.0
    } else {
        records.iter().map(|r| r.score).sum::<f32>() / records.len() as f32
    };
    progress.finish(&format!("{passed}/{} passed", records.len()));
    info!(%run_id, total = records.len(), passed, errors, avg_score, "gold run finished");

    GoldSummary {
        run_id,
        total: records.len(),
        passed,
        errors,
        avg_score,
        records,
    }
}

async fn run_item(
    target: &dyn AnswerTarget,
    item: &GoldItem,
    run_id: Uuid,
    pass_threshold: f32,
) -> GoldRunRecord {
    let q = Query::new(item.query.clone())
        .with_keyword(item.keyword.as_deref())
        .with_top_k(item.top_k)
        .with_category(item.category.as_deref())
        .with_template(item.template.as_deref())
        .with_origin(Origin::Gold);

    let started = Instant::now();
    let res = target.answer(&q).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match res {
        Ok(ans) => score_answer(item, &ans, run_id, pass_threshold, latency_ms),
        Err(e) => {
            warn!(gold_id = %item.id, error = %e, "gold item failed");
            GoldRunRecord {
                run_id,
                gold_id: item.id.clone(),
                ts: Utc::now(),
                eval_id: None,
                keyword_recall: None,
                doc_recall: None,
                ndcg: None,
                faithfulness: None,
                score: 0.0,
                passed: false,
                confidence: None,
                low_evidence: None,
                evidence_ids: Vec::new(),
                answer_chars: 0,
                latency_ms,
                error: Some(e.to_string()),
            }
        }
    }
}

fn score_answer(
    item: &GoldItem,
    ans: &AnswerResult,
    run_id: Uuid,
    pass_threshold: f32,
    latency_ms: u64,
) -> GoldRunRecord {
    let doc_ids: Vec<String> = ans.evidence.iter().map(|p| p.doc_id.clone()).collect();
    // Markers refer to the full selection; the highest cited one bounds it.
    let evidence_len = ans.evidence.iter().map(|p| p.marker).max().unwrap_or(0);

    let kw = keyword_recall(&item.expected_keywords, &ans.text);
    let dr = doc_recall(&item.expected_doc_ids, &doc_ids);
    let nd = ndcg(&item.expected_doc_ids, &doc_ids);
    let faith = faithfulness(&ans.text, evidence_len, &doc_ids, &item.expected_doc_ids);
    let score = combined_score(&[kw, nd, faith]);

    GoldRunRecord {
        run_id,
        gold_id: item.id.clone(),
        ts: Utc::now(),
        eval_id: Some(ans.eval_id),
        keyword_recall: kw,
        doc_recall: dr,
        ndcg: nd,
        faithfulness: faith,
        score,
        passed: score >= pass_threshold,
        confidence: Some(ans.confidence),
        low_evidence: Some(ans.low_evidence),
        evidence_ids: ans.evidence.iter().map(|p| p.id.clone()).collect(),
        answer_chars: ans.text.chars().count(),
        latency_ms,
        error: None,
    }
}

pub async fn persist_results(path: &Path, summary: &GoldSummary) -> Result<(), CalibrationError> {
    append_jsonl(path, &summary.records).await
}

/// The `limit` most recent records, oldest first.
pub async fn recent_results(path: &Path, limit: usize) -> Result<Vec<GoldRunRecord>, CalibrationError> {
    let mut all: Vec<GoldRunRecord> = read_jsonl(path).await?;
    all.sort_by_key(|r| r.ts);
    let skip = all.len().saturating_sub(limit);
    Ok(all.split_off(skip))
}
