mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{HarnessBuilder, LexicalBehavior, StubScorer};
use contextor::synth::{LOW_EVIDENCE_CAVEAT, NO_EVIDENCE_ANSWER};
use contextor::{Origin, Outcome, Query, Route, ThresholdSource};
use futures::StreamExt;

fn ids(passages: &[contextor::EvidencePassage]) -> Vec<&str> {
    passages.iter().map(|p| p.id.as_str()).collect()
}

#[tokio::test]
async fn hybrid_query_fuses_both_lists() {
    let mut h = HarnessBuilder::new(&["A", "B", "C"])
        .lexical(LexicalBehavior::Hits(vec!["B", "A", "D"]))
        .build();

    let q = Query::new("liability cap").with_keyword(Some("liability")).with_top_k(10);
    let out = h.engine.query(&q).await.unwrap();

    assert_eq!(ids(&out), vec!["A", "B", "C", "D"]);
    assert_eq!(out[0].fused_score, out[1].fused_score);
    assert!(out[1].fused_score > out[2].fused_score);
    assert_eq!(out.iter().map(|p| p.marker).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    assert!(out[3].distance.is_none(), "lexical-only chunk has no distance");

    let ev = h.events.recv().await.unwrap();
    assert_eq!(ev.route, Route::Query);
    assert_eq!(ev.origin, Origin::Live);
    assert_eq!(ev.keyword.as_deref(), Some("liability"));
    assert_eq!(ev.evidence_ids, vec!["A", "B", "C", "D"]);
    assert_eq!(ev.outcome, Outcome::Ok);
    assert!(!ev.degraded.any());
}

#[tokio::test]
async fn missing_keyword_never_calls_lexical() {
    let h = HarnessBuilder::new(&["x", "y", "z"])
        .lexical(LexicalBehavior::Hits(vec!["z"]))
        .build();

    let out = h.engine.query(&Query::new("termination notice")).await.unwrap();
    assert_eq!(ids(&out), vec!["x", "y", "z"]);
    assert_eq!(h.lexical.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.vector.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn lexical_failure_degrades_to_vector_ranking() {
    for behavior in [LexicalBehavior::Fail, LexicalBehavior::Hang] {
        let mut h = HarnessBuilder::new(&["x", "y"]).lexical(behavior);
        h.cfg.lexical_timeout = Duration::from_millis(50);
        let mut h = h.build();

        let q = Query::new("jurisdiction").with_keyword(Some("court"));
        let out = h.engine.query(&q).await.unwrap();
        assert_eq!(ids(&out), vec!["x", "y"]);

        let ev = h.events.recv().await.unwrap();
        assert!(ev.degraded.lexical);
        assert_eq!(ev.outcome, Outcome::Ok);
    }
}

#[tokio::test]
async fn vector_failure_is_retryable_and_logged() {
    let mut b = HarnessBuilder::new(&["x"]);
    b.vector.fail = true;
    let mut h = b.build();

    let err = h.engine.answer(&Query::new("sla penalties")).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);

    let ev = h.events.recv().await.unwrap();
    assert!(matches!(ev.outcome, Outcome::Error { retryable: true, .. }));
}

#[tokio::test]
async fn embedding_failure_is_retryable() {
    let mut b = HarnessBuilder::new(&["x"]);
    b.embed_fails = true;
    let h = b.build();
    let err = h.engine.query(&Query::new("q")).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn top_k_is_not_padded() {
    let h = HarnessBuilder::new(&["a", "b", "c"]).build();
    let out = h.engine.query(&Query::new("q").with_top_k(5)).await.unwrap();
    assert_eq!(out.len(), 3);
}

#[tokio::test]
async fn zero_candidates_give_hedged_answer_without_generation() {
    let mut h = HarnessBuilder::new(&[]).build();

    let res = h.engine.answer(&Query::new("data protection")).await.unwrap();
    assert_eq!(res.confidence, 0.0);
    assert!(res.low_evidence);
    assert!(res.evidence.is_empty());
    assert_eq!(res.text, NO_EVIDENCE_ANSWER);
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);

    let ev = h.events.recv().await.unwrap();
    assert_eq!(ev.low_evidence, Some(true));
    assert_eq!(ev.confidence, Some(0.0));
}

#[tokio::test]
async fn answer_cites_evidence_in_order() {
    let h = HarnessBuilder::new(&["a", "b", "c"])
        .generator(&["Cap applies [Evidence #3] and [Evidence #1]; ", "see [Evidence #7]."])
        .build();
    h.publisher.publish(0.0, ThresholdSource::Calibration);

    let res = h.engine.answer(&Query::new("cap")).await.unwrap();
    assert_eq!(ids(&res.evidence), vec!["a", "c"]);
    assert!(!res.low_evidence);
    assert!(!res.text.starts_with(LOW_EVIDENCE_CAVEAT));
}

#[tokio::test]
async fn published_threshold_is_used_by_next_request() {
    let h = HarnessBuilder::new(&["a", "b", "c"]).build();
    let q = Query::new("cap");

    h.publisher.publish(0.0, ThresholdSource::Calibration);
    assert!(!h.engine.answer(&q).await.unwrap().low_evidence);

    h.publisher.publish(1.0, ThresholdSource::Calibration);
    let res = h.engine.answer(&q).await.unwrap();
    assert!(res.low_evidence);
    assert!(res.text.starts_with(LOW_EVIDENCE_CAVEAT));
}

#[tokio::test]
async fn reranker_disabled_keeps_fused_order_without_scores() {
    let mut b = HarnessBuilder::new(&["a", "b", "c"]);
    b.scorer = Some(StubScorer {
        delay: Duration::ZERO,
    });
    b.cfg.rerank_enabled = false;
    let h = b.build();

    let out = h.engine.query(&Query::new("q")).await.unwrap();
    assert_eq!(ids(&out), vec!["a", "b", "c"]);
    assert!(out.iter().all(|p| p.rerank_score.is_none()));
}

#[tokio::test]
async fn reranker_reorders_scored_prefix() {
    let mut b = HarnessBuilder::new(&["a", "b", "c", "d"]);
    b.scorer = Some(StubScorer {
        delay: Duration::ZERO,
    });
    b.cfg.rerank_enabled = true;
    b.cfg.rerank_top_n = 3;
    let h = b.build();

    let out = h.engine.query(&Query::new("q")).await.unwrap();
    assert_eq!(ids(&out), vec!["c", "b", "a", "d"]);
    assert_eq!(out[0].rerank_score, Some(2.0));
    assert_eq!(out[3].rerank_score, None);
}

#[tokio::test]
async fn reranker_timeout_falls_back_to_fused_order() {
    let mut b = HarnessBuilder::new(&["a", "b", "c"]);
    b.scorer = Some(StubScorer {
        delay: Duration::from_secs(10),
    });
    b.cfg.rerank_enabled = true;
    b.cfg.rerank_timeout = Duration::from_millis(50);
    let mut h = b.build();

    let out = h.engine.query(&Query::new("q")).await.unwrap();
    assert_eq!(ids(&out), vec!["a", "b", "c"]);
    assert!(out.iter().all(|p| p.rerank_score.is_none()));
    assert!(h.events.recv().await.unwrap().degraded.rerank);
}

#[tokio::test]
async fn streamed_fragments_equal_batch_text() {
    let fragments = ["Liability is capped [Evid", "ence #1", "] at fees [Evidence #", "2]."];
    let mut h = HarnessBuilder::new(&["a", "b"]).generator(&fragments).build();
    let q = Query::new("cap");

    for threshold in [0.0, 1.0] {
        h.publisher.publish(threshold, ThresholdSource::Calibration);
        let batch = h.engine.answer(&q).await.unwrap();
        let stream = h.engine.answer_stream(&q).await.unwrap();
        assert_eq!(stream.meta.low_evidence, batch.low_evidence);
        let parts = stream.fragments.collect::<Vec<_>>().await;
        assert_eq!(parts.concat(), batch.text);
        assert!(parts.iter().all(|p| !p.ends_with("[Evid") && !p.ends_with("#")));
    }

    // Two events per round: answer, then stream.
    let mut routes = Vec::new();
    while let Ok(ev) = h.events.try_recv() {
        routes.push(ev.route);
    }
    assert_eq!(
        routes,
        vec![Route::Answer, Route::Stream, Route::Answer, Route::Stream]
    );
}

#[tokio::test]
async fn zero_candidates_stream_matches_batch() {
    let h = HarnessBuilder::new(&[]).build();
    let q = Query::new("q");
    let batch = h.engine.answer(&q).await.unwrap();
    let stream = h.engine.answer_stream(&q).await.unwrap();
    assert!(stream.meta.low_evidence);
    assert_eq!(stream.meta.confidence, 0.0);
    let text = stream.fragments.collect::<Vec<_>>().await.concat();
    assert_eq!(text, batch.text);
}

#[tokio::test]
async fn dropped_stream_emits_cancelled_event() {
    let mut h = HarnessBuilder::new(&["a"])
        .generator(&["one ", "two ", "three"])
        .build();
    let mut stream = h.engine.answer_stream(&Query::new("q")).await.unwrap();
    let eval_id = stream.meta.eval_id;
    let first = stream.fragments.next().await;
    assert!(first.is_some());
    drop(stream);

    let ev = h.events.recv().await.unwrap();
    assert_eq!(ev.eval_id, eval_id);
    assert_eq!(ev.route, Route::Stream);
    assert_eq!(ev.outcome, Outcome::Cancelled);
}

#[tokio::test]
async fn blank_query_is_rejected_but_logged() {
    let mut h = HarnessBuilder::new(&["a"]).build();
    let err = h.engine.query(&Query::new("   ")).await.unwrap_err();
    assert!(!err.is_retryable());
    let ev = h.events.recv().await.unwrap();
    assert!(ev.outcome.is_error());
}

#[tokio::test]
async fn template_contract_falls_back_when_unparseable() {
    let mut h = HarnessBuilder::new(&["a", "b"])
        .generator(&["A single paragraph [Evidence #2]."])
        .build();
    let q = Query::new("review").with_template(Some("contract_response"));
    let res = h.engine.answer(&q).await.unwrap();
    assert!(res.sections.is_none());
    assert!(res.template_fallback);
    assert_eq!(ids(&res.evidence), vec!["b"]);
    assert!(h.events.recv().await.unwrap().template_fallback);
}

#[tokio::test]
async fn streamed_markers_stay_whole_for_any_generator_split() {
    use contextor::synth::extract_citations;

    let markers = ["[Evidence #1]", "[Evidence#2]", "[Evidence # 1]", "[ Evidence #2 ]"];
    for marker in markers {
        let text = format!("Liability is capped {marker} at fees.");
        for cut in 1..text.len() {
            let h = HarnessBuilder::new(&["a", "b"])
                .generator(&[&text[..cut], &text[cut..]])
                .build();
            let stream = h.engine.answer_stream(&Query::new("cap")).await.unwrap();
            let parts = stream.fragments.collect::<Vec<_>>().await;

            let whole = parts.concat();
            assert!(whole.ends_with(&text));
            let per_fragment: usize = parts.iter().map(|p| extract_citations(p, 2).total).sum();
            assert_eq!(
                per_fragment,
                extract_citations(&whole, 2).total,
                "{marker:?} cut at {cut}: {parts:?}"
            );
        }
    }
}

#[tokio::test]
async fn gold_origin_reaches_the_eval_event() {
    let mut h = HarnessBuilder::new(&["a", "b"]).build();
    let q = Query::new("cap").with_origin(Origin::Gold);
    h.engine.answer(&q).await.unwrap();

    let ev = h.events.recv().await.unwrap();
    assert_eq!(ev.route, Route::Answer);
    assert_eq!(ev.origin, Origin::Gold);
}
