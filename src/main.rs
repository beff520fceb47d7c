use std::env;
use std::io::Write;
use std::sync::Arc;

use ai_llm_service::config::default_config::{
    config_embedding, config_primary, config_rerank,
};
use ai_llm_service::service_profiles::LlmServiceProfiles;
use ai_llm_service::telemetry;
use anyhow::{Context, Result, bail};
use calibration_loop::gold::persist_results;
use calibration_loop::{
    CalibrationConfig, Calibrator, EvalLog, FeedbackLog, IndicatifProgress, OpsLoop, SloSummary,
    SloTracker, compact, load_gold_set, restore_threshold, run_gold_eval, self_heal,
    spawn_eval_consumer,
};
use contextor::{
    Backends, ContextorConfig, Engine, EvalEvent, EvalSink, Query, ThresholdPublisher,
    threshold_channel,
};
use futures::StreamExt;
use rag_store::{RagConfig, RagStore};
use tokio::sync::{mpsc, watch};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::{Layer, filter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const USAGE: &str = "usage: grounded-qa-backend [serve | ask <question> [keyword] | gold | \
feedback <eval_id> <1-5> | compact | self-heal | slo]";

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; a malformed one is not.
    match dotenvy::dotenv() {
        Err(e) if !e.not_found() => return Err(e).context("failed to load .env"),
        _ => {}
    }
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str).unwrap_or("serve") {
        "serve" => serve().await,
        "ask" => {
            let Some(question) = args.get(1) else { bail!(USAGE) };
            ask(question, args.get(2).map(String::as_str)).await
        }
        "gold" => gold().await,
        "feedback" => {
            let (Some(id), Some(rating)) = (args.get(1), args.get(2)) else { bail!(USAGE) };
            let eval_id: Uuid = id.parse().context("eval_id must be a UUID")?;
            let rating: u8 = rating.parse().context("rating must be 1-5")?;
            let cfg = CalibrationConfig::from_env()?;
            FeedbackLog::new(&cfg.feedback_log_path)
                .record(eval_id, Some(rating), None)
                .await?;
            Ok(())
        }
        "compact" => {
            let store = open_store().await?;
            let r = compact(store.as_ref()).await?;
            println!("duplicates removed: {}", r.duplicates_removed);
            Ok(())
        }
        "self-heal" => {
            let store = open_store().await?;
            let r = self_heal(store.as_ref()).await?;
            println!(
                "indexes created: {}, invalid rows purged: {}",
                r.indexes_created, r.invalid_purged
            );
            Ok(())
        }
        "slo" => {
            let cfg = CalibrationConfig::from_env()?;
            let slo = SloTracker::new(cfg.slo_window);
            slo.seed(&EvalLog::new(&cfg.eval_log_path).read_all().await?);
            print_slo(&slo.summary());
            Ok(())
        }
        other => bail!("unknown command '{other}'\n{USAGE}"),
    }
}

/// Global fmt layer for third-party crates, library layer for the engine crates.
fn init_tracing() {
    let engine_level = env::var("ENGINE_LOG_LEVEL")
        .ok()
        .and_then(|v| v.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    let filter = telemetry::env_filter_with_level("info", engine_level);

    let third_party = filter::filter_fn(|meta| {
        !telemetry::ENGINE_TARGETS
            .iter()
            .any(|prefix| meta.target().starts_with(prefix))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_filter(third_party))
        .with(telemetry::layer(telemetry::ENGINE_TARGETS))
        .init();
}

/// Everything the request path and the ops loop share.
struct Runtime {
    engine: Arc<Engine>,
    store: Arc<RagStore>,
    svc: Arc<LlmServiceProfiles>,
    publisher: ThresholdPublisher,
    eval_rx: mpsc::Receiver<EvalEvent>,
    ops_cfg: CalibrationConfig,
}

async fn open_store() -> Result<Arc<RagStore>> {
    let cfg = RagConfig::from_env().context("invalid Qdrant configuration")?;
    Ok(Arc::new(RagStore::new(cfg).context("failed to connect to Qdrant")?))
}

async fn bootstrap() -> Result<Runtime> {
    let engine_cfg = ContextorConfig::from_env().context("invalid engine configuration")?;
    let ops_cfg = CalibrationConfig::from_env().context("invalid ops configuration")?;
    let embed_dim: usize = env::var("EMBED_DIM")
        .context("EMBED_DIM must be set")?
        .trim()
        .parse()
        .context("EMBED_DIM must be a positive integer")?;

    let svc = Arc::new(
        LlmServiceProfiles::new(
            config_primary()?,
            config_embedding()?,
            config_rerank()?,
            None,
        )
        .context("failed to build LLM profiles")?,
    );

    let store = open_store().await?;
    store
        .verify_dimension(embed_dim)
        .await
        .context("embedding dimension does not match the collection")?;

    let (publisher, reader) = threshold_channel(engine_cfg.low_evidence_threshold);
    restore_threshold(&publisher, &ops_cfg.state_path).await;

    let (sink, eval_rx) = EvalSink::channel(ops_cfg.eval_channel_capacity);
    let backends = Backends::from_services(svc.clone(), store.clone(), embed_dim);
    let engine = Arc::new(Engine::new(engine_cfg, backends, reader, sink));

    Ok(Runtime {
        engine,
        store,
        svc,
        publisher,
        eval_rx,
        ops_cfg,
    })
}

async fn serve() -> Result<()> {
    let rt = bootstrap().await?;
    let cfg = rt.ops_cfg.clone();

    let health = rt.svc.health_all().await;
    let unhealthy = health.iter().filter(|h| !h.ok).count();
    if unhealthy > 0 {
        warn!(unhealthy, probed = health.len(), "serving with unhealthy backends");
    }

    let slo = Arc::new(SloTracker::new(cfg.slo_window));
    let log = EvalLog::new(&cfg.eval_log_path);
    match log.read_all().await {
        Ok(history) => slo.seed(&history),
        Err(e) => warn!(error = %e, "eval log unreadable, SLO window starts empty"),
    }
    let consumer = spawn_eval_consumer(rt.eval_rx, log, slo.clone());

    let calibrator = Calibrator::new(
        rt.publisher.clone(),
        &cfg.state_path,
        cfg.target_false_hedge,
        cfg.min_samples,
    );
    let ops = OpsLoop::new(
        cfg.clone(),
        rt.store.clone(),
        rt.engine.clone(),
        calibrator,
        slo.clone(),
    );
    let (stop_tx, stop_rx) = watch::channel(false);
    let ops_handle = ops.spawn(stop_rx);

    info!(
        threshold = rt.publisher.current().value,
        cross_encoder = rt.svc.has_reranker(),
        "engine ready, ctrl-c to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutting down");
    if stop_tx.send(true).is_err() {
        debug!("ops loop already stopped");
    }
    ops_handle.await.context("ops loop panicked")?;

    // Last sender gone: the consumer drains and exits.
    drop(rt.engine);
    let written = consumer.await.context("eval consumer panicked")?;
    print_slo(&slo.summary());
    info!(written, "eval log flushed");
    Ok(())
}

async fn ask(question: &str, keyword: Option<&str>) -> Result<()> {
    let rt = bootstrap().await?;
    let consumer = spawn_eval_consumer(
        rt.eval_rx,
        EvalLog::new(&rt.ops_cfg.eval_log_path),
        Arc::new(SloTracker::new(rt.ops_cfg.slo_window)),
    );

    let q = Query::new(question).with_keyword(keyword);
    let stream = rt.engine.answer_stream(&q).await?;
    for p in &stream.meta.evidence {
        println!(
            "[Evidence #{}] {} (doc {}, page {:?})",
            p.marker,
            p.snippet.as_deref().unwrap_or(&p.text),
            p.doc_id,
            p.page
        );
    }
    println!();

    let mut out = std::io::stdout();
    let mut fragments = stream.fragments;
    while let Some(f) = fragments.next().await {
        write!(out, "{f}")?;
        out.flush()?;
    }
    drop(fragments);
    println!(
        "\n\nconfidence {:.2}{} (eval {})",
        stream.meta.confidence,
        if stream.meta.low_evidence { ", low evidence" } else { "" },
        stream.meta.eval_id
    );

    drop(rt.engine);
    consumer.await.context("eval consumer panicked")?;
    Ok(())
}

async fn gold() -> Result<()> {
    let rt = bootstrap().await?;
    let cfg = rt.ops_cfg.clone();
    let consumer = spawn_eval_consumer(
        rt.eval_rx,
        EvalLog::new(&cfg.eval_log_path),
        Arc::new(SloTracker::new(cfg.slo_window)),
    );

    let items = load_gold_set(&cfg.gold_set_path).await?;
    if items.is_empty() {
        bail!("gold set {} is empty", cfg.gold_set_path.display());
    }
    let progress = IndicatifProgress::bar(items.len() as u64);
    let summary = run_gold_eval(
        rt.engine.as_ref(),
        &items,
        cfg.gold_pass_threshold,
        &progress,
    )
    .await;
    persist_results(&cfg.gold_results_path, &summary).await?;
    println!(
        "run {}: {}/{} passed, {} errors, avg score {:.3}",
        summary.run_id, summary.passed, summary.total, summary.errors, summary.avg_score
    );

    drop(rt.engine);
    consumer.await.context("eval consumer panicked")?;
    Ok(())
}

fn print_slo(s: &SloSummary) {
    println!(
        "slo window {}s: {} requests, {} errors, avg {:.0}ms, p95 {:.0}ms, low evidence {:.1}%, degraded {:.1}%",
        s.window_secs,
        s.total,
        s.errors,
        s.avg_latency_ms,
        s.p95_latency_ms,
        s.low_evidence_rate * 100.0,
        s.degraded_rate * 100.0
    );
}
