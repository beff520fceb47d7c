//! Interval-driven ops jobs, off the request path.
//!
//! - compaction: self-heal then duplicate compaction
//! - calibration: gold run, then threshold recalibration over recent runs
//! - SLO report: logs the rolling summary
//!
//! A job failure is logged and retried on the next tick. Ticks missed while
//! a job runs are skipped, so jobs never overlap.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{error, info};

use crate::calibrate::{CalibrationOutcome, Calibrator};
use crate::config::CalibrationConfig;
use crate::error::CalibrationError;
use crate::gold::{AnswerTarget, load_gold_set, persist_results, recent_results, run_gold_eval};
use crate::maintenance::{MaintenanceReport, MaintenanceTarget, compact, self_heal};
use crate::progress::NoopProgress;
use crate::slo::SloTracker;

pub struct OpsLoop {
    cfg: CalibrationConfig,
    store: Arc<dyn MaintenanceTarget>,
    target: Arc<dyn AnswerTarget>,
    calibrator: Calibrator,
    slo: Arc<SloTracker>,
}

impl OpsLoop {
    pub fn new(
        cfg: CalibrationConfig,
        store: Arc<dyn MaintenanceTarget>,
        target: Arc<dyn AnswerTarget>,
        calibrator: Calibrator,
        slo: Arc<SloTracker>,
    ) -> Self {
        Self {
            cfg,
            store,
            target,
            calibrator,
            slo,
        }
    }

    /// Self-heal followed by compaction; counts are merged into one report.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport, CalibrationError> {
        let heal = self_heal(self.store.as_ref()).await?;
        let comp = compact(self.store.as_ref()).await?;
        Ok(MaintenanceReport {
            indexes_created: heal.indexes_created,
            invalid_purged: heal.invalid_purged,
            duplicates_removed: comp.duplicates_removed,
            elapsed_ms: heal.elapsed_ms + comp.elapsed_ms,
        })
    }

    /// Runs the gold set (if any) and recalibrates from the recent window.
    pub async fn run_calibration(&self) -> Result<CalibrationOutcome, CalibrationError> {
        let items = load_gold_set(&self.cfg.gold_set_path).await?;
        if items.is_empty() {
            info!(path = %self.cfg.gold_set_path.display(), "gold set empty, calibrating from history");
        } else {
            let summary = run_gold_eval(
                self.target.as_ref(),
                &items,
                self.cfg.gold_pass_threshold,
                &NoopProgress,
            )
            .await;
            persist_results(&self.cfg.gold_results_path, &summary).await?;
        }

        let recent = recent_results(&self.cfg.gold_results_path, self.cfg.calibration_window).await?;
        self.calibrator.calibrate(&recent).await
    }

    /// Runs until `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut maintenance = ticker(self.cfg.compact_interval);
            let mut calibration = ticker(self.cfg.calibration_interval);
            let mut report = ticker(self.cfg.slo_report_interval);
            info!(
                compact_secs = self.cfg.compact_interval.map(|d| d.as_secs()),
                calibration_secs = self.cfg.calibration_interval.map(|d| d.as_secs()),
                "ops loop started"
            );

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = tick(&mut maintenance) => match self.run_maintenance().await {
                        Ok(r) => info!(affected = r.affected(), "scheduled maintenance done"),
                        Err(e) => error!(error = %e, "scheduled maintenance failed"),
                    },
                    _ = tick(&mut calibration) => match self.run_calibration().await {
                        Ok(CalibrationOutcome::Published(s)) => {
                            info!(threshold = s.threshold, samples = s.samples, "scheduled calibration published");
                        }
                        Ok(CalibrationOutcome::Skipped { samples }) => {
                            info!(samples, "scheduled calibration skipped");
                        }
                        Err(e) => error!(error = %e, "scheduled calibration failed"),
                    },
                    _ = tick(&mut report) => {
                        let s = self.slo.summary();
                        info!(
                            total = s.total,
                            errors = s.errors,
                            avg_latency_ms = s.avg_latency_ms,
                            p95_latency_ms = s.p95_latency_ms,
                            low_evidence_rate = s.low_evidence_rate,
                            degraded_rate = s.degraded_rate,
                            "slo summary"
                        );
                    }
                }
            }
            info!("ops loop stopped");
        })
    }
}

/// First tick after one full period.
fn ticker(period: Option<Duration>) -> Option<Interval> {
    period.map(|p| {
        let mut i = interval_at(Instant::now() + p, p);
        i.set_missed_tick_behavior(MissedTickBehavior::Skip);
        i
    })
}

async fn tick(i: &mut Option<Interval>) {
    match i {
        Some(i) => {
            i.tick().await;
        }
        None => future::pending::<()>().await,
    }
}
