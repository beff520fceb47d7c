//! Low-evidence threshold calibration.
//!
//! A *false hedge* is a gold answer that passed but was flagged low evidence.
//! The threshold is set to the `target` quantile of the confidences of
//! passing answers, so that about `target` of them fall below it.

use std::path::{Path, PathBuf};

use chrono::Utc;
use contextor::{ThresholdPublisher, ThresholdSnapshot, ThresholdSource};
use tokio::fs;
use tracing::{info, warn};

use crate::error::CalibrationError;
use crate::records::{CalibrationState, GoldRunRecord};

/// Calibrated thresholds never leave this range.
pub const THRESHOLD_FLOOR: f32 = 0.05;
pub const THRESHOLD_CEIL: f32 = 0.95;

#[derive(Clone, Debug, PartialEq)]
pub enum CalibrationOutcome {
    Published(CalibrationState),
    /// Too few passing gold answers with a confidence; threshold unchanged.
    Skipped { samples: usize },
}

/// Quantile of `confidences` at `target`, clamped to the allowed range.
///
/// `confidences` must be non-empty; non-finite values are ignored.
pub fn false_hedge_threshold(confidences: &[f32], target: f32) -> Option<f32> {
    let mut v: Vec<f32> = confidences.iter().copied().filter(|c| c.is_finite()).collect();
    if v.is_empty() {
        return None;
    }
    v.sort_by(f32::total_cmp);
    let idx = ((target.clamp(0.0, 1.0) * v.len() as f32).floor() as usize).min(v.len() - 1);
    Some(v[idx].clamp(THRESHOLD_FLOOR, THRESHOLD_CEIL))
}

pub struct Calibrator {
    publisher: ThresholdPublisher,
    state_path: PathBuf,
    target: f32,
    min_samples: usize,
}

impl Calibrator {
    pub fn new(
        publisher: ThresholdPublisher,
        state_path: impl Into<PathBuf>,
        target: f32,
        min_samples: usize,
    ) -> Self {
        Self {
            publisher,
            state_path: state_path.into(),
            target,
            min_samples: min_samples.max(1),
        }
    }

    pub fn current(&self) -> ThresholdSnapshot {
        self.publisher.current()
    }

    /// Recomputes the threshold from `records`, publishes and persists it.
    pub async fn calibrate(
        &self,
        records: &[GoldRunRecord],
    ) -> Result<CalibrationOutcome, CalibrationError> {
        let passing: Vec<&GoldRunRecord> = records
            .iter()
            .filter(|r| r.passed && r.error.is_none())
            .filter(|r| r.confidence.is_some_and(f32::is_finite))
            .collect();
        let confidences: Vec<f32> = passing.iter().filter_map(|r| r.confidence).collect();

        if confidences.len() < self.min_samples {
            info!(
                samples = confidences.len(),
                min_samples = self.min_samples,
                "calibration skipped: not enough passing gold answers"
            );
            return Ok(CalibrationOutcome::Skipped {
                samples: confidences.len(),
            });
        }

        let hedged = passing
            .iter()
            .filter(|r| r.low_evidence == Some(true))
            .count();
        let Some(threshold) = false_hedge_threshold(&confidences, self.target) else {
            return Ok(CalibrationOutcome::Skipped { samples: 0 });
        };

        let state = CalibrationState {
            threshold,
            samples: confidences.len(),
            target_false_hedge: self.target,
            last_run: Utc::now(),
        };
        save_state(&self.state_path, &state).await?;
        let snap = self.publisher.publish(threshold, ThresholdSource::Calibration);

        info!(
            threshold,
            version = snap.version,
            samples = state.samples,
            observed_false_hedge = hedged as f32 / confidences.len() as f32,
            target = self.target,
            "threshold calibrated"
        );
        Ok(CalibrationOutcome::Published(state))
    }
}

/// Reads the persisted state; `None` when absent.
pub async fn load_state(path: &Path) -> Result<Option<CalibrationState>, CalibrationError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CalibrationError::io(path, e)),
    }
}

/// Writes via a sibling temp file and rename.
pub async fn save_state(path: &Path, state: &CalibrationState) -> Result<(), CalibrationError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| CalibrationError::io(parent, e))?;
    }
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(state)?;
    fs::write(&tmp, body)
        .await
        .map_err(|e| CalibrationError::io(&tmp, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| CalibrationError::io(path, e))
}

/// Republishes a persisted threshold at startup. A corrupt state file is
/// logged and ignored so the configured threshold stays in effect.
pub async fn restore_threshold(
    publisher: &ThresholdPublisher,
    path: &Path,
) -> Option<ThresholdSnapshot> {
    match load_state(path).await {
        Ok(Some(state)) => {
            info!(threshold = state.threshold, last_run = %state.last_run, "calibration state restored");
            Some(publisher.publish(state.threshold, ThresholdSource::Calibration))
        }
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, path = %path.display(), "calibration state unreadable, using configured threshold");
            None
        }
    }
}
