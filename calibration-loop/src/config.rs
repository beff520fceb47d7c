//! Ops-loop configuration from environment variables.
//!
//! - `EVAL_LOG_PATH` (`data/eval_log.jsonl`), `FEEDBACK_LOG_PATH` (`data/feedback.jsonl`)
//! - `GOLD_SET_PATH` (`data/gold_set.jsonl`), `GOLD_RESULTS_PATH` (`data/gold_results.jsonl`)
//! - `CALIBRATION_STATE_PATH` (`data/calibration.json`)
//! - `GOLD_PASS_THRESHOLD` (0.6), `CALIBRATION_TARGET_FALSE_HEDGE` (0.1)
//! - `CALIBRATION_MIN_SAMPLES` (5), `CALIBRATION_WINDOW` (200 most recent gold runs)
//! - `SLO_WINDOW_SECS` (86400), `SLO_REPORT_INTERVAL_SECS` (300, 0 = disabled)
//! - `COMPACT_INTERVAL_SECS`, `CALIBRATION_INTERVAL_SECS` (0 = disabled)
//! - `EVAL_CHANNEL_CAPACITY` (1024)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::CalibrationError;

#[derive(Clone, Debug)]
pub struct CalibrationConfig {
    pub eval_log_path: PathBuf,
    pub feedback_log_path: PathBuf,
    pub gold_set_path: PathBuf,
    pub gold_results_path: PathBuf,
    pub state_path: PathBuf,

    /// Combined gold score at or above which an item passes.
    pub gold_pass_threshold: f32,
    /// Share of passing gold answers allowed to be hedged.
    pub target_false_hedge: f32,
    pub min_samples: usize,
    /// Number of most recent gold runs considered by calibration.
    pub calibration_window: usize,

    pub slo_window: Duration,
    /// How often the ops loop logs the SLO summary.
    pub slo_report_interval: Option<Duration>,
    pub compact_interval: Option<Duration>,
    pub calibration_interval: Option<Duration>,
    pub eval_channel_capacity: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            eval_log_path: PathBuf::from("data/eval_log.jsonl"),
            feedback_log_path: PathBuf::from("data/feedback.jsonl"),
            gold_set_path: PathBuf::from("data/gold_set.jsonl"),
            gold_results_path: PathBuf::from("data/gold_results.jsonl"),
            state_path: PathBuf::from("data/calibration.json"),
            gold_pass_threshold: 0.6,
            target_false_hedge: 0.1,
            min_samples: 5,
            calibration_window: 200,
            slo_window: Duration::from_secs(86_400),
            slo_report_interval: Some(Duration::from_secs(300)),
            compact_interval: None,
            calibration_interval: None,
            eval_channel_capacity: 1024,
        }
    }
}

impl CalibrationConfig {
    pub fn from_env() -> Result<Self, CalibrationError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(get: F) -> Result<Self, CalibrationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let raw = |k: &str| {
            get(k)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let path = |k: &str, dflt: PathBuf| raw(k).map(PathBuf::from).unwrap_or(dflt);

        let cfg = Self {
            eval_log_path: path("EVAL_LOG_PATH", d.eval_log_path),
            feedback_log_path: path("FEEDBACK_LOG_PATH", d.feedback_log_path),
            gold_set_path: path("GOLD_SET_PATH", d.gold_set_path),
            gold_results_path: path("GOLD_RESULTS_PATH", d.gold_results_path),
            state_path: path("CALIBRATION_STATE_PATH", d.state_path),
            gold_pass_threshold: parse(&raw, "GOLD_PASS_THRESHOLD", d.gold_pass_threshold)?,
            target_false_hedge: parse(&raw, "CALIBRATION_TARGET_FALSE_HEDGE", d.target_false_hedge)?,
            min_samples: parse(&raw, "CALIBRATION_MIN_SAMPLES", d.min_samples)?,
            calibration_window: parse(&raw, "CALIBRATION_WINDOW", d.calibration_window)?,
            slo_window: Duration::from_secs(parse(
                &raw,
                "SLO_WINDOW_SECS",
                d.slo_window.as_secs(),
            )?),
            slo_report_interval: interval(
                &raw,
                "SLO_REPORT_INTERVAL_SECS",
                d.slo_report_interval.map_or(0, |i| i.as_secs()),
            )?,
            compact_interval: interval(&raw, "COMPACT_INTERVAL_SECS", 0)?,
            calibration_interval: interval(&raw, "CALIBRATION_INTERVAL_SECS", 0)?,
            eval_channel_capacity: parse(&raw, "EVAL_CHANNEL_CAPACITY", d.eval_channel_capacity)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        for (name, v) in [
            ("GOLD_PASS_THRESHOLD", self.gold_pass_threshold),
            ("CALIBRATION_TARGET_FALSE_HEDGE", self.target_false_hedge),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(CalibrationError::Config(format!(
                    "{name} must be in [0, 1], got {v}"
                )));
            }
        }
        if self.slo_window.is_zero() {
            return Err(CalibrationError::Config("SLO_WINDOW_SECS must be >= 1".into()));
        }
        if self.eval_channel_capacity == 0 {
            return Err(CalibrationError::Config(
                "EVAL_CHANNEL_CAPACITY must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

fn parse<T: FromStr>(
    raw: &impl Fn(&str) -> Option<String>,
    k: &str,
    dflt: T,
) -> Result<T, CalibrationError> {
    match raw(k) {
        None => Ok(dflt),
        Some(v) => v
            .parse()
            .map_err(|_| CalibrationError::Config(format!("{k}: cannot parse '{v}'"))),
    }
}

/// Seconds; zero disables the job.
fn interval(
    raw: &impl Fn(&str) -> Option<String>,
    k: &str,
    dflt_secs: u64,
) -> Result<Option<Duration>, CalibrationError> {
    let secs: u64 = parse(raw, k, dflt_secs)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_disable_scheduled_jobs() {
        let cfg = CalibrationConfig::from_lookup(lookup(&[])).unwrap();
        assert!(cfg.compact_interval.is_none());
        assert!(cfg.calibration_interval.is_none());
        assert_eq!(cfg.slo_report_interval, Some(Duration::from_secs(300)));
        assert_eq!(cfg.slo_window, Duration::from_secs(86_400));
        assert!((cfg.gold_pass_threshold - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn intervals_and_paths_are_read() {
        let cfg = CalibrationConfig::from_lookup(lookup(&[
            ("COMPACT_INTERVAL_SECS", "3600"),
            ("CALIBRATION_INTERVAL_SECS", "0"),
            ("EVAL_LOG_PATH", "/tmp/ev.jsonl"),
        ]))
        .unwrap();
        assert_eq!(cfg.compact_interval, Some(Duration::from_secs(3600)));
        assert!(cfg.calibration_interval.is_none());
        assert_eq!(cfg.eval_log_path, PathBuf::from("/tmp/ev.jsonl"));
    }

    #[test]
    fn out_of_range_target_is_rejected() {
        let err = CalibrationConfig::from_lookup(lookup(&[("CALIBRATION_TARGET_FALSE_HEDGE", "1.5")]))
            .unwrap_err();
        assert!(err.to_string().contains("CALIBRATION_TARGET_FALSE_HEDGE"));

        assert!(CalibrationConfig::from_lookup(lookup(&[("SLO_WINDOW_SECS", "soon")])).is_err());
    }
}
