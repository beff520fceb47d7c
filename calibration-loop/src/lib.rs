//! Calibration and ops loop for the answer engine.
//!
//! Runs beside the request path and only reads its output through the
//! evaluation channel:
//! - [`eval_log`]: JSONL persistence of evaluation events and operator feedback
//! - [`gold`]: labeled query battery scored with [`metrics`]
//! - [`calibrate`]: low-evidence threshold from gold-run confidences
//! - [`slo`]: rolling latency / low-evidence aggregates
//! - [`maintenance`]: idempotent self-heal and compaction
//! - [`scheduler`]: interval-driven runner for the above

pub mod calibrate;
pub mod config;
pub mod error;
pub mod eval_log;
pub mod gold;
pub mod maintenance;
pub mod metrics;
pub mod progress;
pub mod records;
pub mod scheduler;
pub mod slo;

pub use calibrate::{CalibrationOutcome, Calibrator, load_state, restore_threshold, save_state};
pub use config::CalibrationConfig;
pub use error::CalibrationError;
pub use eval_log::{EvalLog, FeedbackLog, spawn_eval_consumer};
pub use gold::{AnswerTarget, GoldSummary, load_gold_set, run_gold_eval};
pub use maintenance::{MaintenanceReport, MaintenanceTarget, compact, self_heal};
pub use progress::{IndicatifProgress, NoopProgress, Progress};
pub use records::{CalibrationState, Feedback, GoldItem, GoldRunRecord};
pub use scheduler::OpsLoop;
pub use slo::{SloSummary, SloTracker};
