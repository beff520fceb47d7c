//! Progress reporting for gold runs.
//!
//! `NoopProgress` for scheduled runs, `IndicatifProgress` when an operator
//! runs the gold set from a terminal.

use indicatif::{ProgressBar, ProgressStyle};

pub trait Progress: Send + Sync {
    fn set_total(&self, _n: u64) {}
    /// Advance by one item and show a short message.
    fn step(&self, _msg: &str) {}
    fn finish(&self, _msg: &str) {}
}

#[derive(Default, Clone, Copy)]
pub struct NoopProgress;
impl Progress for NoopProgress {}

pub struct IndicatifProgress {
    pb: ProgressBar,
}

impl IndicatifProgress {
    /// Bounded bar; falls back to the default style if the template is rejected.
    pub fn bar(len: u64) -> Self {
        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}/{len:3} {msg}") {
            pb.set_style(style);
        }
        Self { pb }
    }
}

impl Progress for IndicatifProgress {
    fn set_total(&self, n: u64) {
        self.pb.set_length(n);
    }
    fn step(&self, msg: &str) {
        self.pb.inc(1);
        self.pb.set_message(msg.to_string());
    }
    fn finish(&self, msg: &str) {
        self.pb.finish_with_message(msg.to_string());
    }
}
