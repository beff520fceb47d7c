//! Rolling-window SLO aggregates over recent requests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use contextor::{EvalEvent, Origin, Outcome};
use serde::Serialize;

#[derive(Clone, Copy, Debug)]
struct Sample {
    ts: DateTime<Utc>,
    latency_ms: u64,
    low_evidence: Option<bool>,
    error: bool,
    degraded: bool,
}

impl From<&EvalEvent> for Sample {
    fn from(ev: &EvalEvent) -> Self {
        Self {
            ts: ev.ts,
            latency_ms: ev.latency_ms,
            low_evidence: ev.low_evidence,
            error: matches!(ev.outcome, Outcome::Error { .. }),
            degraded: ev.degraded.any(),
        }
    }
}

/// Read-only operator view of the window.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SloSummary {
    pub window_secs: u64,
    pub total: usize,
    pub errors: usize,
    pub avg_latency_ms: f64,
    /// Linear-interpolated 95th percentile.
    pub p95_latency_ms: f64,
    /// Share of requests that reached selection and were flagged low evidence.
    pub low_evidence_rate: f64,
    pub error_rate: f64,
    /// Share of requests served with lexical or rerank degradation.
    pub degraded_rate: f64,
}

/// In-memory window fed by the eval consumer.
#[derive(Debug)]
pub struct SloTracker {
    window: Duration,
    samples: Mutex<VecDeque<Sample>>,
}

impl SloTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Preloads the window from persisted events (e.g. at startup).
    pub fn seed<'a>(&self, events: impl IntoIterator<Item = &'a EvalEvent>) {
        let now = Utc::now();
        let mut fresh: Vec<Sample> = events
            .into_iter()
            .filter(|ev| counts(ev))
            .map(Sample::from)
            .filter(|s| self.in_window(s, now))
            .collect();
        fresh.sort_by_key(|s| s.ts);
        let mut q = self.lock();
        q.extend(fresh);
    }

    /// Gold-set replays are ignored.
    pub fn record(&self, ev: &EvalEvent) {
        if !counts(ev) {
            return;
        }
        let mut q = self.lock();
        q.push_back(Sample::from(ev));
        let now = Utc::now();
        while q.front().is_some_and(|s| !self.in_window(s, now)) {
            q.pop_front();
        }
    }

    /// Aggregates over requests inside the window ending now.
    pub fn summary(&self) -> SloSummary {
        self.summary_at(Utc::now())
    }

    pub fn summary_at(&self, now: DateTime<Utc>) -> SloSummary {
        let q = self.lock();
        let live: Vec<Sample> = q.iter().filter(|s| self.in_window(s, now)).copied().collect();
        summarize(&live, self.window)
    }

    fn in_window(&self, s: &Sample, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(s.ts);
        age.to_std().map_or(true, |a| a <= self.window)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Sample>> {
        self.samples.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn counts(ev: &EvalEvent) -> bool {
    ev.origin == Origin::Live
}

fn summarize(samples: &[Sample], window: Duration) -> SloSummary {
    let total = samples.len();
    if total == 0 {
        return SloSummary {
            window_secs: window.as_secs(),
            ..SloSummary::default()
        };
    }

    let mut lat: Vec<u64> = samples.iter().map(|s| s.latency_ms).collect();
    lat.sort_unstable();
    let avg = lat.iter().sum::<u64>() as f64 / total as f64;

    let errors = samples.iter().filter(|s| s.error).count();
    let flagged: Vec<bool> = samples.iter().filter_map(|s| s.low_evidence).collect();
    let low_rate = if flagged.is_empty() {
        0.0
    } else {
        flagged.iter().filter(|b| **b).count() as f64 / flagged.len() as f64
    };

    SloSummary {
        window_secs: window.as_secs(),
        total,
        errors,
        avg_latency_ms: avg,
        p95_latency_ms: percentile(&lat, 0.95),
        low_evidence_rate: low_rate,
        error_rate: errors as f64 / total as f64,
        degraded_rate: samples.iter().filter(|s| s.degraded).count() as f64 / total as f64,
    }
}

/// `sorted` must be ascending and non-empty.
fn percentile(sorted: &[u64], p: f64) -> f64 {
    let pos = p * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let (a, b) = (sorted[lo] as f64, sorted[hi] as f64);
    a + (b - a) * (pos - lo as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use contextor::Route;

    fn event(latency_ms: u64, low: Option<bool>, ok: bool) -> EvalEvent {
        let mut ev = EvalEvent::begin(Route::Answer, "q", Instant::now());
        ev.latency_ms = latency_ms;
        ev.low_evidence = low;
        if !ok {
            ev.outcome = Outcome::Error {
                message: "vector search failed".into(),
                retryable: true,
            };
        }
        ev
    }

    #[test]
    fn empty_window_is_zeroed() {
        let t = SloTracker::new(Duration::from_secs(60));
        let s = t.summary();
        assert_eq!(s.total, 0);
        assert_eq!(s.window_secs, 60);
        assert_eq!(s.p95_latency_ms, 0.0);
    }

    #[test]
    fn aggregates_latency_and_rates() {
        let t = SloTracker::new(Duration::from_secs(3600));
        for ms in 1..=100 {
            t.record(&event(ms, Some(ms % 4 == 0), true));
        }
        t.record(&event(500, None, false));

        let s = t.summary();
        assert_eq!(s.total, 101);
        assert_eq!(s.errors, 1);
        assert!((s.low_evidence_rate - 0.25).abs() < 1e-9);
        assert!(s.p95_latency_ms > 95.0 && s.p95_latency_ms < 101.0);
        assert!((s.error_rate - 1.0 / 101.0).abs() < 1e-9);
    }

    #[test]
    fn old_samples_leave_the_window() {
        let t = SloTracker::new(Duration::from_secs(60));
        let mut old = event(10, Some(true), true);
        old.ts = Utc::now() - chrono::Duration::seconds(600);
        t.seed([&old]);
        t.record(&event(20, Some(false), true));

        let s = t.summary();
        assert_eq!(s.total, 1);
        assert_eq!(s.avg_latency_ms, 20.0);
    }

    #[test]
    fn gold_replays_stay_out_of_the_window() {
        let t = SloTracker::new(Duration::from_secs(3600));
        let mut gold = event(9_000, Some(true), false);
        gold.origin = Origin::Gold;
        t.seed([&gold]);
        t.record(&gold);
        t.record(&event(40, Some(false), true));

        let s = t.summary();
        assert_eq!(s.total, 1);
        assert_eq!(s.errors, 0);
        assert_eq!(s.avg_latency_ms, 40.0);
    }

    #[test]
    fn percentile_interpolates() {
        assert_eq!(percentile(&[10], 0.95), 10.0);
        assert!((percentile(&[0, 100], 0.95) - 95.0).abs() < 1e-9);
    }
}
