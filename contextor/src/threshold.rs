//! Low-evidence threshold shared between the request path and calibration.
//!
//! The value is an immutable snapshot behind a `watch` channel: requests
//! copy the current snapshot once at start, the calibration loop replaces it
//! wholesale. A request never observes a half-applied update.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::info;

/// Where a threshold value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThresholdSource {
    Config,
    Calibration,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThresholdSnapshot {
    pub value: f32,
    /// Incremented on every publish.
    pub version: u64,
    pub source: ThresholdSource,
    pub published_at: DateTime<Utc>,
}

/// Write side, held by the calibration loop.
#[derive(Clone)]
pub struct ThresholdPublisher {
    tx: Arc<watch::Sender<ThresholdSnapshot>>,
}

/// Read side, held by the engine.
#[derive(Clone)]
pub struct ThresholdReader {
    rx: watch::Receiver<ThresholdSnapshot>,
}

/// Creates a channel seeded with the configured threshold.
pub fn threshold_channel(initial: f32) -> (ThresholdPublisher, ThresholdReader) {
    let (tx, rx) = watch::channel(ThresholdSnapshot {
        value: initial.clamp(0.0, 1.0),
        version: 0,
        source: ThresholdSource::Config,
        published_at: Utc::now(),
    });
    (ThresholdPublisher { tx: Arc::new(tx) }, ThresholdReader { rx })
}

impl ThresholdPublisher {
    /// Replaces the snapshot; returns the new one. Values are clamped to `[0, 1]`.
    pub fn publish(&self, value: f32, source: ThresholdSource) -> ThresholdSnapshot {
        let prev = *self.tx.borrow();
        let next = ThresholdSnapshot {
            value: value.clamp(0.0, 1.0),
            version: prev.version + 1,
            source,
            published_at: Utc::now(),
        };
        self.tx.send_replace(next);
        info!(
            old = prev.value,
            new = next.value,
            version = next.version,
            ?source,
            "low-evidence threshold published"
        );
        next
    }

    pub fn current(&self) -> ThresholdSnapshot {
        *self.tx.borrow()
    }

    pub fn reader(&self) -> ThresholdReader {
        ThresholdReader {
            rx: self.tx.subscribe(),
        }
    }
}

impl ThresholdReader {
    pub fn current(&self) -> ThresholdSnapshot {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_see_published_snapshot() {
        let (publisher, reader) = threshold_channel(0.6);
        let before = reader.current();
        assert_eq!(before.value, 0.6);
        assert_eq!(before.source, ThresholdSource::Config);

        publisher.publish(0.45, ThresholdSource::Calibration);
        let after = reader.current();
        assert_eq!(after.value, 0.45);
        assert_eq!(after.version, 1);
        // The copy taken earlier is unaffected.
        assert_eq!(before.value, 0.6);
        assert_eq!(publisher.reader().current().version, 1);
    }

    #[test]
    fn values_are_clamped() {
        let (publisher, reader) = threshold_channel(3.0);
        assert_eq!(reader.current().value, 1.0);
        publisher.publish(-1.0, ThresholdSource::Calibration);
        assert_eq!(reader.current().value, 0.0);
    }
}
