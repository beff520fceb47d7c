//! Append-only JSONL logs: evaluation events and operator feedback.
//!
//! The request path never touches these files. Events arrive over the
//! engine's bounded channel and are written by one consumer task.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use contextor::EvalEvent;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::CalibrationError;
use crate::records::Feedback;
use crate::slo::SloTracker;

/// Events drained per write.
const WRITE_BATCH: usize = 64;
/// Attempts per flush before the batch is held for the next one.
const WRITE_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(50);
/// Unwritten events kept across failed flushes; the oldest go first.
const MAX_PENDING: usize = 4096;

/// Appends one JSON document per line, creating the file and its parent.
pub async fn append_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), CalibrationError> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut buf = Vec::with_capacity(rows.len() * 256);
    for row in rows {
        serde_json::to_writer(&mut buf, row)?;
        buf.push(b'\n');
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| CalibrationError::io(parent, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| CalibrationError::io(path, e))?;
    file.write_all(&buf)
        .await
        .map_err(|e| CalibrationError::io(path, e))?;
    file.flush().await.map_err(|e| CalibrationError::io(path, e))
}

/// Reads every well-formed line; a missing file is an empty log.
///
/// Malformed lines (e.g. a torn final write) are skipped with a warning.
pub async fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, CalibrationError> {
    let text = match fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CalibrationError::io(path, e)),
    };

    let mut out = Vec::new();
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(v) => out.push(v),
            Err(e) => warn!(path = %path.display(), line = n + 1, error = %e, "skipping malformed log line"),
        }
    }
    Ok(out)
}

/// Evaluation-event log.
#[derive(Clone, Debug)]
pub struct EvalLog {
    path: PathBuf,
}

impl EvalLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, events: &[EvalEvent]) -> Result<(), CalibrationError> {
        append_jsonl(&self.path, events).await
    }

    pub async fn read_all(&self) -> Result<Vec<EvalEvent>, CalibrationError> {
        read_jsonl(&self.path).await
    }
}

/// Spawns the single consumer of the engine's evaluation channel.
///
/// Each event feeds the SLO window, then is appended to the log. A failed
/// append is retried with backoff; if it still fails the events stay
/// pending and ride along with the next flush (at most [`MAX_PENDING`]).
/// The task ends, returning the number of events persisted, once every
/// sender is dropped.
pub fn spawn_eval_consumer(
    mut rx: mpsc::Receiver<EvalEvent>,
    log: EvalLog,
    slo: Arc<SloTracker>,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut written = 0usize;
        let mut pending: Vec<EvalEvent> = Vec::with_capacity(WRITE_BATCH);

        while let Some(first) = rx.recv().await {
            let mut fresh = vec![first];
            while fresh.len() < WRITE_BATCH {
                match rx.try_recv() {
                    Ok(ev) => fresh.push(ev),
                    Err(_) => break,
                }
            }
            for ev in &fresh {
                slo.record(ev);
            }
            pending.extend(fresh);
            written += flush(&log, &mut pending).await;
        }

        if !pending.is_empty() {
            warn!(lost = pending.len(), path = %log.path().display(), "eval consumer stopped with unwritten events");
        }
        info!(written, "eval consumer stopped");
        written
    })
}

/// Appends `pending` with retries; returns how many events were written.
async fn flush(log: &EvalLog, pending: &mut Vec<EvalEvent>) -> usize {
    for attempt in 1..=WRITE_ATTEMPTS {
        match log.append(pending.as_slice()).await {
            Ok(()) => {
                let n = pending.len();
                pending.clear();
                debug!(events = n, attempt, "eval events persisted");
                return n;
            }
            Err(e) if attempt < WRITE_ATTEMPTS => {
                debug!(error = %e, attempt, "eval log append failed, retrying");
                tokio::time::sleep(RETRY_BASE * attempt).await;
            }
            Err(e) => warn!(error = %e, held = pending.len(), "eval log append failed, holding events"),
        }
    }
    if pending.len() > MAX_PENDING {
        let dropped = pending.len() - MAX_PENDING;
        pending.drain(..dropped);
        warn!(dropped, "eval backlog full, oldest events dropped");
    }
    0
}

/// Append-only operator ratings keyed by eval id.
#[derive(Clone, Debug)]
pub struct FeedbackLog {
    path: PathBuf,
}

impl FeedbackLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Appends a rating; the latest entry for an id wins on read.
    ///
    /// # Errors
    /// [`CalibrationError::Invalid`] for ratings outside `1..=5`.
    pub async fn record(
        &self,
        eval_id: Uuid,
        rating: Option<u8>,
        note: Option<String>,
    ) -> Result<Feedback, CalibrationError> {
        if let Some(r) = rating.filter(|r| !(1..=5).contains(r)) {
            return Err(CalibrationError::Invalid(format!(
                "rating must be in 1..=5, got {r}"
            )));
        }
        let fb = Feedback {
            eval_id,
            rating,
            note,
            ts: Utc::now(),
        };
        append_jsonl(&self.path, std::slice::from_ref(&fb)).await?;
        info!(%eval_id, ?rating, "feedback recorded");
        Ok(fb)
    }

    /// Current rating per eval id (cleared ratings map to `None`).
    pub async fn latest(&self) -> Result<HashMap<Uuid, Option<u8>>, CalibrationError> {
        let all: Vec<Feedback> = read_jsonl(&self.path).await?;
        Ok(all.into_iter().map(|f| (f.eval_id, f.rating)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use contextor::Route;

    #[tokio::test]
    async fn missing_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = EvalLog::new(dir.path().join("none.jsonl"));
        assert!(log.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn torn_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/ev.jsonl");
        let log = EvalLog::new(&path);
        let ev = EvalEvent::begin(Route::Query, "q", Instant::now());
        log.append(std::slice::from_ref(&ev)).await.unwrap();

        let mut f = OpenOptions::new().append(true).open(&path).await.unwrap();
        f.write_all(b"{\"eval_id\":").await.unwrap();

        let back = log.read_all().await.unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].eval_id, ev.eval_id);
    }

    #[tokio::test]
    async fn failed_append_is_held_for_the_next_flush() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("logs");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let log = EvalLog::new(blocker.join("eval.jsonl"));
        let slo = Arc::new(SloTracker::new(Duration::from_secs(3600)));
        let (sink, rx) = contextor::EvalSink::channel(8);
        let handle = spawn_eval_consumer(rx, log.clone(), slo.clone());

        assert!(sink.emit(EvalEvent::begin(Route::Answer, "first", Instant::now())));
        // Let every retry of the first flush fail.
        tokio::time::sleep(Duration::from_millis(600)).await;
        std::fs::remove_file(&blocker).unwrap();

        assert!(sink.emit(EvalEvent::begin(Route::Answer, "second", Instant::now())));
        drop(sink);

        assert_eq!(handle.await.unwrap(), 2);
        let queries: Vec<String> = log.read_all().await.unwrap().into_iter().map(|e| e.query).collect();
        assert_eq!(queries, vec!["first", "second"]);
        assert_eq!(slo.summary().total, 2);
    }

    #[tokio::test]
    async fn backlog_is_capped_to_the_newest_events() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("logs");
        std::fs::write(&blocker, b"x").unwrap();
        let log = EvalLog::new(blocker.join("eval.jsonl"));

        let mut pending: Vec<EvalEvent> = (0..MAX_PENDING + 5)
            .map(|i| EvalEvent::begin(Route::Query, &format!("q{i}"), Instant::now()))
            .collect();
        assert_eq!(flush(&log, &mut pending).await, 0);
        assert_eq!(pending.len(), MAX_PENDING);
        assert_eq!(pending[0].query, "q5");
    }

    #[tokio::test]
    async fn latest_feedback_wins() {
        let dir = tempfile::tempdir().unwrap();
        let fb = FeedbackLog::new(dir.path().join("fb.jsonl"));
        let id = Uuid::new_v4();
        fb.record(id, Some(2), None).await.unwrap();
        fb.record(id, Some(5), Some("good citations".into())).await.unwrap();
        assert!(fb.record(id, Some(9), None).await.is_err());

        let latest = fb.latest().await.unwrap();
        assert_eq!(latest.get(&id), Some(&Some(5)));
    }
}
