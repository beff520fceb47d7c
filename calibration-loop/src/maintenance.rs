//! Self-heal and compaction actions.
//!
//! Every action reports the rows or indexes it touched and is safe to
//! re-run: against a store already in the target state it reports zero.

use std::time::Instant;

use futures::future::BoxFuture;
use rag_store::{RagError, RagStore};
use serde::Serialize;
use tracing::{info, instrument};

/// Store operations the ops loop relies on. [`RagStore`] in production.
pub trait MaintenanceTarget: Send + Sync {
    /// Creates missing payload indexes; returns how many were created.
    fn ensure_indexes(&self) -> BoxFuture<'_, Result<usize, RagError>>;
    /// Deletes rows that cannot serve as evidence; returns the count.
    fn purge_invalid(&self) -> BoxFuture<'_, Result<usize, RagError>>;
    /// Merges duplicate chunks; returns the deleted count.
    fn compact_duplicates(&self) -> BoxFuture<'_, Result<usize, RagError>>;
}

impl MaintenanceTarget for RagStore {
    fn ensure_indexes(&self) -> BoxFuture<'_, Result<usize, RagError>> {
        Box::pin(RagStore::ensure_indexes(self))
    }

    fn purge_invalid(&self) -> BoxFuture<'_, Result<usize, RagError>> {
        Box::pin(RagStore::purge_invalid(self))
    }

    fn compact_duplicates(&self) -> BoxFuture<'_, Result<usize, RagError>> {
        Box::pin(RagStore::compact_duplicates(self))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub indexes_created: usize,
    pub invalid_purged: usize,
    pub duplicates_removed: usize,
    pub elapsed_ms: u64,
}

impl MaintenanceReport {
    pub fn affected(&self) -> usize {
        self.indexes_created + self.invalid_purged + self.duplicates_removed
    }
}

/// Re-validates index consistency and removes unusable rows.
#[instrument(skip_all)]
pub async fn self_heal(store: &dyn MaintenanceTarget) -> Result<MaintenanceReport, RagError> {
    let started = Instant::now();
    let indexes_created = store.ensure_indexes().await?;
    let invalid_purged = store.purge_invalid().await?;
    let report = MaintenanceReport {
        indexes_created,
        invalid_purged,
        elapsed_ms: started.elapsed().as_millis() as u64,
        ..MaintenanceReport::default()
    };
    info!(
        indexes_created,
        invalid_purged,
        elapsed_ms = report.elapsed_ms,
        "self-heal done"
    );
    Ok(report)
}

/// Detects and merges duplicate chunks.
#[instrument(skip_all)]
pub async fn compact(store: &dyn MaintenanceTarget) -> Result<MaintenanceReport, RagError> {
    let started = Instant::now();
    let duplicates_removed = store.compact_duplicates().await?;
    let report = MaintenanceReport {
        duplicates_removed,
        elapsed_ms: started.elapsed().as_millis() as u64,
        ..MaintenanceReport::default()
    };
    info!(duplicates_removed, elapsed_ms = report.elapsed_ms, "compaction done");
    Ok(report)
}
