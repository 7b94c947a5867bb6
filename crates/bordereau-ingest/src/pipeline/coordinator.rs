//! Manual reprocess and delete requests

use bordereau_common::text;
use bordereau_common::types::QueueStatus;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::queue::{QueueEntry, QueueStore, Transition, DELETE_NOTE};
use crate::storage::ObjectStore;

/// Attempts at settling a delete against an entry that keeps changing status.
pub const MAX_DELETE_ATTEMPTS: usize = 3;

/// What a delete did to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueAction {
    /// The entry had never completed a claim and was removed
    Deleted,
    /// The entry was soft-deleted
    MarkedDeleted,
    NotInQueue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub path: String,
    pub queue_action: QueueAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkDeleteFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkDeleteReport {
    pub succeeded: Vec<DeleteOutcome>,
    pub failed: Vec<BulkDeleteFailure>,
    pub total: usize,
}

pub struct Coordinator {
    store: Arc<dyn QueueStore>,
    objects: Arc<dyn ObjectStore>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn QueueStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { store, objects }
    }

    /// Requeue a FAILED or SUCCESS entry, clearing its outcome.
    #[instrument(skip(self))]
    pub async fn reprocess(&self, id: Uuid) -> PipelineResult<QueueEntry> {
        let entry = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("queue entry {}", id)))?;

        if !entry.status.allows_reprocess() {
            return Err(PipelineError::InvalidState {
                id,
                status: entry.status,
            });
        }

        let applied = self
            .store
            .compare_and_set_status(id, entry.status, QueueStatus::Pending, Transition::requeue())
            .await?;

        let fresh = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("queue entry {}", id)))?;

        if !applied {
            return Err(PipelineError::InvalidState {
                id,
                status: fresh.status,
            });
        }

        info!(entry_id = %id, path = %fresh.path, previous = %entry.status, "Entry requeued");
        Ok(fresh)
    }

    /// Remove the object from storage, then settle its queue entry.
    #[instrument(skip(self))]
    pub async fn delete(&self, path: &str) -> PipelineResult<DeleteOutcome> {
        self.delete_with_note(path, DELETE_NOTE).await
    }

    /// Delete each path independently. Per-path failures are collected, never raised.
    #[instrument(skip(self, paths), fields(total = paths.len()))]
    pub async fn bulk_delete(&self, paths: &[String]) -> BulkDeleteReport {
        let note = format!("{} (bulk delete)", DELETE_NOTE);
        let mut report = BulkDeleteReport {
            total: paths.len(),
            ..BulkDeleteReport::default()
        };

        for path in paths {
            match self.delete_with_note(path, &note).await {
                Ok(outcome) => report.succeeded.push(outcome),
                Err(e) => {
                    warn!(path = %path, error = %e, "Bulk delete item failed");
                    report.failed.push(BulkDeleteFailure {
                        path: path.clone(),
                        error: text::for_persistence(&e.to_string()),
                    });
                },
            }
        }

        info!(
            total = report.total,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Bulk delete complete"
        );

        report
    }

    async fn delete_with_note(&self, path: &str, note: &str) -> PipelineResult<DeleteOutcome> {
        self.objects.remove(path).await?;

        let queue_action = self.settle_entry(path, note).await?;
        info!(path = %path, action = ?queue_action, "File deleted");

        Ok(DeleteOutcome {
            path: path.to_string(),
            queue_action,
        })
    }

    async fn settle_entry(&self, path: &str, note: &str) -> PipelineResult<QueueAction> {
        for attempt in 1..=MAX_DELETE_ATTEMPTS {
            let Some(entry) = self.store.find_by_path(path).await? else {
                return Ok(QueueAction::NotInQueue);
            };

            let (applied, action) = if entry.status.removed_on_delete() {
                let removed = self.store.remove_if_status(entry.id, entry.status).await?;
                (removed, QueueAction::Deleted)
            } else {
                let marked = self
                    .store
                    .compare_and_set_status(
                        entry.id,
                        entry.status,
                        QueueStatus::Deleted,
                        Transition::soft_delete(note),
                    )
                    .await?;
                (marked, QueueAction::MarkedDeleted)
            };

            if applied {
                return Ok(action);
            }

            debug!(path = %path, attempt, status = %entry.status, "Entry changed during delete; retrying");
        }

        Err(PipelineError::Contention(format!(
            "entry for {} changed during {} delete attempts",
            path, MAX_DELETE_ATTEMPTS
        )))
    }
}
