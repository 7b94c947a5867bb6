use async_trait::async_trait;
use bordereau_common::types::QueueStatus;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::types::{NewQueueEntry, QueueEntry, StatusCount, Transition};
use crate::error::{with_timeout, PipelineError, PipelineResult};

/// Durable repository of queue entries.
///
/// [`QueueStore::compare_and_set_status`] and [`QueueStore::complete_claim`]
/// are the only ways an entry changes status. A mismatched expected status is
/// a no-op that returns `false`; a transition outside the state machine is an
/// error and touches nothing.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Whether an active (non-DELETED) entry exists for `path`.
    async fn exists(&self, path: &str) -> PipelineResult<bool>;

    /// Insert a PENDING entry unless an active entry already holds the path.
    async fn insert(&self, entry: NewQueueEntry) -> PipelineResult<bool>;

    /// Entries in `status`, oldest discovery first.
    async fn list_by_status(
        &self,
        status: QueueStatus,
        tenant: Option<&str>,
        limit: i64,
    ) -> PipelineResult<Vec<QueueEntry>>;

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: QueueStatus,
        new: QueueStatus,
        transition: Transition,
    ) -> PipelineResult<bool>;

    /// Settle a claim: PROCESSING to `new`, applied only while the entry still
    /// carries `claimed_at` as its `processed_at`. Once the entry has been
    /// reset and claimed again the stamp differs and this returns `false`.
    async fn complete_claim(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        new: QueueStatus,
        transition: Transition,
    ) -> PipelineResult<bool>;

    async fn get(&self, id: Uuid) -> PipelineResult<Option<QueueEntry>>;

    /// The active entry for `path`, if any.
    async fn find_by_path(&self, path: &str) -> PipelineResult<Option<QueueEntry>>;

    /// Entries of every status, most recently discovered first.
    async fn list(&self, tenant: Option<&str>, limit: i64) -> PipelineResult<Vec<QueueEntry>>;

    /// PROCESSING entries whose `processed_at` is missing or older than `cutoff`.
    async fn stale_processing(&self, cutoff: DateTime<Utc>) -> PipelineResult<Vec<QueueEntry>>;

    /// Delete the row if it is still in `expected`, which must be PENDING or FAILED.
    async fn remove_if_status(&self, id: Uuid, expected: QueueStatus) -> PipelineResult<bool>;

    async fn status_counts(&self, tenant: Option<&str>) -> PipelineResult<Vec<StatusCount>>;
}

/// Reject a removal from a status whose entries must be kept as history.
pub(crate) fn ensure_removable(expected: QueueStatus) -> PipelineResult<()> {
    if expected.removed_on_delete() {
        Ok(())
    } else {
        Err(PipelineError::PolicyViolation(format!(
            "{} entries are soft-deleted, not removed",
            expected
        )))
    }
}

/// Applies a deadline to every call of the wrapped store.
pub struct TimeoutQueueStore {
    inner: Arc<dyn QueueStore>,
    timeout: Duration,
}

impl TimeoutQueueStore {
    pub fn new(inner: Arc<dyn QueueStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl QueueStore for TimeoutQueueStore {
    async fn exists(&self, path: &str) -> PipelineResult<bool> {
        with_timeout("queue exists", self.timeout, self.inner.exists(path)).await
    }

    async fn insert(&self, entry: NewQueueEntry) -> PipelineResult<bool> {
        with_timeout("queue insert", self.timeout, self.inner.insert(entry)).await
    }

    async fn list_by_status(
        &self,
        status: QueueStatus,
        tenant: Option<&str>,
        limit: i64,
    ) -> PipelineResult<Vec<QueueEntry>> {
        with_timeout(
            "queue list by status",
            self.timeout,
            self.inner.list_by_status(status, tenant, limit),
        )
        .await
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: QueueStatus,
        new: QueueStatus,
        transition: Transition,
    ) -> PipelineResult<bool> {
        with_timeout(
            "queue compare-and-set",
            self.timeout,
            self.inner.compare_and_set_status(id, expected, new, transition),
        )
        .await
    }

    async fn complete_claim(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        new: QueueStatus,
        transition: Transition,
    ) -> PipelineResult<bool> {
        with_timeout(
            "queue complete claim",
            self.timeout,
            self.inner.complete_claim(id, claimed_at, new, transition),
        )
        .await
    }

    async fn get(&self, id: Uuid) -> PipelineResult<Option<QueueEntry>> {
        with_timeout("queue get", self.timeout, self.inner.get(id)).await
    }

    async fn find_by_path(&self, path: &str) -> PipelineResult<Option<QueueEntry>> {
        with_timeout("queue find by path", self.timeout, self.inner.find_by_path(path)).await
    }

    async fn list(&self, tenant: Option<&str>, limit: i64) -> PipelineResult<Vec<QueueEntry>> {
        with_timeout("queue list", self.timeout, self.inner.list(tenant, limit)).await
    }

    async fn stale_processing(&self, cutoff: DateTime<Utc>) -> PipelineResult<Vec<QueueEntry>> {
        with_timeout("queue stale scan", self.timeout, self.inner.stale_processing(cutoff)).await
    }

    async fn remove_if_status(&self, id: Uuid, expected: QueueStatus) -> PipelineResult<bool> {
        with_timeout(
            "queue remove",
            self.timeout,
            self.inner.remove_if_status(id, expected),
        )
        .await
    }

    async fn status_counts(&self, tenant: Option<&str>) -> PipelineResult<Vec<StatusCount>> {
        with_timeout("queue status counts", self.timeout, self.inner.status_counts(tenant)).await
    }
}
