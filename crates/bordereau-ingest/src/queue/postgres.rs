//! Postgres-backed queue store
//!
//! Every status change is a single conditional UPDATE on
//! `file_processing_queue`; the affected row count tells the caller whether
//! it won the compare-and-set.

use async_trait::async_trait;
use bordereau_common::types::QueueStatus;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use super::store::{ensure_removable, QueueStore};
use super::types::{NewQueueEntry, QueueEntry, QueueRow, StatusCount, StatusCountRow, Transition};
use crate::error::{PipelineError, PipelineResult};

const ENTRY_COLUMNS: &str = "id, path, tenant, kind, size_bytes, status, discovered_at, \
                             processed_at, result_text, error_text, note, retry_count";

fn into_entries(rows: Vec<QueueRow>) -> PipelineResult<Vec<QueueEntry>> {
    rows.into_iter()
        .map(|row| QueueEntry::try_from(row).map_err(PipelineError::from))
        .collect()
}

#[derive(Clone)]
pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Conditional status UPDATE. With `claimed_at` set, the row must also
    /// still carry that claim stamp in `processed_at`.
    async fn update_status(
        &self,
        id: Uuid,
        expected: QueueStatus,
        claimed_at: Option<DateTime<Utc>>,
        new: QueueStatus,
        transition: Transition,
    ) -> PipelineResult<bool> {
        expected.ensure_transition(new)?;

        let (keep_processed_at, processed_at) = transition.processed_at.bind_parts();
        let (keep_result, result_text) = transition.result_text.bind_parts();
        let (keep_error, error_text) = transition.error_text.bind_parts();
        let (keep_note, note) = transition.note.bind_parts();

        let result = sqlx::query(
            r#"
            UPDATE file_processing_queue
            SET status = $3,
                processed_at = CASE WHEN $4::boolean THEN processed_at ELSE $5::timestamptz END,
                result_text = CASE WHEN $6::boolean THEN result_text ELSE $7::text END,
                error_text = CASE WHEN $8::boolean THEN error_text ELSE $9::text END,
                note = CASE WHEN $10::boolean THEN note ELSE $11::text END,
                retry_count = CASE $12::text
                    WHEN 'increment' THEN retry_count + 1
                    WHEN 'reset' THEN 0
                    ELSE retry_count
                END
            WHERE id = $1
              AND status = $2
              AND ($13::timestamptz IS NULL OR processed_at = $13::timestamptz)
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(new.as_str())
        .bind(keep_processed_at)
        .bind(processed_at)
        .bind(keep_result)
        .bind(result_text)
        .bind(keep_error)
        .bind(error_text)
        .bind(keep_note)
        .bind(note)
        .bind(transition.retry.as_str())
        .bind(claimed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    #[instrument(skip(self))]
    async fn exists(&self, path: &str) -> PipelineResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM file_processing_queue WHERE path = $1 AND status <> 'DELETED')",
        )
        .bind(path)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    #[instrument(skip(self, entry), fields(path = %entry.path))]
    async fn insert(&self, entry: NewQueueEntry) -> PipelineResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO file_processing_queue
                (id, path, tenant, kind, size_bytes, status, discovered_at, retry_count)
            VALUES ($1, $2, $3, $4, $5, 'PENDING', $6, 0)
            ON CONFLICT (path) WHERE status <> 'DELETED' DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&entry.path)
        .bind(&entry.tenant)
        .bind(entry.kind.as_str())
        .bind(entry.size_bytes)
        .bind(entry.discovered_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn list_by_status(
        &self,
        status: QueueStatus,
        tenant: Option<&str>,
        limit: i64,
    ) -> PipelineResult<Vec<QueueEntry>> {
        let rows: Vec<QueueRow> = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS} FROM file_processing_queue \
             WHERE status = $1 AND ($2::text IS NULL OR tenant = $2) \
             ORDER BY discovered_at ASC, path ASC \
             LIMIT $3"
        ))
        .bind(status.as_str())
        .bind(tenant)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_entries(rows)
    }

    #[instrument(skip(self, transition))]
    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: QueueStatus,
        new: QueueStatus,
        transition: Transition,
    ) -> PipelineResult<bool> {
        self.update_status(id, expected, None, new, transition).await
    }

    #[instrument(skip(self, transition))]
    async fn complete_claim(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        new: QueueStatus,
        transition: Transition,
    ) -> PipelineResult<bool> {
        self.update_status(id, QueueStatus::Processing, Some(claimed_at), new, transition)
            .await
    }

    #[instrument(skip(self))]
    async fn get(&self, id: Uuid) -> PipelineResult<Option<QueueEntry>> {
        let row: Option<QueueRow> = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS} FROM file_processing_queue WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(QueueEntry::try_from).transpose().map_err(PipelineError::from)
    }

    #[instrument(skip(self))]
    async fn find_by_path(&self, path: &str) -> PipelineResult<Option<QueueEntry>> {
        let row: Option<QueueRow> = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS} FROM file_processing_queue \
             WHERE path = $1 AND status <> 'DELETED'"
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(QueueEntry::try_from).transpose().map_err(PipelineError::from)
    }

    #[instrument(skip(self))]
    async fn list(&self, tenant: Option<&str>, limit: i64) -> PipelineResult<Vec<QueueEntry>> {
        let rows: Vec<QueueRow> = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS} FROM file_processing_queue \
             WHERE ($1::text IS NULL OR tenant = $1) \
             ORDER BY discovered_at DESC, path DESC \
             LIMIT $2"
        ))
        .bind(tenant)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_entries(rows)
    }

    #[instrument(skip(self))]
    async fn stale_processing(&self, cutoff: DateTime<Utc>) -> PipelineResult<Vec<QueueEntry>> {
        let rows: Vec<QueueRow> = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS} FROM file_processing_queue \
             WHERE status = 'PROCESSING' AND (processed_at IS NULL OR processed_at < $1) \
             ORDER BY discovered_at ASC, path ASC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        into_entries(rows)
    }

    #[instrument(skip(self))]
    async fn remove_if_status(&self, id: Uuid, expected: QueueStatus) -> PipelineResult<bool> {
        ensure_removable(expected)?;

        let result = sqlx::query("DELETE FROM file_processing_queue WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(expected.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn status_counts(&self, tenant: Option<&str>) -> PipelineResult<Vec<StatusCount>> {
        let rows: Vec<StatusCountRow> = sqlx::query_as(
            r#"
            SELECT tenant, status, COUNT(*) AS count
            FROM file_processing_queue
            WHERE ($1::text IS NULL OR tenant = $1)
            GROUP BY tenant, status
            ORDER BY tenant, status
            "#,
        )
        .bind(tenant)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| StatusCount::try_from(row).map_err(PipelineError::from))
            .collect()
    }
}
