//! Queue entry records and transition payloads

use bordereau_common::text;
use bordereau_common::types::{FileKind, QueueStatus, StoragePath};
use bordereau_common::BordereauError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::storage::StoredObject;

/// Note recorded when the reaper returns a stuck entry to the queue.
pub const REAPER_NOTE: &str = "Reset from stuck PROCESSING status";

/// Note recorded when an operator requeues a finished entry.
pub const REQUEUE_NOTE: &str = "Requeued for reprocessing";

/// Note recorded when a claimed or finished entry's file is deleted.
pub const DELETE_NOTE: &str = "File manually deleted from stage";

const EMPTY_RESULT: &str = "Processing completed";
const EMPTY_ERROR: &str = "Processing failed without an error message";

/// One file tracked through the processing lifecycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub path: String,
    pub tenant: String,
    pub kind: FileKind,
    pub size_bytes: i64,
    pub status: QueueStatus,
    pub discovered_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub result_text: Option<String>,
    pub error_text: Option<String>,
    pub note: Option<String>,
    pub retry_count: i32,
}

/// Row shape of `file_processing_queue`
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct QueueRow {
    pub id: Uuid,
    pub path: String,
    pub tenant: String,
    pub kind: String,
    pub size_bytes: i64,
    pub status: String,
    pub discovered_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub result_text: Option<String>,
    pub error_text: Option<String>,
    pub note: Option<String>,
    pub retry_count: i32,
}

impl TryFrom<QueueRow> for QueueEntry {
    type Error = BordereauError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            path: row.path,
            tenant: row.tenant,
            kind: row.kind.parse()?,
            size_bytes: row.size_bytes,
            status: row.status.parse()?,
            discovered_at: row.discovered_at,
            processed_at: row.processed_at,
            result_text: row.result_text,
            error_text: row.error_text,
            note: row.note,
            retry_count: row.retry_count,
        })
    }
}

/// A PENDING entry about to be inserted by discovery
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueEntry {
    pub path: String,
    pub tenant: String,
    pub kind: FileKind,
    pub size_bytes: i64,
    pub discovered_at: DateTime<Utc>,
}

impl NewQueueEntry {
    /// Derive tenant and kind from the object's parsed path.
    pub fn from_object(object: &StoredObject, path: &StoragePath<'_>) -> Self {
        Self {
            path: object.name.clone(),
            tenant: path.tenant_or_unknown().to_string(),
            kind: path.kind(),
            size_bytes: i64::try_from(object.size).unwrap_or(i64::MAX),
            discovered_at: Utc::now(),
        }
    }

    pub fn into_entry(self, id: Uuid) -> QueueEntry {
        QueueEntry {
            id,
            path: self.path,
            tenant: self.tenant,
            kind: self.kind,
            size_bytes: self.size_bytes,
            status: QueueStatus::Pending,
            discovered_at: self.discovered_at,
            processed_at: None,
            result_text: None,
            error_text: None,
            note: None,
            retry_count: 0,
        }
    }
}

/// How a compare-and-set treats one optional column
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldUpdate<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T: Clone> FieldUpdate<T> {
    pub fn apply(&self, current: &mut Option<T>) {
        match self {
            FieldUpdate::Keep => {},
            FieldUpdate::Set(value) => *current = Some(value.clone()),
            FieldUpdate::Clear => *current = None,
        }
    }

    /// `(keep, value)` pair bound into the conditional UPDATE.
    pub(crate) fn bind_parts(&self) -> (bool, Option<T>) {
        match self {
            FieldUpdate::Keep => (true, None),
            FieldUpdate::Set(value) => (false, Some(value.clone())),
            FieldUpdate::Clear => (false, None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryUpdate {
    #[default]
    Keep,
    Increment,
    Reset,
}

impl RetryUpdate {
    pub fn apply(self, current: i32) -> i32 {
        match self {
            RetryUpdate::Keep => current,
            RetryUpdate::Increment => current.saturating_add(1),
            RetryUpdate::Reset => 0,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            RetryUpdate::Keep => "keep",
            RetryUpdate::Increment => "increment",
            RetryUpdate::Reset => "reset",
        }
    }
}

/// Column changes applied together with a status compare-and-set.
///
/// Each constructor matches one edge of the state machine and keeps
/// `result_text`/`error_text` consistent with the target status.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transition {
    pub processed_at: FieldUpdate<DateTime<Utc>>,
    pub result_text: FieldUpdate<String>,
    pub error_text: FieldUpdate<String>,
    pub note: FieldUpdate<String>,
    pub retry: RetryUpdate,
}

impl Transition {
    /// PENDING -> PROCESSING. The claim time is the reaper's staleness clock.
    /// Completing the claim later must present the same `claimed_at`.
    pub fn claim(claimed_at: DateTime<Utc>) -> Self {
        Self {
            processed_at: FieldUpdate::Set(claimed_at),
            ..Self::default()
        }
    }

    /// PROCESSING -> SUCCESS
    pub fn succeed(result: &str) -> Self {
        Self {
            processed_at: FieldUpdate::Set(Utc::now()),
            result_text: FieldUpdate::Set(text::for_persistence_or(result, EMPTY_RESULT)),
            error_text: FieldUpdate::Clear,
            ..Self::default()
        }
    }

    /// PROCESSING -> FAILED
    pub fn fail(error: &str) -> Self {
        Self {
            processed_at: FieldUpdate::Set(Utc::now()),
            result_text: FieldUpdate::Clear,
            error_text: FieldUpdate::Set(text::for_persistence_or(error, EMPTY_ERROR)),
            retry: RetryUpdate::Increment,
            ..Self::default()
        }
    }

    /// PROCESSING -> PENDING after the entry went stale
    pub fn reap() -> Self {
        Self {
            processed_at: FieldUpdate::Set(Utc::now()),
            note: FieldUpdate::Set(REAPER_NOTE.to_string()),
            ..Self::default()
        }
    }

    /// FAILED | SUCCESS -> PENDING
    pub fn requeue() -> Self {
        Self {
            processed_at: FieldUpdate::Clear,
            result_text: FieldUpdate::Clear,
            error_text: FieldUpdate::Clear,
            note: FieldUpdate::Set(REQUEUE_NOTE.to_string()),
            retry: RetryUpdate::Reset,
        }
    }

    /// PROCESSING | SUCCESS -> DELETED
    pub fn soft_delete(note: &str) -> Self {
        Self {
            processed_at: FieldUpdate::Set(Utc::now()),
            result_text: FieldUpdate::Clear,
            error_text: FieldUpdate::Clear,
            note: FieldUpdate::Set(text::for_persistence_or(note, DELETE_NOTE)),
            ..Self::default()
        }
    }

    /// Apply the column changes and the new status to an in-memory entry.
    pub fn apply_to(&self, entry: &mut QueueEntry, status: QueueStatus) {
        entry.status = status;
        self.processed_at.apply(&mut entry.processed_at);
        self.result_text.apply(&mut entry.result_text);
        self.error_text.apply(&mut entry.error_text);
        self.note.apply(&mut entry.note);
        entry.retry_count = self.retry.apply(entry.retry_count);
    }
}

/// Number of entries per tenant and status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub tenant: String,
    pub status: QueueStatus,
    pub count: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct StatusCountRow {
    pub tenant: String,
    pub status: String,
    pub count: i64,
}

impl TryFrom<StatusCountRow> for StatusCount {
    type Error = BordereauError;

    fn try_from(row: StatusCountRow) -> Result<Self, Self::Error> {
        Ok(Self {
            tenant: row.tenant,
            status: row.status.parse()?,
            count: row.count,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use bordereau_common::text::MAX_PERSISTED_CHARS;

    fn staged(name: &str, size: u64) -> NewQueueEntry {
        NewQueueEntry::from_object(&StoredObject::new(name, size), &StoragePath::parse(name))
    }

    #[test]
    fn test_new_entry_infers_tenant_and_kind() {
        let entry = staged("src/acme/b.xlsx", 2048);
        assert_eq!(entry.tenant, "acme");
        assert_eq!(entry.kind, FileKind::Excel);
        assert_eq!(entry.size_bytes, 2048);

        let orphan = staged("src/loose.csv", 1);
        assert_eq!(orphan.tenant, "unknown");
        assert_eq!(orphan.kind, FileKind::Csv);
    }

    #[test]
    fn test_fail_transition_sanitizes_and_counts_retry() {
        let mut entry = staged("src/acme/a.csv", 1)
            .into_entry(Uuid::new_v4());
        entry.status = QueueStatus::Processing;

        let long_error = format!("can't parse: {}", "x".repeat(800));
        Transition::fail(&long_error).apply_to(&mut entry, QueueStatus::Failed);

        let error = entry.error_text.as_deref().unwrap();
        assert_eq!(error.chars().count(), MAX_PERSISTED_CHARS);
        assert!(error.starts_with("cant parse"));
        assert_eq!(entry.retry_count, 1);
        assert!(entry.result_text.is_none());
        assert!(entry.processed_at.is_some());
    }

    #[test]
    fn test_requeue_clears_outcome() {
        let mut entry = staged("src/acme/a.csv", 1)
            .into_entry(Uuid::new_v4());
        Transition::succeed("Processed 120 rows").apply_to(&mut entry, QueueStatus::Success);
        entry.retry_count = 3;

        Transition::requeue().apply_to(&mut entry, QueueStatus::Pending);
        assert_eq!(entry.status, QueueStatus::Pending);
        assert!(entry.result_text.is_none());
        assert!(entry.error_text.is_none());
        assert!(entry.processed_at.is_none());
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.note.as_deref(), Some(REQUEUE_NOTE));
    }

    #[test]
    fn test_blank_outcome_text_gets_fallback() {
        let transition = Transition::succeed("   ");
        assert_eq!(transition.result_text, FieldUpdate::Set(EMPTY_RESULT.to_string()));

        let transition = Transition::fail("");
        assert_eq!(transition.error_text, FieldUpdate::Set(EMPTY_ERROR.to_string()));
    }
}
