//! Dispatch: drain PENDING entries through processing units

use bordereau_common::text;
use bordereau_common::types::QueueStatus;
use chrono::{SubsecRound, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{with_timeout, PipelineError, PipelineResult};
use crate::queue::{QueueEntry, QueueStore, Transition};
use crate::units::UnitRegistry;

/// Substrings that mark a unit result as a failure, matched case-insensitively.
pub const ERROR_MARKERS: [&str; 3] = ["error", "failed", "exception"];

/// Whether a unit's result string reports a failure.
///
/// This is a plain substring test, so a result such as "0 rows failed" also
/// counts as a failure.
pub fn contains_error_marker(result: &str) -> bool {
    let lowered = result.to_lowercase();
    ERROR_MARKERS.iter().any(|marker| lowered.contains(marker))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchFailure {
    pub id: Uuid,
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Entries this call claimed and ran
    pub processed: usize,
    pub succeeded: Vec<Uuid>,
    /// Entries claimed elsewhere before this call got to them
    pub skipped: usize,
    /// Entries whose outcome was dropped because they were reset, reclaimed or
    /// deleted while running
    pub superseded: usize,
    pub failures: Vec<DispatchFailure>,
}

enum EntryOutcome {
    Skipped,
    Succeeded(Uuid),
    Failed(DispatchFailure),
    Superseded,
    StoreError(PipelineError),
}

/// Claims a batch of PENDING entries and runs the unit registered for each kind.
///
/// A failing entry is recorded as FAILED and never stops the rest of the batch.
/// Queue store errors do not stop it either, but the call then returns the
/// first of them once every claimed entry has finished.
pub struct Dispatcher {
    store: Arc<dyn QueueStore>,
    units: UnitRegistry,
    batch_size: usize,
    concurrency: usize,
    unit_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn QueueStore>,
        units: UnitRegistry,
        batch_size: usize,
        concurrency: usize,
        unit_timeout: Duration,
    ) -> Self {
        Self {
            store,
            units,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
            unit_timeout,
        }
    }

    #[instrument(skip(self))]
    pub async fn dispatch(&self) -> PipelineResult<DispatchReport> {
        let batch_limit = i64::try_from(self.batch_size).unwrap_or(i64::MAX);
        let batch = self
            .store
            .list_by_status(QueueStatus::Pending, None, batch_limit)
            .await?;

        let outcomes: Vec<EntryOutcome> = stream::iter(batch)
            .map(|entry| self.process_entry(entry))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = DispatchReport::default();
        let mut store_errors = Vec::new();
        for outcome in outcomes {
            match outcome {
                EntryOutcome::Skipped => report.skipped += 1,
                EntryOutcome::Superseded => {
                    report.processed += 1;
                    report.superseded += 1;
                },
                EntryOutcome::Succeeded(id) => {
                    report.processed += 1;
                    report.succeeded.push(id);
                },
                EntryOutcome::Failed(failure) => {
                    report.processed += 1;
                    report.failures.push(failure);
                },
                EntryOutcome::StoreError(e) => store_errors.push(e),
            }
        }

        let failed_writes = store_errors.len();
        if let Some(first) = store_errors.into_iter().next() {
            error!(
                failed_writes,
                processed = report.processed,
                succeeded = report.succeeded.len(),
                "Dispatch hit queue store errors: {}",
                first
            );
            return Err(first);
        }

        info!(
            processed = report.processed,
            succeeded = report.succeeded.len(),
            failed = report.failures.len(),
            skipped = report.skipped,
            "Dispatch complete"
        );

        Ok(report)
    }

    async fn process_entry(&self, entry: QueueEntry) -> EntryOutcome {
        // Postgres keeps microseconds; the stamp must compare equal on read-back.
        let claimed_at = Utc::now().trunc_subsecs(6);
        match self
            .store
            .compare_and_set_status(
                entry.id,
                QueueStatus::Pending,
                QueueStatus::Processing,
                Transition::claim(claimed_at),
            )
            .await
        {
            Ok(true) => {},
            Ok(false) => return EntryOutcome::Skipped,
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "Failed to claim entry");
                return EntryOutcome::StoreError(e);
            },
        }

        let (status, transition, failure) = match self.run_unit(&entry).await {
            Ok(result) => (QueueStatus::Success, Transition::succeed(&result), None),
            Err(message) => {
                let transition = Transition::fail(&message);
                let failure = DispatchFailure {
                    id: entry.id,
                    path: entry.path.clone(),
                    error: text::for_persistence(&message),
                };
                (QueueStatus::Failed, transition, Some(failure))
            },
        };

        match self
            .store
            .complete_claim(entry.id, claimed_at, status, transition)
            .await
        {
            Ok(true) => match failure {
                Some(failure) => {
                    warn!(entry_id = %entry.id, path = %entry.path, error = %failure.error, "Processing failed");
                    EntryOutcome::Failed(failure)
                },
                None => EntryOutcome::Succeeded(entry.id),
            },
            Ok(false) => {
                warn!(
                    entry_id = %entry.id,
                    path = %entry.path,
                    "Claim no longer held when the unit finished; outcome discarded"
                );
                EntryOutcome::Superseded
            },
            Err(e) => {
                // Left PROCESSING; the reaper returns it to the queue.
                error!(entry_id = %entry.id, error = %e, "Failed to record processing outcome");
                EntryOutcome::StoreError(e)
            },
        }
    }

    /// Run the unit for the entry's kind. `Err` carries the failure text.
    async fn run_unit(&self, entry: &QueueEntry) -> Result<String, String> {
        let Some(unit) = self.units.get(entry.kind) else {
            return Err(format!("No processing unit registered for {} files", entry.kind));
        };

        info!(entry_id = %entry.id, path = %entry.path, unit = %unit.name(), "Processing entry");

        match with_timeout("processing unit", self.unit_timeout, unit.run(&entry.path, &entry.tenant)).await {
            Ok(result) if contains_error_marker(&result) => Err(result),
            Ok(result) => Ok(result),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_markers_are_case_insensitive() {
        assert!(contains_error_marker("ERROR: header row missing"));
        assert!(contains_error_marker("Load Failed"));
        assert!(contains_error_marker("java.lang.Exception"));
        assert!(contains_error_marker("0 rows failed"));
        assert!(!contains_error_marker("Processed 120 rows"));
        assert!(!contains_error_marker(""));
    }
}
