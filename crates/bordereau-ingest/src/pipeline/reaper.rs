use bordereau_common::types::QueueStatus;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::queue::{QueueStore, Transition};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    /// Stale PROCESSING entries found by the scan
    pub candidates: usize,
    /// Entries returned to PENDING by this run
    pub reset: Vec<Uuid>,
}

/// Returns PROCESSING entries older than the staleness threshold to PENDING.
pub struct StuckJobReaper {
    store: Arc<dyn QueueStore>,
    stale_after: Duration,
}

impl StuckJobReaper {
    pub fn new(store: Arc<dyn QueueStore>, stale_after: Duration) -> Self {
        Self { store, stale_after }
    }

    #[instrument(skip(self))]
    pub async fn reap(&self) -> PipelineResult<ReapReport> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .map_err(|e| PipelineError::Config(format!("staleness threshold out of range: {}", e)))?;
        let cutoff = Utc::now() - stale_after;

        let candidates = self.store.stale_processing(cutoff).await?;
        let mut report = ReapReport {
            candidates: candidates.len(),
            reset: Vec::new(),
        };

        for entry in candidates {
            let reset = self
                .store
                .compare_and_set_status(
                    entry.id,
                    QueueStatus::Processing,
                    QueueStatus::Pending,
                    Transition::reap(),
                )
                .await
                .inspect_err(|e| warn!(entry_id = %entry.id, error = %e, "Failed to reset stuck entry"))?;

            if reset {
                warn!(entry_id = %entry.id, path = %entry.path, "Reset stuck entry to PENDING");
                report.reset.push(entry.id);
            }
        }

        if !report.reset.is_empty() {
            info!(reset = report.reset.len(), "Stuck entries reset");
        }

        Ok(report)
    }
}
