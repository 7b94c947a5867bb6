//! Discovery: reconcile the stage listing with the queue

use bordereau_common::types::StoragePath;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::PipelineResult;
use crate::queue::{NewQueueEntry, QueueStore};
use crate::storage::{list_objects, ObjectStore};

/// What one discovery pass found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    /// Files returned by the listing
    pub listed: usize,
    /// Paths that received a new PENDING entry
    pub inserted: Vec<String>,
    /// Paths that already had an active entry
    pub already_queued: usize,
    /// Paths inserted concurrently by another discovery run
    pub lost_races: usize,
    /// Paths queued under the `unknown` tenant because they carry no tenant segment
    pub unattributed: Vec<String>,
}

/// Inserts a PENDING entry for every listed object not yet queued.
///
/// Never deletes or changes existing entries. Two runs racing on the same path
/// are settled by the store's insert-if-absent.
pub struct DiscoveryReconciler {
    store: Arc<dyn QueueStore>,
    objects: Arc<dyn ObjectStore>,
    location: String,
    list_timeout: Duration,
}

impl DiscoveryReconciler {
    pub fn new(
        store: Arc<dyn QueueStore>,
        objects: Arc<dyn ObjectStore>,
        location: impl Into<String>,
        list_timeout: Duration,
    ) -> Self {
        Self {
            store,
            objects,
            location: location.into(),
            list_timeout,
        }
    }

    #[instrument(skip(self), fields(location = %self.location))]
    pub async fn discover(&self) -> PipelineResult<DiscoveryReport> {
        let objects = list_objects(self.objects.as_ref(), &self.location, self.list_timeout).await?;

        let mut report = DiscoveryReport {
            listed: objects.len(),
            ..DiscoveryReport::default()
        };

        // Listings never include directory placeholders.
        for object in &objects {
            let path = StoragePath::parse(&object.name);

            if self.store.exists(&object.name).await? {
                report.already_queued += 1;
                continue;
            }

            let entry = NewQueueEntry::from_object(object, &path);
            let has_tenant = path.tenant().is_some();

            if self.store.insert(entry).await? {
                debug!(path = %object.name, "Queued new file");
                if !has_tenant {
                    warn!(path = %object.name, "File has no tenant segment; queued as unknown");
                    report.unattributed.push(object.name.clone());
                }
                report.inserted.push(object.name.clone());
            } else {
                report.lost_races += 1;
            }
        }

        info!(
            listed = report.listed,
            inserted = report.inserted.len(),
            already_queued = report.already_queued,
            lost_races = report.lost_races,
            "Discovery complete"
        );

        Ok(report)
    }
}
