//! Shared fixtures for pipeline integration tests
//!
//! Everything here runs against the in-memory queue, object store and task
//! scheduler, so no database, S3 endpoint or task runner is needed.

#![allow(dead_code)]

use async_trait::async_trait;
use bordereau_common::types::{FileKind, QueueStatus, StoragePath};
use bordereau_ingest::config::{PipelineConfig, SchedulerConfig};
use bordereau_ingest::error::{PipelineError, PipelineResult};
use bordereau_ingest::queue::{MemoryQueueStore, NewQueueEntry, QueueEntry, QueueStore, StatusCount, Transition};
use bordereau_ingest::service::IngestService;
use bordereau_ingest::storage::memory::MemoryObjectStore;
use bordereau_ingest::storage::StoredObject;
use bordereau_ingest::tasks::{MemoryTaskScheduler, TaskState};
use bordereau_ingest::units::{FnUnit, UnitRegistry};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

pub const NAMESPACE: &str = "bronze";
pub const DISCOVERY_TASK: &str = "discover_files_task";
pub const PROCESS_TASK: &str = "process_files_task";

/// In-memory backends shared by a service under test and the assertions.
pub struct TestEnvironment {
    pub store: Arc<MemoryQueueStore>,
    pub objects: Arc<MemoryObjectStore>,
    pub scheduler: Arc<MemoryTaskScheduler>,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryQueueStore::new()),
            objects: Arc::new(MemoryObjectStore::new()),
            scheduler: Arc::new(MemoryTaskScheduler::new()),
        }
    }

    /// The discovery root task and its processing successor, both started.
    pub async fn with_task_graph(self) -> Self {
        self.scheduler
            .add_task(NAMESPACE, DISCOVERY_TASK, Some("60 MINUTE"), TaskState::Started, &[])
            .await;
        self.scheduler
            .add_task(NAMESPACE, PROCESS_TASK, None, TaskState::Started, &[DISCOVERY_TASK])
            .await;
        self
    }

    pub fn service(&self, units: UnitRegistry) -> IngestService {
        self.service_with(units, PipelineConfig::default())
    }

    /// A service over `store` instead of the shared in-memory queue.
    pub fn service_on(&self, store: Arc<dyn QueueStore>, units: UnitRegistry) -> IngestService {
        IngestService::new(
            store,
            self.objects.clone(),
            self.scheduler.clone(),
            units,
            PipelineConfig::default(),
            SchedulerConfig::default(),
        )
    }

    pub fn service_with(&self, units: UnitRegistry, pipeline: PipelineConfig) -> IngestService {
        IngestService::new(
            self.store.clone(),
            self.objects.clone(),
            self.scheduler.clone(),
            units,
            pipeline,
            SchedulerConfig::default(),
        )
    }

    /// Seed an entry for `path` directly in `status`.
    pub async fn seed(&self, path: &str, status: QueueStatus) -> QueueEntry {
        let entry = entry(path, status);
        self.store.seed(entry.clone()).await;
        entry
    }

    pub async fn entry_for(&self, path: &str) -> Option<QueueEntry> {
        self.store
            .entries()
            .await
            .into_iter()
            .rev()
            .find(|e| e.path == path)
    }
}

/// An entry for `path` in `status`, as discovery would have created it.
pub fn entry(path: &str, status: QueueStatus) -> QueueEntry {
    let mut entry = NewQueueEntry::from_object(&StoredObject::new(path, 2048), &StoragePath::parse(path))
        .into_entry(Uuid::new_v4());
    entry.status = status;
    match status {
        QueueStatus::Success => {
            entry.processed_at = Some(Utc::now());
            entry.result_text = Some("Processed 10 rows".to_string());
        },
        QueueStatus::Failed => {
            entry.processed_at = Some(Utc::now());
            entry.error_text = Some("Processing failed: bad header".to_string());
            entry.retry_count = 1;
        },
        QueueStatus::Processing => entry.processed_at = Some(Utc::now()),
        QueueStatus::Pending | QueueStatus::Deleted => {},
    }
    entry
}

/// A CSV unit that always returns `result`.
pub fn csv_unit(result: impl Into<String>) -> UnitRegistry {
    let result = result.into();
    UnitRegistry::new().register(
        FileKind::Csv,
        Arc::new(FnUnit::new("load_csv", move |_path: String, _tenant: String| {
            let result = result.clone();
            async move { Ok(result) }
        })),
    )
}

/// A CSV unit that always fails with `message`.
pub fn failing_csv_unit(message: impl Into<String>) -> UnitRegistry {
    let message = message.into();
    UnitRegistry::new().register(
        FileKind::Csv,
        Arc::new(FnUnit::new("load_csv", move |_path: String, _tenant: String| {
            let message = message.clone();
            async move { Err(PipelineError::Data(message)) }
        })),
    )
}

/// A CSV unit that signals `started`, then holds until `release` before
/// returning `result`.
pub fn gated_csv_unit(started: Arc<Notify>, release: Arc<Notify>, result: impl Into<String>) -> UnitRegistry {
    let result = result.into();
    UnitRegistry::new().register(
        FileKind::Csv,
        Arc::new(FnUnit::new("load_csv", move |_path: String, _tenant: String| {
            let started = started.clone();
            let release = release.clone();
            let result = result.clone();
            async move {
                started.notify_one();
                release.notified().await;
                Ok(result)
            }
        })),
    )
}

fn unavailable() -> PipelineError {
    PipelineError::Database(sqlx::Error::PoolTimedOut)
}

/// Delegates to an in-memory store, failing or racing selected calls.
pub struct FaultyQueueStore {
    pub inner: Arc<MemoryQueueStore>,
    failing_counts: bool,
    failing_status_updates: bool,
    rival_claims: bool,
}

impl FaultyQueueStore {
    pub fn new(inner: Arc<MemoryQueueStore>) -> Self {
        Self {
            inner,
            failing_counts: false,
            failing_status_updates: false,
            rival_claims: false,
        }
    }

    /// `status_counts` fails.
    pub fn failing_counts(mut self) -> Self {
        self.failing_counts = true;
        self
    }

    /// Every status change fails as if the pool were exhausted.
    pub fn failing_status_updates(mut self) -> Self {
        self.failing_status_updates = true;
        self
    }

    /// Another dispatcher claims each PENDING entry right after it is listed.
    pub fn with_rival_claims(mut self) -> Self {
        self.rival_claims = true;
        self
    }
}

#[async_trait]
impl QueueStore for FaultyQueueStore {
    async fn exists(&self, path: &str) -> PipelineResult<bool> {
        self.inner.exists(path).await
    }

    async fn insert(&self, entry: NewQueueEntry) -> PipelineResult<bool> {
        self.inner.insert(entry).await
    }

    async fn list_by_status(
        &self,
        status: QueueStatus,
        tenant: Option<&str>,
        limit: i64,
    ) -> PipelineResult<Vec<QueueEntry>> {
        let entries = self.inner.list_by_status(status, tenant, limit).await?;
        if self.rival_claims && status == QueueStatus::Pending {
            for entry in &entries {
                self.inner
                    .compare_and_set_status(
                        entry.id,
                        QueueStatus::Pending,
                        QueueStatus::Processing,
                        Transition::claim(Utc::now()),
                    )
                    .await?;
            }
        }
        Ok(entries)
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: QueueStatus,
        new: QueueStatus,
        transition: Transition,
    ) -> PipelineResult<bool> {
        if self.failing_status_updates {
            return Err(unavailable());
        }
        self.inner.compare_and_set_status(id, expected, new, transition).await
    }

    async fn complete_claim(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        new: QueueStatus,
        transition: Transition,
    ) -> PipelineResult<bool> {
        if self.failing_status_updates {
            return Err(unavailable());
        }
        self.inner.complete_claim(id, claimed_at, new, transition).await
    }

    async fn get(&self, id: Uuid) -> PipelineResult<Option<QueueEntry>> {
        self.inner.get(id).await
    }

    async fn find_by_path(&self, path: &str) -> PipelineResult<Option<QueueEntry>> {
        self.inner.find_by_path(path).await
    }

    async fn list(&self, tenant: Option<&str>, limit: i64) -> PipelineResult<Vec<QueueEntry>> {
        self.inner.list(tenant, limit).await
    }

    async fn stale_processing(&self, cutoff: DateTime<Utc>) -> PipelineResult<Vec<QueueEntry>> {
        self.inner.stale_processing(cutoff).await
    }

    async fn remove_if_status(&self, id: Uuid, expected: QueueStatus) -> PipelineResult<bool> {
        self.inner.remove_if_status(id, expected).await
    }

    async fn status_counts(&self, tenant: Option<&str>) -> PipelineResult<Vec<StatusCount>> {
        if self.failing_counts {
            return Err(unavailable());
        }
        self.inner.status_counts(tenant).await
    }
}
