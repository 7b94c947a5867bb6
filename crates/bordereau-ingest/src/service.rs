//! Ingest service facade
//!
//! Wires the queue, storage, processing units and scheduler together and
//! exposes every operation the trigger binary (or any other caller) needs.

use bordereau_common::types::{validate_tenant, FileKind, QueueStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::{PipelineConfig, SchedulerConfig, ALLOWED_UPLOAD_EXTENSIONS};
use crate::error::{with_timeout, PipelineError, PipelineResult};
use crate::pipeline::{
    BulkDeleteReport, Coordinator, DeleteOutcome, DiscoveryReconciler, DiscoveryReport, DispatchReport,
    Dispatcher, ReapReport, StuckJobReaper,
};
use crate::queue::{QueueEntry, QueueStore, StatusCount, TimeoutQueueStore};
use crate::storage::{count_objects, ObjectCount, ObjectStore};
use crate::tasks::{ScheduleChange, TaskDependencyGuard, TaskGraph, TaskScheduler, TaskState};
use crate::units::UnitRegistry;

/// A file accepted by [`IngestService::upload`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    pub destination: String,
    pub tenant: String,
    pub kind: FileKind,
    pub size_bytes: u64,
}

/// Entry counts per tenant and status, plus totals per status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub counts: Vec<StatusCount>,
    pub totals: BTreeMap<QueueStatus, i64>,
}

/// A scheduler task with its position in the DAG
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskView {
    pub name: String,
    pub schedule: Option<String>,
    pub state: TaskState,
    pub predecessors: Vec<String>,
    /// Tasks in the namespace that run after this one
    pub successors: Vec<String>,
    pub is_root: bool,
}

/// Result of asking the scheduler to run discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryTrigger {
    pub task: String,
    pub stage_file_count: ObjectCount,
    /// Discovery ran in-process because the scheduler could not run it
    pub fallback_mode: bool,
    pub scheduler_error: Option<String>,
    pub discovery: Option<DiscoveryReport>,
}

/// Result of asking the scheduler to process queued files
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingTrigger {
    pub task: String,
    pub pending_count: ObjectCount,
    pub processing_count: ObjectCount,
    pub fallback_mode: bool,
    pub scheduler_error: Option<String>,
    pub discovery: Option<DiscoveryReport>,
    pub dispatch: Option<DispatchReport>,
}

pub struct IngestService {
    store: Arc<dyn QueueStore>,
    objects: Arc<dyn ObjectStore>,
    scheduler: Arc<dyn TaskScheduler>,
    pipeline: PipelineConfig,
    scheduler_config: SchedulerConfig,
    discovery: DiscoveryReconciler,
    dispatcher: Dispatcher,
    reaper: StuckJobReaper,
    coordinator: Coordinator,
    guard: TaskDependencyGuard,
}

impl IngestService {
    /// Queue store calls are bounded by the metadata timeout.
    pub fn new(
        store: Arc<dyn QueueStore>,
        objects: Arc<dyn ObjectStore>,
        scheduler: Arc<dyn TaskScheduler>,
        units: UnitRegistry,
        pipeline: PipelineConfig,
        scheduler_config: SchedulerConfig,
    ) -> Self {
        let store: Arc<dyn QueueStore> =
            Arc::new(TimeoutQueueStore::new(store, pipeline.metadata_timeout()));

        let discovery = DiscoveryReconciler::new(
            store.clone(),
            objects.clone(),
            pipeline.location(),
            pipeline.list_timeout(),
        );
        let dispatcher = Dispatcher::new(
            store.clone(),
            units,
            pipeline.batch_size,
            pipeline.dispatch_concurrency,
            pipeline.unit_timeout(),
        );
        let reaper = StuckJobReaper::new(store.clone(), pipeline.stale_after());
        let coordinator = Coordinator::new(store.clone(), objects.clone());
        let guard = TaskDependencyGuard::new(scheduler.clone(), pipeline.metadata_timeout());

        Self {
            store,
            objects,
            scheduler,
            pipeline,
            scheduler_config,
            discovery,
            dispatcher,
            reaper,
            coordinator,
            guard,
        }
    }

    pub async fn discover(&self) -> PipelineResult<DiscoveryReport> {
        self.discovery.discover().await
    }

    pub async fn dispatch(&self) -> PipelineResult<DispatchReport> {
        self.dispatcher.dispatch().await
    }

    pub async fn reprocess(&self, id: Uuid) -> PipelineResult<QueueEntry> {
        self.coordinator.reprocess(id).await
    }

    pub async fn delete(&self, path: &str) -> PipelineResult<DeleteOutcome> {
        self.coordinator.delete(path).await
    }

    pub async fn bulk_delete(&self, paths: &[String]) -> BulkDeleteReport {
        self.coordinator.bulk_delete(paths).await
    }

    pub async fn reset_stuck(&self) -> PipelineResult<ReapReport> {
        self.reaper.reap().await
    }

    /// Most recently discovered entries first, capped at the queue view limit.
    pub async fn get_queue(&self, tenant: Option<&str>) -> PipelineResult<Vec<QueueEntry>> {
        self.store.list(tenant, self.pipeline.queue_view_limit).await
    }

    pub async fn update_task_schedule(&self, task: &str, schedule: &str) -> PipelineResult<ScheduleChange> {
        self.guard.update_schedule(task, schedule).await
    }

    /// Validate a local file and copy it to `<location>/<tenant>/<file name>`.
    #[instrument(skip(self, local_file), fields(file = %local_file.display()))]
    pub async fn upload(&self, local_file: &Path, tenant: &str) -> PipelineResult<UploadReceipt> {
        validate_tenant(tenant).map_err(|e| PipelineError::PolicyViolation(e.to_string()))?;

        let file_name = local_file
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                PipelineError::PolicyViolation(format!("{} has no usable file name", local_file.display()))
            })?;

        let kind = FileKind::from_path(file_name);
        if kind == FileKind::Unknown {
            return Err(PipelineError::PolicyViolation(format!(
                "File type not allowed for {}. Allowed: {}",
                file_name,
                ALLOWED_UPLOAD_EXTENSIONS
                    .iter()
                    .map(|ext| format!(".{}", ext))
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let size_bytes = tokio::fs::metadata(local_file).await?.len();
        if size_bytes > self.pipeline.max_upload_bytes {
            return Err(PipelineError::PolicyViolation(format!(
                "{} is {} bytes; the upload limit is {} bytes",
                file_name, size_bytes, self.pipeline.max_upload_bytes
            )));
        }

        let destination = format!("{}/{}/{}", self.pipeline.location(), tenant, file_name);
        with_timeout(
            "upload",
            self.pipeline.unit_timeout(),
            self.objects.put(local_file, &destination),
        )
        .await?;

        info!(destination = %destination, size_bytes, "File uploaded");

        Ok(UploadReceipt {
            destination,
            tenant: tenant.to_string(),
            kind,
            size_bytes,
        })
    }

    pub async fn status_summary(&self, tenant: Option<&str>) -> PipelineResult<StatusSummary> {
        let counts = self.store.status_counts(tenant).await?;
        let mut totals: BTreeMap<QueueStatus, i64> = BTreeMap::new();
        for count in &counts {
            *totals.entry(count.status).or_insert(0) += count.count;
        }
        Ok(StatusSummary { counts, totals })
    }

    /// Every task in the configured namespace with its predecessors.
    pub async fn list_tasks(&self) -> PipelineResult<Vec<TaskView>> {
        with_timeout("list tasks", self.pipeline.metadata_timeout(), self.fetch_task_views()).await
    }

    async fn fetch_task_views(&self) -> PipelineResult<Vec<TaskView>> {
        let summaries = self.scheduler.list_tasks(&self.scheduler_config.namespace).await?;

        let graph = TaskGraph::describe(self.scheduler.as_ref(), &summaries).await?;

        Ok(summaries
            .into_iter()
            .map(|task| {
                let predecessors: Vec<String> = graph
                    .predecessors_of(&task.name)
                    .map(|p| p.iter().cloned().collect())
                    .unwrap_or_default();
                let successors = graph
                    .successors_of(&task.name)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                TaskView {
                    is_root: predecessors.is_empty(),
                    successors,
                    name: task.name,
                    schedule: task.schedule,
                    state: task.state,
                    predecessors,
                }
            })
            .collect())
    }

    pub async fn resume_task(&self, task: &str) -> PipelineResult<()> {
        with_timeout("resume task", self.pipeline.metadata_timeout(), self.scheduler.resume(task)).await
    }

    pub async fn suspend_task(&self, task: &str) -> PipelineResult<()> {
        with_timeout("suspend task", self.pipeline.metadata_timeout(), self.scheduler.suspend(task)).await
    }

    /// Ask the scheduler to run the discovery task; run discovery here if it cannot.
    #[instrument(skip(self))]
    pub async fn trigger_discovery(&self) -> PipelineResult<DiscoveryTrigger> {
        let task = self.scheduler_config.discovery_task.clone();
        let stage_file_count = count_objects(
            self.objects.as_ref(),
            self.pipeline.location(),
            self.pipeline.list_timeout(),
        )
        .await;

        match self.request_task_run(&task).await {
            Ok(()) => Ok(DiscoveryTrigger {
                task,
                stage_file_count,
                fallback_mode: false,
                scheduler_error: None,
                discovery: None,
            }),
            Err(scheduler_err) => {
                warn!(task = %task, error = %scheduler_err, "Scheduler unavailable; running discovery directly");
                let discovery = self
                    .discover()
                    .await
                    .map_err(|e| fallback_failed(&scheduler_err, &e))?;
                Ok(DiscoveryTrigger {
                    task,
                    stage_file_count,
                    fallback_mode: true,
                    scheduler_error: Some(scheduler_err.to_string()),
                    discovery: Some(discovery),
                })
            },
        }
    }

    /// Ask the scheduler to run the discovery task, whose successors process
    /// files; run discovery and dispatch here if it cannot.
    #[instrument(skip(self))]
    pub async fn trigger_processing(&self) -> PipelineResult<ProcessingTrigger> {
        let task = self.scheduler_config.discovery_task.clone();
        let (pending_count, processing_count) = self.active_counts().await;

        match self.request_task_run(&task).await {
            Ok(()) => Ok(ProcessingTrigger {
                task,
                pending_count,
                processing_count,
                fallback_mode: false,
                scheduler_error: None,
                discovery: None,
                dispatch: None,
            }),
            Err(scheduler_err) => {
                warn!(task = %task, error = %scheduler_err, "Scheduler unavailable; processing directly");
                let discovery = self
                    .discover()
                    .await
                    .map_err(|e| fallback_failed(&scheduler_err, &e))?;
                let dispatch = self
                    .dispatch()
                    .await
                    .map_err(|e| fallback_failed(&scheduler_err, &e))?;
                Ok(ProcessingTrigger {
                    task,
                    pending_count,
                    processing_count,
                    fallback_mode: true,
                    scheduler_error: Some(scheduler_err.to_string()),
                    discovery: Some(discovery),
                    dispatch: Some(dispatch),
                })
            },
        }
    }

    async fn request_task_run(&self, task: &str) -> PipelineResult<()> {
        with_timeout("execute task", self.pipeline.metadata_timeout(), self.scheduler.execute(task)).await
    }

    async fn active_counts(&self) -> (ObjectCount, ObjectCount) {
        match self.store.status_counts(None).await {
            Ok(counts) => {
                let total = |status: QueueStatus| -> u64 {
                    counts
                        .iter()
                        .filter(|c| c.status == status)
                        .map(|c| u64::try_from(c.count).unwrap_or(0))
                        .sum()
                };
                (
                    ObjectCount::Known(total(QueueStatus::Pending)),
                    ObjectCount::Known(total(QueueStatus::Processing)),
                )
            },
            Err(e) => {
                warn!(error = %e, "Could not count queued entries");
                (ObjectCount::Unknown, ObjectCount::Unknown)
            },
        }
    }
}

fn fallback_failed(scheduler_err: &PipelineError, fallback_err: &PipelineError) -> PipelineError {
    PipelineError::Systemic(format!(
        "scheduler failed ({}) and the direct fallback failed too ({})",
        scheduler_err, fallback_err
    ))
}
