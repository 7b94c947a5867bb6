use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use super::graph::TaskGraph;
use super::schedule::ScheduleExpr;
use super::scheduler::{TaskScheduler, TaskState};
use crate::error::{with_timeout, PipelineError, PipelineResult};

/// Property name under which `describe_task` reports the run state.
pub const STATE_PROPERTY: &str = "state";

/// Outcome of a guarded schedule change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleChange {
    pub task: String,
    pub schedule: String,
    /// Whether the task was suspended around the update
    pub suspended_during_update: bool,
}

/// Only root tasks (no predecessors) may have their trigger schedule changed.
pub struct TaskDependencyGuard {
    scheduler: Arc<dyn TaskScheduler>,
    timeout: Duration,
}

impl TaskDependencyGuard {
    pub fn new(scheduler: Arc<dyn TaskScheduler>, timeout: Duration) -> Self {
        Self { scheduler, timeout }
    }

    #[instrument(skip(self))]
    pub async fn update_schedule(&self, task: &str, expr: &str) -> PipelineResult<ScheduleChange> {
        let schedule = ScheduleExpr::parse(expr)?.to_string();

        let properties = with_timeout(
            "describe task",
            self.timeout,
            self.scheduler.describe_task(task),
        )
        .await?;

        let graph = TaskGraph::from_properties(task, &properties);

        if graph.is_root(task) != Some(true) {
            warn!(
                task = %task,
                predecessors = ?graph.predecessors_of(task),
                "Rejected schedule change for non-root task"
            );
            return Err(PipelineError::PolicyViolation(
                "only root tasks may have their schedule changed".to_string(),
            ));
        }

        let started = properties
            .iter()
            .find(|p| p.property.eq_ignore_ascii_case(STATE_PROPERTY))
            .and_then(|p| p.value.parse::<TaskState>().ok())
            .map_or(true, |state| state == TaskState::Started);

        if started {
            self.update_suspended(task, &schedule).await?;
        } else {
            with_timeout(
                "set schedule",
                self.timeout,
                self.scheduler.set_schedule(task, &schedule),
            )
            .await?;
        }

        info!(task = %task, schedule = %schedule, "Task schedule updated");

        Ok(ScheduleChange {
            task: task.to_string(),
            schedule,
            suspended_during_update: started,
        })
    }

    /// suspend -> set -> resume. Resume runs even when the update fails.
    async fn update_suspended(&self, task: &str, schedule: &str) -> PipelineResult<()> {
        with_timeout("suspend task", self.timeout, self.scheduler.suspend(task)).await?;

        let updated = with_timeout(
            "set schedule",
            self.timeout,
            self.scheduler.set_schedule(task, schedule),
        )
        .await;

        let resumed = with_timeout("resume task", self.timeout, self.scheduler.resume(task)).await;

        match (updated, resumed) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(update_err), Ok(())) => Err(update_err),
            (Ok(()), Err(resume_err)) => {
                error!(task = %task, error = %resume_err, "Schedule updated but task left suspended");
                Err(resume_err)
            },
            (Err(update_err), Err(resume_err)) => {
                error!(
                    task = %task,
                    error = %resume_err,
                    "Failed to resume task after failed schedule update"
                );
                Err(update_err)
            },
        }
    }
}
