use async_trait::async_trait;
use serde::Serialize;

use crate::error::{PipelineError, PipelineResult};

/// Property name under which `describe_task` reports predecessors.
pub const PREDECESSORS_PROPERTY: &str = "predecessors";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Started,
    Suspended,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Started => "started",
            TaskState::Suspended => "suspended",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "started" => Ok(TaskState::Started),
            "suspended" => Ok(TaskState::Suspended),
            other => Err(PipelineError::Data(format!("unknown task state '{}'", other))),
        }
    }
}

/// A task as reported by `list_tasks`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub name: String,
    pub namespace: String,
    pub schedule: Option<String>,
    pub state: TaskState,
}

/// One `(property, value)` row of a task description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TaskProperty {
    pub property: String,
    pub value: String,
}

impl TaskProperty {
    pub fn new(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
        }
    }
}

/// External scheduler that runs dependency-ordered tasks.
///
/// Unknown task names fail with [`PipelineError::NotFound`].
#[async_trait]
pub trait TaskScheduler: Send + Sync {
    async fn list_tasks(&self, namespace: &str) -> PipelineResult<Vec<TaskSummary>>;

    async fn describe_task(&self, name: &str) -> PipelineResult<Vec<TaskProperty>>;

    async fn resume(&self, name: &str) -> PipelineResult<()>;

    async fn suspend(&self, name: &str) -> PipelineResult<()>;

    async fn set_schedule(&self, name: &str, schedule: &str) -> PipelineResult<()>;

    /// Request an immediate run of a task.
    async fn execute(&self, name: &str) -> PipelineResult<()>;
}
