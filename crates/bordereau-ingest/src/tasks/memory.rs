//! In-process task scheduler

use async_trait::async_trait;
use bordereau_common::BordereauError;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

use super::scheduler::{TaskProperty, TaskScheduler, TaskState, TaskSummary, PREDECESSORS_PROPERTY};
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone)]
struct MemoryTask {
    namespace: String,
    schedule: Option<String>,
    state: TaskState,
    predecessors: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct State {
    tasks: BTreeMap<String, MemoryTask>,
    calls: Vec<String>,
    unavailable: bool,
    failing_schedule_updates: bool,
}

/// Task catalogue held in memory. Every call is recorded as `"<op>:<task>"`.
#[derive(Debug, Default)]
pub struct MemoryTaskScheduler {
    state: RwLock<State>,
}

impl MemoryTaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_task(
        &self,
        namespace: &str,
        name: &str,
        schedule: Option<&str>,
        state: TaskState,
        predecessors: &[&str],
    ) {
        self.state.write().await.tasks.insert(
            name.to_string(),
            MemoryTask {
                namespace: namespace.to_string(),
                schedule: schedule.map(str::to_string),
                state,
                predecessors: predecessors.iter().map(|p| p.to_string()).collect(),
            },
        );
    }

    /// While unavailable every call fails with [`PipelineError::Systemic`].
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    pub async fn fail_schedule_updates(&self, fail: bool) {
        self.state.write().await.failing_schedule_updates = fail;
    }

    pub async fn calls(&self) -> Vec<String> {
        self.state.read().await.calls.clone()
    }

    pub async fn schedule_of(&self, name: &str) -> Option<String> {
        self.state
            .read()
            .await
            .tasks
            .get(name)
            .and_then(|t| t.schedule.clone())
    }

    pub async fn state_of(&self, name: &str) -> Option<TaskState> {
        self.state.read().await.tasks.get(name).map(|t| t.state)
    }
}

impl State {
    fn record(&mut self, op: &str, name: &str) -> PipelineResult<()> {
        self.calls.push(format!("{}:{}", op, name));
        if self.unavailable {
            return Err(PipelineError::Systemic("scheduler is unavailable".to_string()));
        }
        Ok(())
    }

    fn task_mut(&mut self, name: &str) -> PipelineResult<&mut MemoryTask> {
        self.tasks
            .get_mut(name)
            .ok_or_else(|| PipelineError::NotFound(format!("task {}", name)))
    }
}

#[async_trait]
impl TaskScheduler for MemoryTaskScheduler {
    async fn list_tasks(&self, namespace: &str) -> PipelineResult<Vec<TaskSummary>> {
        let mut state = self.state.write().await;
        state.record("list", namespace)?;
        Ok(state
            .tasks
            .iter()
            .filter(|(_, task)| task.namespace == namespace)
            .map(|(name, task)| TaskSummary {
                name: name.clone(),
                namespace: task.namespace.clone(),
                schedule: task.schedule.clone(),
                state: task.state,
            })
            .collect())
    }

    async fn describe_task(&self, name: &str) -> PipelineResult<Vec<TaskProperty>> {
        let mut state = self.state.write().await;
        state.record("describe", name)?;
        let task = state.task_mut(name)?;
        let predecessors = serde_json::to_string(&task.predecessors).map_err(BordereauError::from)?;
        Ok(vec![
            TaskProperty::new("name", name),
            TaskProperty::new("namespace", task.namespace.clone()),
            TaskProperty::new("schedule", task.schedule.clone().unwrap_or_default()),
            TaskProperty::new("state", task.state.as_str()),
            TaskProperty::new(PREDECESSORS_PROPERTY, predecessors),
        ])
    }

    async fn resume(&self, name: &str) -> PipelineResult<()> {
        let mut state = self.state.write().await;
        state.record("resume", name)?;
        state.task_mut(name)?.state = TaskState::Started;
        Ok(())
    }

    async fn suspend(&self, name: &str) -> PipelineResult<()> {
        let mut state = self.state.write().await;
        state.record("suspend", name)?;
        state.task_mut(name)?.state = TaskState::Suspended;
        Ok(())
    }

    async fn set_schedule(&self, name: &str, schedule: &str) -> PipelineResult<()> {
        let mut state = self.state.write().await;
        state.record("set_schedule", name)?;
        if state.failing_schedule_updates {
            return Err(PipelineError::storage("schedule update rejected"));
        }
        state.task_mut(name)?.schedule = Some(schedule.to_string());
        Ok(())
    }

    async fn execute(&self, name: &str) -> PipelineResult<()> {
        let mut state = self.state.write().await;
        state.record("execute", name)?;
        let task = state.task_mut(name)?;
        if task.state == TaskState::Suspended {
            return Err(PipelineError::Systemic(format!("task {} is suspended", name)));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tasks::graph::TaskGraph;

    #[tokio::test]
    async fn test_describe_reports_predecessors_as_json() {
        let scheduler = MemoryTaskScheduler::new();
        scheduler
            .add_task("bronze", "process_files_task", None, TaskState::Started, &["discover_files_task"])
            .await;

        let rows = scheduler.describe_task("process_files_task").await.unwrap();
        let predecessors = rows.iter().find(|r| r.property == PREDECESSORS_PROPERTY).unwrap();
        assert_eq!(predecessors.value, r#"["discover_files_task"]"#);

        assert!(matches!(
            scheduler.describe_task("missing").await,
            Err(PipelineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_describe_namespace_graph() {
        let scheduler = MemoryTaskScheduler::new();
        scheduler
            .add_task("bronze", "discover_files_task", Some("60 MINUTE"), TaskState::Started, &[])
            .await;
        scheduler
            .add_task("bronze", "process_files_task", None, TaskState::Started, &["discover_files_task"])
            .await;
        scheduler
            .add_task("silver", "transform_task", Some("USING CRON 0 * * * * UTC"), TaskState::Suspended, &[])
            .await;

        let tasks = scheduler.list_tasks("bronze").await.unwrap();
        assert_eq!(tasks.len(), 2);

        let graph = TaskGraph::describe(&scheduler, &tasks).await.unwrap();
        assert_eq!(graph.is_root("discover_files_task"), Some(true));
        assert_eq!(graph.is_root("transform_task"), None);
        assert_eq!(graph.successors_of("discover_files_task"), vec!["process_files_task"]);
    }

    #[tokio::test]
    async fn test_execute_fails_when_suspended_or_unavailable() {
        let scheduler = MemoryTaskScheduler::new();
        scheduler
            .add_task("bronze", "discover_files_task", Some("60 MINUTE"), TaskState::Suspended, &[])
            .await;
        assert!(scheduler.execute("discover_files_task").await.is_err());

        scheduler.resume("discover_files_task").await.unwrap();
        assert!(scheduler.execute("discover_files_task").await.is_ok());

        scheduler.set_unavailable(true).await;
        let err = scheduler.execute("discover_files_task").await.unwrap_err();
        assert!(matches!(err, PipelineError::Systemic(_)));
    }
}
