//! Task catalogue in Postgres
//!
//! `scheduled_tasks` is the contract with the external task runner: the runner
//! executes started tasks on their schedule and picks up run requests from
//! `requested_at`. This side only reads and edits the catalogue.

use async_trait::async_trait;
use bordereau_common::BordereauError;
use sqlx::PgPool;
use tracing::{info, instrument};

use super::scheduler::{TaskProperty, TaskScheduler, TaskState, TaskSummary, PREDECESSORS_PROPERTY};
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    name: String,
    namespace: String,
    schedule: Option<String>,
    state: String,
    predecessors: Vec<String>,
}

#[derive(Clone)]
pub struct PgTaskScheduler {
    pool: PgPool,
}

impl PgTaskScheduler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn set_state(&self, name: &str, state: TaskState) -> PipelineResult<()> {
        let result = sqlx::query("UPDATE scheduled_tasks SET state = $2 WHERE name = $1")
            .bind(name)
            .bind(state.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::NotFound(format!("task {}", name)));
        }

        info!(task = %name, state = %state, "Task state changed");
        Ok(())
    }
}

#[async_trait]
impl TaskScheduler for PgTaskScheduler {
    #[instrument(skip(self))]
    async fn list_tasks(&self, namespace: &str) -> PipelineResult<Vec<TaskSummary>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"
            SELECT name, namespace, schedule, state, predecessors
            FROM scheduled_tasks
            WHERE namespace = $1
            ORDER BY name
            "#,
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> PipelineResult<TaskSummary> {
                Ok(TaskSummary {
                    state: row.state.parse()?,
                    name: row.name,
                    namespace: row.namespace,
                    schedule: row.schedule,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn describe_task(&self, name: &str) -> PipelineResult<Vec<TaskProperty>> {
        let row: Option<TaskRow> = sqlx::query_as(
            r#"
            SELECT name, namespace, schedule, state, predecessors
            FROM scheduled_tasks
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| PipelineError::NotFound(format!("task {}", name)))?;
        let predecessors = serde_json::to_string(&row.predecessors).map_err(BordereauError::from)?;

        Ok(vec![
            TaskProperty::new("name", row.name),
            TaskProperty::new("namespace", row.namespace),
            TaskProperty::new("schedule", row.schedule.unwrap_or_default()),
            TaskProperty::new("state", row.state),
            TaskProperty::new(PREDECESSORS_PROPERTY, predecessors),
        ])
    }

    #[instrument(skip(self))]
    async fn resume(&self, name: &str) -> PipelineResult<()> {
        self.set_state(name, TaskState::Started).await
    }

    #[instrument(skip(self))]
    async fn suspend(&self, name: &str) -> PipelineResult<()> {
        self.set_state(name, TaskState::Suspended).await
    }

    #[instrument(skip(self))]
    async fn set_schedule(&self, name: &str, schedule: &str) -> PipelineResult<()> {
        let result = sqlx::query("UPDATE scheduled_tasks SET schedule = $2 WHERE name = $1")
            .bind(name)
            .bind(schedule)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::NotFound(format!("task {}", name)));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn execute(&self, name: &str) -> PipelineResult<()> {
        let state: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE scheduled_tasks
            SET requested_at = CASE WHEN state = 'started' THEN NOW() ELSE requested_at END
            WHERE name = $1
            RETURNING state
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        let (state,) = state.ok_or_else(|| PipelineError::NotFound(format!("task {}", name)))?;
        if state.parse::<TaskState>()? == TaskState::Suspended {
            return Err(PipelineError::Systemic(format!(
                "task {} is suspended and will not run",
                name
            )));
        }

        info!(task = %name, "Task run requested");
        Ok(())
    }
}
