//! Task dependency graph
//!
//! The scheduler reports predecessors as a property string on each task. The
//! graph is rebuilt from those strings on every call and never cached, since
//! the topology may change between calls.

use std::collections::{BTreeMap, BTreeSet};

use super::scheduler::{TaskProperty, TaskScheduler, TaskSummary, PREDECESSORS_PROPERTY};
use crate::error::PipelineResult;

/// Parse a predecessors property value.
///
/// Accepts a JSON array (`["db.bronze.discover_files_task"]`), a bare
/// comma-separated list, or an empty value.
pub fn parse_predecessors(value: &str) -> BTreeSet<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        return BTreeSet::new();
    }

    if let Ok(names) = serde_json::from_str::<Vec<String>>(trimmed) {
        return names
            .into_iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
    }

    trimmed
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|n| n.trim().trim_matches('"').trim().to_string())
        .filter(|n| !n.is_empty())
        .collect()
}

/// Predecessor set from a task's description rows.
pub fn predecessors_from_properties(properties: &[TaskProperty]) -> BTreeSet<String> {
    properties
        .iter()
        .find(|p| p.property.eq_ignore_ascii_case(PREDECESSORS_PROPERTY))
        .map(|p| parse_predecessors(&p.value))
        .unwrap_or_default()
}

/// Unqualified task name: `db.bronze.load_task` -> `load_task`.
fn short_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// `task -> set<predecessor>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskGraph {
    predecessors: BTreeMap<String, BTreeSet<String>>,
}

impl TaskGraph {
    /// Graph holding one task, from its description rows.
    pub fn from_properties(task: &str, properties: &[TaskProperty]) -> Self {
        let mut graph = Self::default();
        graph.insert(task, predecessors_from_properties(properties));
        graph
    }

    /// Graph of the listed tasks, describing each one on the scheduler.
    pub async fn describe(scheduler: &dyn TaskScheduler, tasks: &[TaskSummary]) -> PipelineResult<Self> {
        let mut graph = Self::default();
        for task in tasks {
            let properties = scheduler.describe_task(&task.name).await?;
            graph.insert(task.name.as_str(), predecessors_from_properties(&properties));
        }
        Ok(graph)
    }

    fn insert(&mut self, task: &str, predecessors: BTreeSet<String>) {
        self.predecessors.insert(task.to_string(), predecessors);
    }

    pub fn predecessors_of(&self, task: &str) -> Option<&BTreeSet<String>> {
        self.predecessors.get(task)
    }

    /// `None` when the task is not in the graph.
    pub fn is_root(&self, task: &str) -> Option<bool> {
        self.predecessors_of(task).map(BTreeSet::is_empty)
    }

    /// Tasks listing `task` as a predecessor, matched on unqualified names.
    pub fn successors_of(&self, task: &str) -> Vec<&str> {
        let wanted = short_name(task);
        self.predecessors
            .iter()
            .filter(|(_, preds)| {
                preds
                    .iter()
                    .any(|p| short_name(p).eq_ignore_ascii_case(wanted))
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_parse_predecessors_formats() {
        assert!(parse_predecessors("").is_empty());
        assert!(parse_predecessors("  ").is_empty());
        assert!(parse_predecessors("[]").is_empty());
        assert!(parse_predecessors("null").is_empty());
        assert_eq!(
            parse_predecessors(r#"["DB.BRONZE.DISCOVER_FILES_TASK"]"#),
            set(&["DB.BRONZE.DISCOVER_FILES_TASK"])
        );
        assert_eq!(
            parse_predecessors(r#"[ "a", "b" ]"#),
            set(&["a", "b"])
        );
        assert_eq!(parse_predecessors("a, b"), set(&["a", "b"]));
        assert_eq!(parse_predecessors("[a,b]"), set(&["a", "b"]));
    }

    #[test]
    fn test_property_lookup_is_case_insensitive() {
        let rows = vec![
            TaskProperty::new("schedule", "60 MINUTE"),
            TaskProperty::new("PREDECESSORS", r#"["discover_files_task"]"#),
        ];
        assert_eq!(predecessors_from_properties(&rows), set(&["discover_files_task"]));
        assert!(predecessors_from_properties(&rows[..1]).is_empty());
    }

    #[test]
    fn test_single_task_from_properties() {
        let rows = vec![TaskProperty::new("predecessors", "[]")];
        let graph = TaskGraph::from_properties("discover_files_task", &rows);
        assert_eq!(graph.is_root("discover_files_task"), Some(true));
        assert_eq!(graph.is_root("process_files_task"), None);
    }

    #[test]
    fn test_roots_and_successors() {
        let mut graph = TaskGraph::default();
        graph.insert("discover_files_task", BTreeSet::new());
        graph.insert("process_files_task", set(&["DB.BRONZE.DISCOVER_FILES_TASK"]));
        graph.insert("archive_files_task", set(&["process_files_task"]));

        assert_eq!(graph.is_root("discover_files_task"), Some(true));
        assert_eq!(graph.is_root("process_files_task"), Some(false));
        assert_eq!(graph.is_root("missing"), None);
        assert_eq!(graph.successors_of("discover_files_task"), vec!["process_files_task"]);
        assert_eq!(graph.successors_of("process_files_task"), vec!["archive_files_task"]);
    }
}
