//! In-process queue store

use async_trait::async_trait;
use bordereau_common::types::QueueStatus;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::{ensure_removable, QueueStore};
use super::types::{NewQueueEntry, QueueEntry, StatusCount, Transition};
use crate::error::PipelineResult;

/// Status change applied by a compare-and-set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedTransition {
    pub id: Uuid,
    pub from: QueueStatus,
    pub to: QueueStatus,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<Uuid, QueueEntry>,
    history: Vec<AppliedTransition>,
}

impl State {
    fn active_by_path(&self, path: &str) -> Option<&QueueEntry> {
        self.entries
            .values()
            .find(|e| e.path == path && e.status.is_active())
    }
}

/// Queue store backed by a map behind one lock.
///
/// The lock only guards the map; it gives the same per-call atomicity the
/// Postgres store gets from single statements.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    state: RwLock<State>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place an entry as-is, bypassing discovery. Used to stage fixtures.
    pub async fn seed(&self, entry: QueueEntry) {
        self.state.write().await.entries.insert(entry.id, entry);
    }

    /// Snapshot of every entry, oldest discovery first.
    pub async fn entries(&self) -> Vec<QueueEntry> {
        let state = self.state.read().await;
        let mut entries: Vec<QueueEntry> = state.entries.values().cloned().collect();
        sort_oldest_first(&mut entries);
        entries
    }

    /// Every status change applied so far, in order.
    pub async fn history(&self) -> Vec<AppliedTransition> {
        self.state.read().await.history.clone()
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: QueueStatus,
        claimed_at: Option<DateTime<Utc>>,
        new: QueueStatus,
        transition: Transition,
    ) -> PipelineResult<bool> {
        expected.ensure_transition(new)?;

        let mut state = self.state.write().await;
        let Some(entry) = state.entries.get_mut(&id) else {
            return Ok(false);
        };
        if entry.status != expected {
            return Ok(false);
        }
        if claimed_at.is_some_and(|at| entry.processed_at != Some(at)) {
            return Ok(false);
        }

        transition.apply_to(entry, new);
        state.history.push(AppliedTransition {
            id,
            from: expected,
            to: new,
        });
        Ok(true)
    }
}

fn sort_oldest_first(entries: &mut [QueueEntry]) {
    entries.sort_by(|a, b| {
        a.discovered_at
            .cmp(&b.discovered_at)
            .then_with(|| a.path.cmp(&b.path))
    });
}

fn matches_tenant(entry: &QueueEntry, tenant: Option<&str>) -> bool {
    tenant.map_or(true, |t| entry.tenant == t)
}

fn clamp_limit(limit: i64) -> usize {
    usize::try_from(limit.max(0)).unwrap_or(usize::MAX)
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn exists(&self, path: &str) -> PipelineResult<bool> {
        Ok(self.state.read().await.active_by_path(path).is_some())
    }

    async fn insert(&self, entry: NewQueueEntry) -> PipelineResult<bool> {
        let mut state = self.state.write().await;
        if state.active_by_path(&entry.path).is_some() {
            return Ok(false);
        }

        let id = Uuid::new_v4();
        state.entries.insert(id, entry.into_entry(id));
        Ok(true)
    }

    async fn list_by_status(
        &self,
        status: QueueStatus,
        tenant: Option<&str>,
        limit: i64,
    ) -> PipelineResult<Vec<QueueEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<QueueEntry> = state
            .entries
            .values()
            .filter(|e| e.status == status && matches_tenant(e, tenant))
            .cloned()
            .collect();
        sort_oldest_first(&mut entries);
        entries.truncate(clamp_limit(limit));
        Ok(entries)
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: QueueStatus,
        new: QueueStatus,
        transition: Transition,
    ) -> PipelineResult<bool> {
        self.update_status(id, expected, None, new, transition).await
    }

    async fn complete_claim(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        new: QueueStatus,
        transition: Transition,
    ) -> PipelineResult<bool> {
        self.update_status(id, QueueStatus::Processing, Some(claimed_at), new, transition)
            .await
    }

    async fn get(&self, id: Uuid) -> PipelineResult<Option<QueueEntry>> {
        Ok(self.state.read().await.entries.get(&id).cloned())
    }

    async fn find_by_path(&self, path: &str) -> PipelineResult<Option<QueueEntry>> {
        Ok(self.state.read().await.active_by_path(path).cloned())
    }

    async fn list(&self, tenant: Option<&str>, limit: i64) -> PipelineResult<Vec<QueueEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<QueueEntry> = state
            .entries
            .values()
            .filter(|e| matches_tenant(e, tenant))
            .cloned()
            .collect();
        sort_oldest_first(&mut entries);
        entries.reverse();
        entries.truncate(clamp_limit(limit));
        Ok(entries)
    }

    async fn stale_processing(&self, cutoff: DateTime<Utc>) -> PipelineResult<Vec<QueueEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<QueueEntry> = state
            .entries
            .values()
            .filter(|e| {
                e.status == QueueStatus::Processing && e.processed_at.map_or(true, |at| at < cutoff)
            })
            .cloned()
            .collect();
        sort_oldest_first(&mut entries);
        Ok(entries)
    }

    async fn remove_if_status(&self, id: Uuid, expected: QueueStatus) -> PipelineResult<bool> {
        ensure_removable(expected)?;

        let mut state = self.state.write().await;
        match state.entries.get(&id) {
            Some(entry) if entry.status == expected => {
                state.entries.remove(&id);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn status_counts(&self, tenant: Option<&str>) -> PipelineResult<Vec<StatusCount>> {
        let state = self.state.read().await;
        let mut counts: BTreeMap<(String, &'static str), (QueueStatus, i64)> = BTreeMap::new();
        for entry in state.entries.values().filter(|e| matches_tenant(e, tenant)) {
            counts
                .entry((entry.tenant.clone(), entry.status.as_str()))
                .or_insert((entry.status, 0))
                .1 += 1;
        }

        Ok(counts
            .into_iter()
            .map(|((tenant, _), (status, count))| StatusCount {
                tenant,
                status,
                count,
            })
            .collect())
    }
}
