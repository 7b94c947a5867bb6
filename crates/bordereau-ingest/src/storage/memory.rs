//! In-process object store

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{location_prefix, ObjectStore, StoredObject};
use crate::error::{PipelineError, PipelineResult};

/// Objects held in a map keyed by path.
///
/// Removals of paths registered with [`MemoryObjectStore::fail_removal`] fail,
/// and listings can be slowed with [`MemoryObjectStore::set_list_delay`].
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, u64>>,
    failing_removals: RwLock<HashSet<String>>,
    list_delay: RwLock<Option<Duration>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, path: impl Into<String>, size: u64) -> Self {
        self.objects.get_mut().insert(path.into(), size);
        self
    }

    pub async fn insert(&self, path: impl Into<String>, size: u64) {
        self.objects.write().await.insert(path.into(), size);
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.objects.read().await.contains_key(path)
    }

    pub async fn paths(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    pub async fn fail_removal(&self, path: impl Into<String>) {
        self.failing_removals.write().await.insert(path.into());
    }

    pub async fn set_list_delay(&self, delay: Option<Duration>) {
        *self.list_delay.write().await = delay;
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, location: &str) -> PipelineResult<Vec<StoredObject>> {
        let delay = *self.list_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let prefix = location_prefix(location);
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .map(|(path, size)| StoredObject::new(path.clone(), *size))
            .filter(|object| !object.is_directory_marker())
            .collect())
    }

    async fn remove(&self, path: &str) -> PipelineResult<()> {
        if self.failing_removals.read().await.contains(path) {
            return Err(PipelineError::storage(format!("Access denied removing {}", path)));
        }
        self.objects.write().await.remove(path);
        Ok(())
    }

    async fn put(&self, local_file: &Path, destination: &str) -> PipelineResult<()> {
        let metadata = tokio::fs::metadata(local_file).await?;
        self.objects
            .write()
            .await
            .insert(destination.to_string(), metadata.len());
        Ok(())
    }
}
