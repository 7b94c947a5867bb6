//! Object storage for the ingestion stage
//!
//! Discovery lists a storage location, delete removes objects and upload puts
//! local files. [`Storage`] talks to S3 (or MinIO); [`MemoryObjectStore`] is an
//! in-process stand-in.

use async_trait::async_trait;
use bordereau_common::types::StoragePath;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use serde::{Serialize, Serializer};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{with_timeout, PipelineError, PipelineResult};

pub mod config;
pub mod memory;

pub use memory::MemoryObjectStore;

/// An object observed at a storage location
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObject {
    /// Storage-relative path, e.g. `src/acme/claims.csv`
    pub name: String,
    pub size: u64,
}

impl StoredObject {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }

    /// Folder placeholder such as `src/acme/`
    pub fn is_directory_marker(&self) -> bool {
        StoragePath::parse(&self.name).is_directory_marker()
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Objects currently stored under `location`. Directory placeholders are omitted.
    async fn list(&self, location: &str) -> PipelineResult<Vec<StoredObject>>;

    /// Remove an object. Removing a missing object succeeds.
    async fn remove(&self, path: &str) -> PipelineResult<()>;

    /// Copy a local file to `destination`.
    async fn put(&self, local_file: &Path, destination: &str) -> PipelineResult<()>;
}

/// Listing with a deadline. A timeout surfaces as [`PipelineError::Timeout`],
/// never as an empty list.
pub async fn list_objects(
    store: &dyn ObjectStore,
    location: &str,
    timeout: Duration,
) -> PipelineResult<Vec<StoredObject>> {
    with_timeout("object listing", timeout, store.list(location)).await
}

/// Informational object count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectCount {
    Known(u64),
    /// The count could not be determined in time
    Unknown,
}

impl Serialize for ObjectCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ObjectCount::Known(count) => serializer.serialize_u64(*count),
            ObjectCount::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

impl std::fmt::Display for ObjectCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectCount::Known(count) => write!(f, "{}", count),
            ObjectCount::Unknown => f.write_str("unknown"),
        }
    }
}

/// Count objects at `location`, degrading to [`ObjectCount::Unknown`] on any failure.
pub async fn count_objects(store: &dyn ObjectStore, location: &str, timeout: Duration) -> ObjectCount {
    match list_objects(store, location, timeout).await {
        Ok(objects) => ObjectCount::Known(objects.len() as u64),
        Err(e) => {
            warn!(location = %location, error = %e, "Could not count stage objects");
            ObjectCount::Unknown
        },
    }
}

/// Listing prefix for a location: `src` becomes `src/`.
pub fn location_prefix(location: &str) -> String {
    let trimmed = location.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// S3-backed object store
#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
}

impl Storage {
    pub fn new(config: config::StorageConfig) -> Self {
        debug!(
            bucket = %config.bucket,
            endpoint = ?config.endpoint,
            "Initializing storage"
        );

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "bordereau-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!("Storage client initialized for bucket: {}", config.bucket);

        Self {
            client,
            bucket: config.bucket,
        }
    }
}

#[async_trait]
impl ObjectStore for Storage {
    #[instrument(skip(self))]
    async fn list(&self, location: &str) -> PipelineResult<Vec<StoredObject>> {
        let prefix = location_prefix(location);
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| {
                    PipelineError::storage(format!(
                        "Failed to list s3://{}/{}: {}",
                        self.bucket,
                        prefix,
                        DisplayErrorContext(&e)
                    ))
                })?;

            objects.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| {
                        obj.key().map(|key| StoredObject::new(key, obj.size().unwrap_or(0).max(0) as u64))
                    })
                    .filter(|obj| !obj.is_directory_marker()),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                },
                _ => break,
            }
        }

        debug!("Listed {} objects in s3://{}/{}", objects.len(), self.bucket, prefix);

        Ok(objects)
    }

    #[instrument(skip(self))]
    async fn remove(&self, path: &str) -> PipelineResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| {
                PipelineError::storage(format!("Failed to delete {}: {}", path, DisplayErrorContext(&e)))
            })?;

        info!("Deleted s3://{}/{}", self.bucket, path);

        Ok(())
    }

    #[instrument(skip(self))]
    async fn put(&self, local_file: &Path, destination: &str) -> PipelineResult<()> {
        let body = ByteStream::from_path(local_file)
            .await
            .map_err(|e| PipelineError::storage(format!("Failed to read {}: {}", local_file.display(), e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(destination)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                PipelineError::storage(format!(
                    "Failed to upload to {}: {}",
                    destination,
                    DisplayErrorContext(&e)
                ))
            })?;

        info!("Uploaded {} to s3://{}/{}", local_file.display(), self.bucket, destination);

        Ok(())
    }
}
