//! Configuration management

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::storage::config::StorageConfig;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/bordereau";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Storage location that discovery lists and uploads land in.
pub const DEFAULT_SOURCE_LOCATION: &str = "src";

/// Pending entries claimed per dispatch call.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Entries of one batch driven at the same time.
pub const DEFAULT_DISPATCH_CONCURRENCY: usize = 1;

/// Processing unit timeout in seconds (20 minutes).
pub const DEFAULT_UNIT_TIMEOUT_SECS: u64 = 1200;

/// Timeout for store and scheduler metadata calls in seconds.
pub const DEFAULT_METADATA_TIMEOUT_SECS: u64 = 30;

/// Timeout for object listings in seconds.
pub const DEFAULT_LIST_TIMEOUT_SECS: u64 = 10;

/// Age after which a PROCESSING entry is considered stuck (5 minutes).
pub const DEFAULT_STALE_AFTER_SECS: u64 = 300;

/// Upload size cap (100 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Rows returned by the queue view.
pub const DEFAULT_QUEUE_VIEW_LIMIT: i64 = 100;

/// Extensions accepted by upload.
pub const ALLOWED_UPLOAD_EXTENSIONS: [&str; 3] = ["csv", "xlsx", "xls"];

// ============================================================================
// Scheduler Configuration Constants
// ============================================================================

/// Namespace whose tasks are listed.
pub const DEFAULT_TASK_NAMESPACE: &str = "bronze";

/// Root task that discovers files and whose successors process them.
pub const DEFAULT_DISCOVERY_TASK: &str = "discover_files_task";

/// Ingest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
    pub units: UnitConfig,
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Queue and dispatch tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub source_location: String,
    pub batch_size: usize,
    pub dispatch_concurrency: usize,
    pub unit_timeout_secs: u64,
    pub metadata_timeout_secs: u64,
    pub list_timeout_secs: u64,
    pub stale_after_secs: u64,
    pub max_upload_bytes: u64,
    pub queue_view_limit: i64,
}

/// Names of the database functions run per file kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitConfig {
    pub csv_unit: Option<String>,
    pub excel_unit: Option<String>,
}

/// Scheduler task catalogue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub namespace: String,
    pub discovery_task: String,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            database: DatabaseConfig {
                url: env_string("DATABASE_URL", DEFAULT_DATABASE_URL),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_or("DATABASE_IDLE_TIMEOUT", DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
            },
            pipeline: PipelineConfig {
                source_location: env_string("BORDEREAU_SOURCE_LOCATION", DEFAULT_SOURCE_LOCATION),
                batch_size: env_or("BORDEREAU_BATCH_SIZE", DEFAULT_BATCH_SIZE),
                dispatch_concurrency: env_or(
                    "BORDEREAU_DISPATCH_CONCURRENCY",
                    DEFAULT_DISPATCH_CONCURRENCY,
                ),
                unit_timeout_secs: env_or("BORDEREAU_UNIT_TIMEOUT_SECS", DEFAULT_UNIT_TIMEOUT_SECS),
                metadata_timeout_secs: env_or(
                    "BORDEREAU_METADATA_TIMEOUT_SECS",
                    DEFAULT_METADATA_TIMEOUT_SECS,
                ),
                list_timeout_secs: env_or("BORDEREAU_LIST_TIMEOUT_SECS", DEFAULT_LIST_TIMEOUT_SECS),
                stale_after_secs: env_or("BORDEREAU_STALE_AFTER_SECS", DEFAULT_STALE_AFTER_SECS),
                max_upload_bytes: env_or("BORDEREAU_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
                queue_view_limit: env_or("BORDEREAU_QUEUE_VIEW_LIMIT", DEFAULT_QUEUE_VIEW_LIMIT),
            },
            units: UnitConfig {
                csv_unit: env_optional("BORDEREAU_CSV_UNIT"),
                excel_unit: env_optional("BORDEREAU_EXCEL_UNIT"),
            },
            scheduler: SchedulerConfig {
                namespace: env_string("BORDEREAU_TASK_NAMESPACE", DEFAULT_TASK_NAMESPACE),
                discovery_task: env_string("BORDEREAU_DISCOVERY_TASK", DEFAULT_DISCOVERY_TASK),
            },
            storage: StorageConfig::from_env()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        self.pipeline.validate()?;

        if self.scheduler.discovery_task.trim().is_empty() {
            anyhow::bail!("Discovery task name cannot be empty");
        }

        if self.units.csv_unit.is_none() && self.units.excel_unit.is_none() {
            tracing::warn!("No processing units configured - every dispatched entry will fail");
        }

        Ok(())
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let location = self.source_location.trim_matches('/');
        if location.is_empty() || location.contains('/') {
            anyhow::bail!(
                "Source location must be a single path segment, got '{}'",
                self.source_location
            );
        }

        if self.batch_size == 0 {
            anyhow::bail!("Batch size must be greater than 0");
        }

        if self.dispatch_concurrency == 0 {
            anyhow::bail!("Dispatch concurrency must be greater than 0");
        }

        if self.dispatch_concurrency > self.batch_size {
            tracing::warn!(
                concurrency = self.dispatch_concurrency,
                batch_size = self.batch_size,
                "Dispatch concurrency exceeds batch size; extra slots stay idle"
            );
        }

        for (name, secs) in [
            ("unit", self.unit_timeout_secs),
            ("metadata", self.metadata_timeout_secs),
            ("list", self.list_timeout_secs),
            ("stale-after", self.stale_after_secs),
        ] {
            if secs == 0 {
                anyhow::bail!("The {} timeout must be greater than 0 seconds", name);
            }
        }

        if self.queue_view_limit <= 0 {
            anyhow::bail!("Queue view limit must be greater than 0");
        }

        Ok(())
    }

    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(self.unit_timeout_secs)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Location without surrounding slashes, e.g. `src`.
    pub fn location(&self) -> &str {
        self.source_location.trim_matches('/')
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_location: DEFAULT_SOURCE_LOCATION.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            dispatch_concurrency: DEFAULT_DISPATCH_CONCURRENCY,
            unit_timeout_secs: DEFAULT_UNIT_TIMEOUT_SECS,
            metadata_timeout_secs: DEFAULT_METADATA_TIMEOUT_SECS,
            list_timeout_secs: DEFAULT_LIST_TIMEOUT_SECS,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            queue_view_limit: DEFAULT_QUEUE_VIEW_LIMIT,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_TASK_NAMESPACE.to_string(),
            discovery_task: DEFAULT_DISCOVERY_TASK.to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            pipeline: PipelineConfig::default(),
            units: UnitConfig::default(),
            scheduler: SchedulerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}
