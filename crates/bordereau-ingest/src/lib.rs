//! Bordereau Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Ingestion queue for tenant bordereau files landed in object storage.
//!
//! # Components
//!
//! - **Discovery**: reconciles the stage listing with the queue, one PENDING entry per new path
//! - **Dispatch**: claims PENDING entries and runs the processing unit for each file kind
//! - **Reaper**: returns entries stuck in PROCESSING to PENDING
//! - **Coordinator**: manual reprocess and delete requests
//! - **Task guard**: schedule changes on the external scheduler's task DAG
//!
//! [`service::IngestService`] wires these together behind one facade.
//!
//! # Example
//!
//! ```no_run
//! use bordereau_ingest::config::Config;
//! use bordereau_ingest::queue::PgQueueStore;
//! use bordereau_ingest::service::IngestService;
//! use bordereau_ingest::storage::Storage;
//! use bordereau_ingest::tasks::PgTaskScheduler;
//! use bordereau_ingest::units::UnitRegistry;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = sqlx::PgPool::connect(&config.database.url).await?;
//!
//!     let service = IngestService::new(
//!         Arc::new(PgQueueStore::new(pool.clone())),
//!         Arc::new(Storage::new(config.storage.clone())),
//!         Arc::new(PgTaskScheduler::new(pool)),
//!         UnitRegistry::new(),
//!         config.pipeline,
//!         config.scheduler,
//!     );
//!
//!     let report = service.discover().await?;
//!     println!("{} new files queued", report.inserted.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod service;
pub mod storage;
pub mod tasks;
pub mod units;

pub use error::{PipelineError, PipelineResult};
pub use service::IngestService;
