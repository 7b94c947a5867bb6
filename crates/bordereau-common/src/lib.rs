//! Bordereau Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Bordereau ingestion pipeline.
//!
//! # Overview
//!
//! This crate provides common functionality used across all Bordereau workspace members:
//!
//! - **Error Handling**: Shared error type and result alias
//! - **Logging**: Centralized `tracing` subscriber initialization
//! - **Types**: Queue status state machine, file kinds and tenant inference
//! - **Text**: Sanitizing and truncating diagnostic text before it is persisted
//!
//! # Example
//!
//! ```
//! use bordereau_common::types::{FileKind, QueueStatus, StoragePath};
//!
//! let path = StoragePath::parse("src/acme/claims.csv");
//! assert_eq!(path.tenant(), Some("acme"));
//! assert_eq!(FileKind::from_path("src/acme/claims.csv"), FileKind::Csv);
//! assert!(QueueStatus::Pending.can_transition_to(QueueStatus::Processing));
//! ```

pub mod error;
pub mod logging;
pub mod text;
pub mod types;

// Re-export commonly used types
pub use error::{BordereauError, Result};
