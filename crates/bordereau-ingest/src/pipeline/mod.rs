//! Queue pipeline components
//!
//! Each component runs one pass to completion and returns a report. None of
//! them owns a background loop; an external trigger decides when they run.

pub mod coordinator;
pub mod discovery;
pub mod dispatcher;
pub mod reaper;

pub use coordinator::{BulkDeleteFailure, BulkDeleteReport, Coordinator, DeleteOutcome, QueueAction};
pub use discovery::{DiscoveryReconciler, DiscoveryReport};
pub use dispatcher::{contains_error_marker, DispatchFailure, DispatchReport, Dispatcher};
pub use reaper::{ReapReport, StuckJobReaper};
