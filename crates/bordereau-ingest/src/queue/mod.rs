//! File processing queue
//!
//! Entries are keyed by storage path and move through
//! `PENDING -> PROCESSING -> SUCCESS | FAILED` with recovery edges back to
//! `PENDING`. All status changes go through
//! [`QueueStore::compare_and_set_status`].

pub mod memory;
pub mod postgres;
pub mod store;
pub mod types;

pub use memory::MemoryQueueStore;
pub use postgres::PgQueueStore;
pub use store::{QueueStore, TimeoutQueueStore};
pub use types::{
    FieldUpdate, NewQueueEntry, QueueEntry, RetryUpdate, StatusCount, Transition, DELETE_NOTE,
    REAPER_NOTE, REQUEUE_NOTE,
};
