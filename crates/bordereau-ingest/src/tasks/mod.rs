//! External task scheduler integration
//!
//! Tasks form a DAG through their predecessor lists. Only root tasks carry a
//! trigger schedule of their own; successors run when their predecessors
//! finish. [`TaskDependencyGuard`] enforces that schedule changes only touch
//! root tasks.

pub mod graph;
pub mod guard;
pub mod memory;
pub mod postgres;
pub mod schedule;
pub mod scheduler;

pub use graph::{parse_predecessors, TaskGraph};
pub use guard::{ScheduleChange, TaskDependencyGuard};
pub use memory::MemoryTaskScheduler;
pub use postgres::PgTaskScheduler;
pub use schedule::ScheduleExpr;
pub use scheduler::{TaskProperty, TaskScheduler, TaskState, TaskSummary};
