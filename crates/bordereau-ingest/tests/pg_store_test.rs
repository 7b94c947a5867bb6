//! Postgres store integration tests
//!
//! These use the #[sqlx::test] macro, which creates a fresh database per test
//! and applies the workspace migrations. They need DATABASE_URL pointing at a
//! Postgres server and are ignored by default:
//!
//! ```text
//! DATABASE_URL=postgresql://localhost/bordereau cargo test -p bordereau-ingest -- --ignored
//! ```

use bordereau_common::types::{FileKind, QueueStatus, StoragePath};
use bordereau_ingest::error::ErrorKind;
use bordereau_ingest::queue::{NewQueueEntry, PgQueueStore, QueueStore, Transition};
use bordereau_ingest::storage::StoredObject;
use bordereau_ingest::tasks::graph::predecessors_from_properties;
use bordereau_ingest::tasks::{PgTaskScheduler, TaskScheduler, TaskState};
use chrono::{Duration as ChronoDuration, SubsecRound, Utc};
use sqlx::PgPool;

fn new_entry(path: &str) -> NewQueueEntry {
    NewQueueEntry::from_object(&StoredObject::new(path, 512), &StoragePath::parse(path))
}

// ============================================================================
// Queue Store
// ============================================================================

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_insert_is_idempotent_per_live_path(pool: PgPool) {
    let store = PgQueueStore::new(pool);

    assert!(store.insert(new_entry("src/acme/a.csv")).await.unwrap());
    assert!(!store.insert(new_entry("src/acme/a.csv")).await.unwrap());
    assert!(store.exists("src/acme/a.csv").await.unwrap());

    let entry = store.find_by_path("src/acme/a.csv").await.unwrap().unwrap();
    assert_eq!(entry.status, QueueStatus::Pending);
    assert_eq!(entry.tenant, "acme");
    assert_eq!(entry.kind, FileKind::Csv);
    assert_eq!(entry.size_bytes, 512);
    assert_eq!(entry.retry_count, 0);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_deleted_entry_does_not_block_rediscovery(pool: PgPool) {
    let store = PgQueueStore::new(pool);
    store.insert(new_entry("src/acme/a.csv")).await.unwrap();
    let entry = store.find_by_path("src/acme/a.csv").await.unwrap().unwrap();

    store
        .compare_and_set_status(entry.id, QueueStatus::Pending, QueueStatus::Processing, Transition::claim(Utc::now()))
        .await
        .unwrap();
    store
        .compare_and_set_status(
            entry.id,
            QueueStatus::Processing,
            QueueStatus::Deleted,
            Transition::soft_delete("gone"),
        )
        .await
        .unwrap();

    assert!(!store.exists("src/acme/a.csv").await.unwrap());
    assert!(store.insert(new_entry("src/acme/a.csv")).await.unwrap());

    let live = store.find_by_path("src/acme/a.csv").await.unwrap().unwrap();
    assert_ne!(live.id, entry.id);
    assert_eq!(store.list(None, 10).await.unwrap().len(), 2);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_complete_claim_requires_matching_claim_stamp(pool: PgPool) {
    let store = PgQueueStore::new(pool);
    store.insert(new_entry("src/acme/a.csv")).await.unwrap();
    let id = store.find_by_path("src/acme/a.csv").await.unwrap().unwrap().id;

    let first = Utc::now().trunc_subsecs(6) - ChronoDuration::minutes(30);
    store
        .compare_and_set_status(id, QueueStatus::Pending, QueueStatus::Processing, Transition::claim(first))
        .await
        .unwrap();
    store
        .compare_and_set_status(id, QueueStatus::Processing, QueueStatus::Pending, Transition::reap())
        .await
        .unwrap();
    let second = Utc::now().trunc_subsecs(6);
    store
        .compare_and_set_status(id, QueueStatus::Pending, QueueStatus::Processing, Transition::claim(second))
        .await
        .unwrap();

    assert!(!store
        .complete_claim(id, first, QueueStatus::Success, Transition::succeed("Processed 1 rows"))
        .await
        .unwrap());
    assert_eq!(store.get(id).await.unwrap().unwrap().status, QueueStatus::Processing);

    assert!(store
        .complete_claim(id, second, QueueStatus::Success, Transition::succeed("Processed 1 rows"))
        .await
        .unwrap());
    assert_eq!(store.get(id).await.unwrap().unwrap().status, QueueStatus::Success);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_compare_and_set_applies_transition_fields(pool: PgPool) {
    let store = PgQueueStore::new(pool);
    store.insert(new_entry("src/acme/a.csv")).await.unwrap();
    let id = store.find_by_path("src/acme/a.csv").await.unwrap().unwrap().id;

    assert!(store
        .compare_and_set_status(id, QueueStatus::Pending, QueueStatus::Processing, Transition::claim(Utc::now()))
        .await
        .unwrap());
    // Expected status no longer matches
    assert!(!store
        .compare_and_set_status(id, QueueStatus::Pending, QueueStatus::Processing, Transition::claim(Utc::now()))
        .await
        .unwrap());

    store
        .compare_and_set_status(id, QueueStatus::Processing, QueueStatus::Failed, Transition::fail("disk full"))
        .await
        .unwrap();
    let failed = store.get(id).await.unwrap().unwrap();
    assert_eq!(failed.status, QueueStatus::Failed);
    assert_eq!(failed.error_text.as_deref(), Some("disk full"));
    assert_eq!(failed.retry_count, 1);
    assert!(failed.processed_at.is_some());

    store
        .compare_and_set_status(id, QueueStatus::Failed, QueueStatus::Pending, Transition::requeue())
        .await
        .unwrap();
    let requeued = store.get(id).await.unwrap().unwrap();
    assert_eq!(requeued.status, QueueStatus::Pending);
    assert!(requeued.error_text.is_none());
    assert!(requeued.processed_at.is_none());
    assert_eq!(requeued.retry_count, 0);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_illegal_transition_touches_nothing(pool: PgPool) {
    let store = PgQueueStore::new(pool);
    store.insert(new_entry("src/acme/a.csv")).await.unwrap();
    let id = store.find_by_path("src/acme/a.csv").await.unwrap().unwrap().id;

    let err = store
        .compare_and_set_status(
            id,
            QueueStatus::Pending,
            QueueStatus::Success,
            Transition::succeed("skipped ahead"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolicyViolation);
    assert_eq!(store.get(id).await.unwrap().unwrap().status, QueueStatus::Pending);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_stale_processing_and_removal(pool: PgPool) {
    let store = PgQueueStore::new(pool.clone());
    store.insert(new_entry("src/acme/a.csv")).await.unwrap();
    store.insert(new_entry("src/acme/b.csv")).await.unwrap();
    let a = store.find_by_path("src/acme/a.csv").await.unwrap().unwrap();
    let b = store.find_by_path("src/acme/b.csv").await.unwrap().unwrap();

    store
        .compare_and_set_status(a.id, QueueStatus::Pending, QueueStatus::Processing, Transition::claim(Utc::now()))
        .await
        .unwrap();
    sqlx::query("UPDATE file_processing_queue SET processed_at = NOW() - INTERVAL '10 minutes' WHERE id = $1")
        .bind(a.id)
        .execute(&pool)
        .await
        .unwrap();

    let stale = store
        .stale_processing(Utc::now() - ChronoDuration::minutes(5))
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, a.id);

    // PROCESSING rows are kept as history
    assert!(store.remove_if_status(a.id, QueueStatus::Processing).await.is_err());
    assert!(store.remove_if_status(b.id, QueueStatus::Pending).await.unwrap());
    assert!(store.get(b.id).await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_status_counts_by_tenant(pool: PgPool) {
    let store = PgQueueStore::new(pool);
    store.insert(new_entry("src/acme/a.csv")).await.unwrap();
    store.insert(new_entry("src/acme/b.csv")).await.unwrap();
    store.insert(new_entry("src/globex/c.xlsx")).await.unwrap();

    let counts = store.status_counts(None).await.unwrap();
    let acme = counts.iter().find(|c| c.tenant == "acme").unwrap();
    assert_eq!(acme.status, QueueStatus::Pending);
    assert_eq!(acme.count, 2);

    let globex_only = store.status_counts(Some("globex")).await.unwrap();
    assert_eq!(globex_only.len(), 1);
    assert_eq!(globex_only[0].count, 1);

    let pending = store
        .list_by_status(QueueStatus::Pending, Some("acme"), 10)
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
}

// ============================================================================
// Task Scheduler
// ============================================================================

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_task_catalogue(pool: PgPool) {
    let scheduler = PgTaskScheduler::new(pool);

    let tasks = scheduler.list_tasks("bronze").await.unwrap();
    assert_eq!(tasks.len(), 2);

    let properties = scheduler.describe_task("process_files_task").await.unwrap();
    let predecessors = predecessors_from_properties(&properties);
    assert!(predecessors.contains("discover_files_task"));

    // Seeded tasks start suspended
    let err = scheduler.execute("discover_files_task").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Systemic);

    scheduler.resume("discover_files_task").await.unwrap();
    scheduler.set_schedule("discover_files_task", "15 MINUTE").await.unwrap();
    scheduler.execute("discover_files_task").await.unwrap();

    let discover = scheduler
        .list_tasks("bronze")
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.name == "discover_files_task")
        .unwrap();
    assert_eq!(discover.state, TaskState::Started);
    assert_eq!(discover.schedule.as_deref(), Some("15 MINUTE"));

    let err = scheduler.execute("no_such_task").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
