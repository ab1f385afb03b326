//! Transfer service: start, resumption, status and cancel

mod helpers;

use helpers::{memory_db, seed_three, FakeDriverFactory, Handshake, Script};
use portal_common::events::EventBus;
use portal_transfer::db::outcomes;
use portal_transfer::models::{JobStatus, TransferFilters};
use portal_transfer::services::{
    JobRegistry, SqliteOutcomeSink, SqliteRecordSelector, TransferOrchestrator, TransferService,
    TransferServiceError,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn service(db: &SqlitePool, factory: Arc<FakeDriverFactory>) -> TransferService {
    let orchestrator = TransferOrchestrator::new(
        EventBus::new(100),
        Arc::new(SqliteOutcomeSink::new(db.clone())),
    )
    .with_job_store(db.clone());

    TransferService::new(
        db.clone(),
        JobRegistry::new(),
        Arc::new(SqliteRecordSelector::new(db.clone())),
        factory,
        orchestrator,
    )
}

#[tokio::test]
async fn test_nothing_to_transfer_starts_no_session() {
    let db = memory_db().await;
    let factory = Arc::new(FakeDriverFactory::new(Script::default()));
    let service = service(&db, factory.clone());

    let result = service.start_job(None, TransferFilters::default()).await;

    assert!(matches!(result, Err(TransferServiceError::NothingToTransfer)));
    assert_eq!(factory.probe.created(), 0);
    assert!(service.list_jobs().await.is_empty());
}

#[tokio::test]
async fn test_rerun_selects_only_remaining_records() {
    let db = memory_db().await;
    seed_three(&db).await;
    let factory = Arc::new(FakeDriverFactory::new(Script::rejecting(&["cs-2"])));
    let service = service(&db, factory.clone());

    let first = service.start_job(None, TransferFilters::default()).await.unwrap();
    assert_eq!(first.total, 3);
    let summary = first.task.await.unwrap();
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);

    let second = service.start_job(None, TransferFilters::default()).await.unwrap();
    assert_eq!(second.total, 1);
    second.task.await.unwrap();

    assert_eq!(factory.probe.submitted(), vec!["cs-1", "cs-2", "cs-3", "cs-2"]);

    let state = outcomes::transfer_state(&db, "cs-2").await.unwrap().unwrap();
    assert!(state.transferred_at.is_none());
    assert_eq!(state.transfer_retry_count, 2);
}

#[tokio::test]
async fn test_caller_supplied_job_id_is_used_once() {
    let db = memory_db().await;
    seed_three(&db).await;
    let service = service(&db, Arc::new(FakeDriverFactory::new(Script::default())));

    let job_id = Uuid::new_v4();
    let started = service
        .start_job(Some(job_id), TransferFilters::default())
        .await
        .unwrap();
    assert_eq!(started.job_id, job_id);

    let again = service.start_job(Some(job_id), TransferFilters::default()).await;
    assert!(matches!(again, Err(TransferServiceError::DuplicateJob(id)) if id == job_id));

    started.task.await.unwrap();
}

#[tokio::test]
async fn test_status_and_cancel_after_completion() {
    let db = memory_db().await;
    seed_three(&db).await;
    let service = service(&db, Arc::new(FakeDriverFactory::new(Script::default())));

    let started = service.start_job(None, TransferFilters::default()).await.unwrap();
    let job_id = started.job_id;
    started.task.await.unwrap();

    let job = service.status(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.completed, 3);

    let cancel = service.cancel(job_id).await;
    assert!(matches!(
        cancel,
        Err(TransferServiceError::AlreadyFinished { status: JobStatus::Completed, .. })
    ));

    assert!(matches!(
        service.cancel(Uuid::new_v4()).await,
        Err(TransferServiceError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_status_survives_restart() {
    let db = memory_db().await;
    seed_three(&db).await;

    let job_id = {
        let service = service(&db, Arc::new(FakeDriverFactory::new(Script::default())));
        let started = service.start_job(None, TransferFilters::default()).await.unwrap();
        started.task.await.unwrap();
        started.job_id
    };

    // A fresh service has an empty registry
    let restarted = service(&db, Arc::new(FakeDriverFactory::new(Script::default())));
    assert!(restarted.list_jobs().await.is_empty());

    let job = restarted.status(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(restarted.status(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_stale_jobs_are_cancelled_at_startup() {
    let db = memory_db().await;
    seed_three(&db).await;

    let mut job = portal_transfer::models::TransferJob::new(Uuid::new_v4(), TransferFilters::default(), 3);
    job.transition_to(JobStatus::Running);
    portal_transfer::db::jobs::save_job(&db, &job).await.unwrap();

    assert_eq!(portal_transfer::db::jobs::cleanup_stale_jobs(&db).await.unwrap(), 1);

    let service = service(&db, Arc::new(FakeDriverFactory::new(Script::default())));
    let stored = service.status(job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_shutdown_cancels_running_jobs_and_closes_sessions() {
    let db = memory_db().await;
    seed_three(&db).await;
    let factory = Arc::new(FakeDriverFactory::new(Script {
        handshake: Handshake::Hangs,
        ..Script::default()
    }));
    let service = service(&db, factory.clone());

    let started = service.start_job(None, TransferFilters::default()).await.unwrap();
    let job_id = started.job_id;

    assert!(service.shutdown(Duration::from_secs(5)).await);

    assert_eq!(factory.probe.closes(), 1);
    let summary = started.task.await.unwrap();
    assert_eq!(summary.status, JobStatus::Cancelled);

    let stored = portal_transfer::db::jobs::load_job(&db, job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);

    let refused = service.start_job(None, TransferFilters::default()).await;
    assert!(matches!(refused, Err(TransferServiceError::ShuttingDown)));
}

#[tokio::test]
async fn test_finished_jobs_beyond_retention_fall_back_to_database() {
    let db = memory_db().await;
    seed_three(&db).await;
    // Every record is rejected so each run selects all three again
    let factory = Arc::new(FakeDriverFactory::new(Script::rejecting(&["cs-1", "cs-2", "cs-3"])));
    let service = service(&db, factory).with_finished_retention(1);

    let first = service.start_job(None, TransferFilters::default()).await.unwrap();
    let first_id = first.job_id;
    first.task.await.unwrap();

    let second = service.start_job(None, TransferFilters::default()).await.unwrap();
    let second_id = second.job_id;
    second.task.await.unwrap();

    assert!(!service.registry().contains(first_id).await);
    assert!(service.registry().contains(second_id).await);

    let listed: Vec<Uuid> = service.list_jobs().await.iter().map(|job| job.job_id).collect();
    assert_eq!(listed, vec![second_id]);

    let evicted = service.status(first_id).await.unwrap().unwrap();
    assert_eq!(evicted.status, JobStatus::Completed);
    assert_eq!(evicted.progress.failed, 3);
}
