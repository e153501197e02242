//! Sync task tests against a real SQLite database and an in-memory tracker

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pdt_common::db::{
    init_database, CIProjectInput, CaseInput, DeploymentReportInput, DeploymentStatus, EmailStatus, InstanceInput,
    MigrationInput, MigrationReportInput, MigrationStatus, QueuedEmail, ReleaseInput,
};
use pdt_common::store::{cases, ci_projects, deployments, emails, instances, migrations, releases, reports};
use pdt_sync::mail::{MailError, MailTransport};
use pdt_sync::queue::{QueuedTask, RetryPolicy, TaskQueue, TaskWorker};
use pdt_sync::tasks::{
    fetch_cases, send_emails, update_case_from_tracker, update_case_to_tracker, update_cases_from_tracker,
    update_cases_to_tracker, EmailFlush, PushOutcome, SyncContext, Task, TaskError,
};
use pdt_sync::tracker::{CaseUpdate, IssueTracker, TrackerCase, TrackerError};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Default)]
struct MockTracker {
    cases: Mutex<HashMap<i64, TrackerCase>>,
    search_results: Vec<i64>,
    /// Number of upcoming fetches that fail with a network error
    failing_fetches: AtomicUsize,
    fail_updates: AtomicBool,
    fetches: AtomicUsize,
    updates: Mutex<Vec<CaseUpdate>>,
}

impl MockTracker {
    fn with_case(case: TrackerCase) -> Self {
        let tracker = Self::default();
        tracker.cases.lock().unwrap().insert(case.id, case);
        tracker
    }

    fn updates(&self) -> Vec<CaseUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl IssueTracker for MockTracker {
    async fn fetch_case(&self, case_id: i64) -> Result<TrackerCase, TrackerError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let pending_failures = self.failing_fetches.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.failing_fetches.store(pending_failures - 1, Ordering::SeqCst);
            return Err(TrackerError::NetworkError("connection reset".to_string()));
        }
        self.cases
            .lock()
            .unwrap()
            .get(&case_id)
            .cloned()
            .ok_or(TrackerError::CaseNotFound(case_id))
    }

    async fn search(&self, _query: &str) -> Result<Vec<i64>, TrackerError> {
        Ok(self.search_results.clone())
    }

    async fn update_case(&self, update: &CaseUpdate) -> Result<(), TrackerError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(TrackerError::ApiError(503, "unavailable".to_string()));
        }
        if let Some(case) = self.cases.lock().unwrap().get_mut(&update.case_id) {
            case.title = update.title.clone();
            case.tags = update.tags.clone();
        }
        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }
}

/// Rejects every recipient on the `invalid` domain
#[derive(Default)]
struct MockMail {
    delivered: Mutex<Vec<String>>,
}

#[async_trait]
impl MailTransport for MockMail {
    async fn send(&self, email: &QueuedEmail) -> Result<(), MailError> {
        if email.recipient.ends_with("@invalid") {
            return Err(MailError::Rejected(550, "no such user".to_string()));
        }
        self.delivered.lock().unwrap().push(email.recipient.clone());
        Ok(())
    }
}

async fn setup() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("pdt.db")).await.unwrap();
    (dir, pool)
}

fn context(
    pool: &SqlitePool,
    tracker: Arc<MockTracker>,
    mail: Option<Arc<MockMail>>,
) -> (SyncContext, UnboundedReceiver<QueuedTask>) {
    let (queue, receiver) = TaskQueue::new();
    let ctx = SyncContext {
        db: pool.clone(),
        tracker,
        mail: mail.map(|m| m as Arc<dyn MailTransport>),
        queue,
        search_query: "status:\"Resolved\"".to_string(),
        email_max_attempts: 2,
    };
    (ctx, receiver)
}

fn drain(receiver: &mut UnboundedReceiver<QueuedTask>) -> Vec<Task> {
    let mut tasks = Vec::new();
    while let Ok(queued) = receiver.try_recv() {
        tasks.push(queued.task);
    }
    tasks
}

/// `prod` linked to `alpha`, release 5, case 1 with a migration, deployed on prod
async fn seed_deployed_case(pool: &SqlitePool) -> i64 {
    ci_projects::create_ci_project(
        pool,
        CIProjectInput {
            name: "alpha".to_string(),
            description: String::new(),
        },
    )
    .await
    .unwrap();
    instances::create_instance(
        pool,
        InstanceInput {
            name: "prod".to_string(),
            description: String::new(),
            ci_projects: vec!["alpha".to_string()],
        },
    )
    .await
    .unwrap();
    releases::create_release(pool, ReleaseInput { number: 5, datetime: Utc::now() })
        .await
        .unwrap();
    cases::create_case(
        pool,
        CaseInput {
            id: 1,
            title: "Case 1".to_string(),
            release: Some(5),
            ci_project: Some("alpha".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let migration = migrations::create_migration(
        pool,
        MigrationInput {
            uid: Some("m1".to_string()),
            case: 1,
            category: Default::default(),
            reviewed: true,
            depends_on: vec![],
            steps: None,
        },
    )
    .await
    .unwrap();
    deployments::create_deployment_report(
        pool,
        DeploymentReportInput {
            release: 5,
            instance: "prod".to_string(),
            status: DeploymentStatus::Deployed,
            datetime: Utc::now(),
            log: String::new(),
            cases: vec![1],
        },
    )
    .await
    .unwrap();
    migration.id
}

async fn report_migration(pool: &SqlitePool, migration: i64, status: MigrationStatus) {
    reports::create_migration_report(
        pool,
        MigrationReportInput {
            migration,
            instance: "prod".to_string(),
            status,
            datetime: Utc::now(),
            log: String::new(),
        },
    )
    .await
    .unwrap();
}

fn tracker_case(id: i64) -> TrackerCase {
    TrackerCase {
        id,
        title: "Tracker title".to_string(),
        original_title: Some("Original title".to_string()),
        project: Some("Project".to_string()),
        area: Some("Backend".to_string()),
        fix_for: Some("1516".to_string()),
        fix_for_date: Some("2015-01-18T23:00:00Z".to_string()),
        last_updated: Some("2015-01-20T10:00:00Z".to_string()),
        tags: vec!["reviewed".to_string()],
        ci_project: Some("beta".to_string()),
        revision: Some("abc123".to_string()),
    }
}

/// Tracker side of the case created by `seed_deployed_case`
fn deployed_tracker_case(tags: &[&str]) -> TrackerCase {
    TrackerCase {
        id: 1,
        title: "Case 1".to_string(),
        original_title: None,
        project: None,
        area: None,
        fix_for: Some("5".to_string()),
        fix_for_date: None,
        last_updated: None,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        ci_project: Some("alpha".to_string()),
        revision: None,
    }
}

#[tokio::test]
async fn test_push_clears_edits_and_second_push_makes_no_call() {
    let (_dir, pool) = setup().await;
    let migration = seed_deployed_case(&pool).await;
    report_migration(&pool, migration, MigrationStatus::Applied).await;

    let tracker = Arc::new(MockTracker::with_case(deployed_tracker_case(&[])));
    let (ctx, _receiver) = context(&pool, tracker.clone(), None);

    let outcome = update_case_to_tracker(&ctx, 1).await.unwrap();
    assert_eq!(outcome, PushOutcome::Pushed { edits_cleared: 1 });

    let updates = tracker.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].title, "Case 1");
    assert!(updates[0].tags.contains(&"deployed-prod".to_string()));
    assert!(cases::list_case_edits(&pool, 1).await.unwrap().is_empty());

    let outcome = update_case_to_tracker(&ctx, 1).await.unwrap();
    assert_eq!(outcome, PushOutcome::Skipped);
    assert_eq!(tracker.updates().len(), 1);
}

#[tokio::test]
async fn test_push_waits_for_applied_migration() {
    let (_dir, pool) = setup().await;
    let migration = seed_deployed_case(&pool).await;
    report_migration(&pool, migration, MigrationStatus::Pending).await;

    let tracker = Arc::new(MockTracker::default());
    let (ctx, _receiver) = context(&pool, tracker.clone(), None);

    assert_eq!(update_case_to_tracker(&ctx, 1).await.unwrap(), PushOutcome::Skipped);
    assert!(tracker.updates().is_empty());
    assert_eq!(tracker.fetches.load(Ordering::SeqCst), 0);
    assert_eq!(cases::list_case_edits(&pool, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_push_keeps_edits_pending() {
    let (_dir, pool) = setup().await;
    let migration = seed_deployed_case(&pool).await;
    report_migration(&pool, migration, MigrationStatus::Applied).await;

    let tracker = Arc::new(MockTracker::with_case(deployed_tracker_case(&[])));
    tracker.fail_updates.store(true, Ordering::SeqCst);
    let (ctx, _receiver) = context(&pool, tracker.clone(), None);

    let err = update_case_to_tracker(&ctx, 1).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(cases::list_case_edits(&pool, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_push_keeps_tags_added_in_tracker() {
    let (_dir, pool) = setup().await;
    let migration = seed_deployed_case(&pool).await;
    report_migration(&pool, migration, MigrationStatus::Applied).await;

    let tracker = Arc::new(MockTracker::with_case(deployed_tracker_case(&["customer-x"])));
    let (ctx, _receiver) = context(&pool, tracker.clone(), None);

    // The pull overwrites local tags; the deployed tag stays pending as an edit
    let pulled = update_case_from_tracker(&ctx, 1).await.unwrap();
    assert_eq!(pulled.tags, vec!["customer-x".to_string()]);
    assert_eq!(cases::list_case_edits(&pool, 1).await.unwrap().len(), 1);

    update_case_to_tracker(&ctx, 1).await.unwrap();

    let expected = vec!["customer-x".to_string(), "deployed-prod".to_string()];
    assert_eq!(tracker.updates()[0].tags, expected);
    assert_eq!(cases::get_case(&pool, 1).await.unwrap().tags, expected);
    assert!(cases::list_case_edits(&pool, 1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_push_sends_local_rename_with_tracker_tags() {
    let (_dir, pool) = setup().await;
    let migration = seed_deployed_case(&pool).await;
    report_migration(&pool, migration, MigrationStatus::Applied).await;

    let mut rename = cases::get_case(&pool, 1).await.unwrap();
    rename.title = "Renamed".to_string();
    cases::update_case(
        &pool,
        1,
        CaseInput {
            id: 1,
            title: rename.title,
            tags: rename.tags,
            release: rename.release,
            ci_project: rename.ci_project,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let tracker = Arc::new(MockTracker::with_case(deployed_tracker_case(&["reviewed"])));
    let (ctx, _receiver) = context(&pool, tracker.clone(), None);

    let outcome = update_case_to_tracker(&ctx, 1).await.unwrap();
    assert_eq!(outcome, PushOutcome::Pushed { edits_cleared: 2 });

    let update = &tracker.updates()[0];
    assert_eq!(update.title, "Renamed");
    assert_eq!(update.tags, vec!["reviewed".to_string(), "deployed-prod".to_string()]);
    assert_eq!(cases::get_case(&pool, 1).await.unwrap().title, "Renamed");
}

#[tokio::test]
async fn test_pull_creates_case_with_release_and_ci_project() {
    let (_dir, pool) = setup().await;
    let tracker = Arc::new(MockTracker::with_case(tracker_case(42)));
    let (ctx, _receiver) = context(&pool, tracker, None);

    let case = update_case_from_tracker(&ctx, 42).await.unwrap();

    assert_eq!(case.title, "Tracker title");
    assert_eq!(case.description, "Original title");
    assert_eq!(case.release, Some(1516));
    assert_eq!(case.ci_project.as_deref(), Some("beta"));
    assert_eq!(case.revision, "abc123");
    assert_eq!(case.tags, vec!["reviewed".to_string()]);

    let release_numbers: Vec<i64> = releases::list_releases(&pool).await.unwrap().iter().map(|r| r.number).collect();
    assert_eq!(release_numbers, vec![1516]);
}

#[tokio::test]
async fn test_pull_of_unknown_case_is_not_retried() {
    let (_dir, pool) = setup().await;
    let tracker = Arc::new(MockTracker::default());
    let (ctx, _receiver) = context(&pool, tracker, None);

    let err = update_case_from_tracker(&ctx, 404).await.unwrap_err();
    assert!(matches!(err, TaskError::Tracker(TrackerError::CaseNotFound(404))));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_batch_pull_enqueues_cases_without_release() {
    let (_dir, pool) = setup().await;
    seed_deployed_case(&pool).await;
    cases::create_case(
        &pool,
        CaseInput {
            id: 2,
            title: "Unplanned".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let (ctx, mut receiver) = context(&pool, Arc::new(MockTracker::default()), None);

    assert_eq!(update_cases_from_tracker(&ctx).await.unwrap(), 1);
    assert_eq!(drain(&mut receiver), vec![Task::PullCase(2)]);
}

#[tokio::test]
async fn test_batch_push_enqueues_cases_with_edits() {
    let (_dir, pool) = setup().await;
    seed_deployed_case(&pool).await;

    let (ctx, mut receiver) = context(&pool, Arc::new(MockTracker::default()), None);

    assert_eq!(update_cases_to_tracker(&ctx).await.unwrap(), 1);
    assert_eq!(drain(&mut receiver), vec![Task::PushCase(1)]);
}

#[tokio::test]
async fn test_fetch_enqueues_search_results() {
    let (_dir, pool) = setup().await;
    let tracker = Arc::new(MockTracker {
        search_results: vec![3, 9],
        ..Default::default()
    });
    let (ctx, mut receiver) = context(&pool, tracker, None);

    assert_eq!(fetch_cases(&ctx).await.unwrap(), 2);
    assert_eq!(drain(&mut receiver), vec![Task::PullCase(3), Task::PullCase(9)]);
}

#[tokio::test]
async fn test_email_flush_records_outcomes() {
    let (_dir, pool) = setup().await;
    let good = emails::enqueue_email(&pool, "dev@example.com", "Deployed", "Release 5").await.unwrap();
    emails::enqueue_email(&pool, "nobody@invalid", "Deployed", "Release 5").await.unwrap();

    let mail = Arc::new(MockMail::default());
    let (ctx, _receiver) = context(&pool, Arc::new(MockTracker::default()), Some(mail.clone()));

    let first = send_emails(&ctx).await.unwrap();
    assert_eq!(first, EmailFlush { sent: 1, retrying: 1, failed: 0 });
    assert_eq!(*mail.delivered.lock().unwrap(), vec!["dev@example.com".to_string()]);

    let second = send_emails(&ctx).await.unwrap();
    assert_eq!(second, EmailFlush { sent: 0, retrying: 0, failed: 1 });

    let status: String = sqlx::query_scalar("SELECT status FROM queued_emails WHERE id = ?")
        .bind(good)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, EmailStatus::Sent.as_str());
    assert!(emails::queued_emails(&pool, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_email_flush_without_relay_keeps_queue() {
    let (_dir, pool) = setup().await;
    emails::enqueue_email(&pool, "dev@example.com", "Deployed", "Release 5").await.unwrap();

    let (ctx, _receiver) = context(&pool, Arc::new(MockTracker::default()), None);

    assert_eq!(send_emails(&ctx).await.unwrap(), EmailFlush::default());
    assert_eq!(emails::queued_emails(&pool, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_worker_retries_failed_pull() {
    let (_dir, pool) = setup().await;
    let tracker = Arc::new(MockTracker::with_case(tracker_case(42)));
    tracker.failing_fetches.store(2, Ordering::SeqCst);

    let (ctx, receiver) = context(&pool, tracker.clone(), None);
    let queue = ctx.queue.clone();
    let worker = TaskWorker::new(
        Arc::new(ctx),
        receiver,
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(5),
        },
    );
    let shutdown = worker.shutdown_handle();
    let handle = tokio::spawn(worker.run());

    queue.enqueue(Task::PullCase(42)).unwrap();

    let mut pulled = false;
    for _ in 0..200 {
        if cases::get_case(&pool, 42).await.is_ok() {
            pulled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(pulled, "case was not pulled after retries");
    assert_eq!(tracker.fetches.load(Ordering::SeqCst), 3);

    shutdown.notify_one();
    handle.await.unwrap();
}
