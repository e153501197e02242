//! Sync tasks between the local store and the issue tracker
//!
//! Every task is safe to run more than once: a pull converges to the
//! tracker's state and a push deletes the edits it delivered, so a repeated
//! push finds nothing to send.

use std::fmt;
use std::sync::Arc;

use pdt_common::db::{Case, EmailStatus};
use pdt_common::store::{cases, emails};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::mail::MailTransport;
use crate::queue::TaskQueue;
use crate::tracker::{CaseUpdate, IssueTracker, TrackerError};

/// Queued emails delivered per flush
pub const EMAIL_BATCH_SIZE: i64 = 100;

/// Background work units
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Refresh one case from the tracker
    PullCase(i64),
    /// Enqueue a pull for every case without a release
    PullCases,
    /// Enqueue a pull for every case matching the configured tracker search
    FetchCases,
    /// Send pending edits of one case to the tracker
    PushCase(i64),
    /// Enqueue a push for every case with pending edits
    PushCases,
    /// Deliver queued emails
    SendEmails,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::PullCase(id) => write!(f, "pull_case({})", id),
            Task::PullCases => write!(f, "pull_cases"),
            Task::FetchCases => write!(f, "fetch_cases"),
            Task::PushCase(id) => write!(f, "push_case({})", id),
            Task::PushCases => write!(f, "push_cases"),
            Task::SendEmails => write!(f, "send_emails"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Store error: {0}")]
    Store(#[from] pdt_common::Error),

    #[error("Task queue is closed")]
    QueueClosed,
}

impl TaskError {
    /// Whether running the task again may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::Tracker(TrackerError::CaseNotFound(_)) => false,
            TaskError::Tracker(_) => true,
            TaskError::Store(pdt_common::Error::Validation(_)) | TaskError::Store(pdt_common::Error::NotFound(_)) => false,
            TaskError::Store(_) => true,
            TaskError::QueueClosed => false,
        }
    }
}

/// Everything a task needs to run
pub struct SyncContext {
    pub db: SqlitePool,
    pub tracker: Arc<dyn IssueTracker>,
    /// Unset keeps emails queued
    pub mail: Option<Arc<dyn MailTransport>>,
    pub queue: TaskQueue,
    /// Tracker query used by [`Task::FetchCases`]
    pub search_query: String,
    /// Delivery attempts before an email is marked failed
    pub email_max_attempts: i64,
}

/// Result of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Nothing to send yet; the tracker was not contacted
    Skipped,
    Pushed { edits_cleared: u64 },
}

/// Delivery counts of one email flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmailFlush {
    pub sent: usize,
    pub retrying: usize,
    pub failed: usize,
}

/// Overwrite the local case with the tracker's state
pub async fn update_case_from_tracker(ctx: &SyncContext, case_id: i64) -> Result<Case, TaskError> {
    let tracker_case = ctx.tracker.fetch_case(case_id).await?;
    let case = cases::apply_snapshot(&ctx.db, &tracker_case.into_snapshot()).await?;
    Ok(case)
}

/// Enqueue a pull for every case that has no release yet
pub async fn update_cases_from_tracker(ctx: &SyncContext) -> Result<usize, TaskError> {
    let ids = cases::case_ids_without_release(&ctx.db).await?;
    for &id in &ids {
        ctx.queue.enqueue(Task::PullCase(id))?;
    }
    info!(count = ids.len(), "Enqueued case pulls");
    Ok(ids.len())
}

/// Enqueue a pull for every case returned by the configured tracker search
pub async fn fetch_cases(ctx: &SyncContext) -> Result<usize, TaskError> {
    let ids = ctx.tracker.search(&ctx.search_query).await?;
    for &id in &ids {
        ctx.queue.enqueue(Task::PullCase(id))?;
    }
    info!(count = ids.len(), "Enqueued pulls for fetched cases");
    Ok(ids.len())
}

/// Send title and tags of a case to the tracker, then clear the delivered edits
///
/// Pending edits are replayed on the tracker's current title and tags, so
/// tags added in the tracker since the last pull are kept. The pushed state
/// is written back locally.
pub async fn update_case_to_tracker(ctx: &SyncContext, case_id: i64) -> Result<PushOutcome, TaskError> {
    if !cases::should_push(&ctx.db, case_id).await? {
        debug!(case_id, "Case not ready for push");
        return Ok(PushOutcome::Skipped);
    }

    let edits = cases::list_case_edits(&ctx.db, case_id).await?;
    let Some(last_edit) = edits.last().map(|e| e.id) else {
        return Ok(PushOutcome::Skipped);
    };

    let mut snapshot = ctx.tracker.fetch_case(case_id).await?.into_snapshot();
    for edit in &edits {
        edit.apply_to(&mut snapshot.title, &mut snapshot.tags)?;
    }

    ctx.tracker
        .update_case(&CaseUpdate {
            case_id,
            title: snapshot.title.clone(),
            tags: snapshot.tags.clone(),
        })
        .await?;

    let edits_cleared = cases::delete_edits_through(&ctx.db, case_id, last_edit).await?;
    cases::apply_snapshot(&ctx.db, &snapshot).await?;
    info!(case_id, edits_cleared, "Case pushed to tracker");
    Ok(PushOutcome::Pushed { edits_cleared })
}

/// Enqueue a push for every case with pending edits
pub async fn update_cases_to_tracker(ctx: &SyncContext) -> Result<usize, TaskError> {
    let ids = cases::case_ids_with_pending_edits(&ctx.db).await?;
    for &id in &ids {
        ctx.queue.enqueue(Task::PushCase(id))?;
    }
    info!(count = ids.len(), "Enqueued case pushes");
    Ok(ids.len())
}

/// Deliver queued emails, recording each outcome
///
/// A failed delivery does not fail the flush; the email is retried by a
/// later flush until its attempts run out.
pub async fn send_emails(ctx: &SyncContext) -> Result<EmailFlush, TaskError> {
    let Some(mail) = ctx.mail.as_ref() else {
        debug!("No mail relay configured, emails stay queued");
        return Ok(EmailFlush::default());
    };

    let mut flush = EmailFlush::default();
    for email in emails::queued_emails(&ctx.db, EMAIL_BATCH_SIZE).await? {
        match mail.send(&email).await {
            Ok(()) => {
                emails::mark_email_sent(&ctx.db, email.id).await?;
                flush.sent += 1;
            }
            Err(e) => {
                let status = emails::mark_email_failed(&ctx.db, email.id, &e.to_string(), ctx.email_max_attempts).await?;
                warn!(email_id = email.id, error = %e, status = %status, "Email delivery failed");
                match status {
                    EmailStatus::Failed => flush.failed += 1,
                    _ => flush.retrying += 1,
                }
            }
        }
    }

    if flush != EmailFlush::default() {
        info!(sent = flush.sent, retrying = flush.retrying, failed = flush.failed, "Email flush finished");
    }
    Ok(flush)
}

/// Run one task to completion
pub async fn run_task(ctx: &SyncContext, task: &Task) -> Result<(), TaskError> {
    match *task {
        Task::PullCase(id) => update_case_from_tracker(ctx, id).await.map(|_| ()),
        Task::PullCases => update_cases_from_tracker(ctx).await.map(|_| ()),
        Task::FetchCases => fetch_cases(ctx).await.map(|_| ()),
        Task::PushCase(id) => update_case_to_tracker(ctx, id).await.map(|_| ()),
        Task::PushCases => update_cases_to_tracker(ctx).await.map(|_| ()),
        Task::SendEmails => send_emails(ctx).await.map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_display() {
        assert_eq!(Task::PullCase(42).to_string(), "pull_case(42)");
        assert_eq!(Task::SendEmails.to_string(), "send_emails");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(TaskError::Tracker(TrackerError::NetworkError("timeout".into())).is_retryable());
        assert!(TaskError::Tracker(TrackerError::ApiError(502, String::new())).is_retryable());
        assert!(!TaskError::Tracker(TrackerError::CaseNotFound(1)).is_retryable());
        assert!(!TaskError::Store(pdt_common::Error::validation("bad")).is_retryable());
        assert!(!TaskError::QueueClosed.is_retryable());
    }
}
