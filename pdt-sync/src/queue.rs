//! In-process task queue and worker
//!
//! Tasks are delivered at least once. A failed task is put back on the queue
//! after an exponential backoff until its attempts run out; tasks whose
//! error cannot heal (unknown case, invalid data) are dropped right away.

use std::sync::Arc;
use std::time::Duration;

use pdt_common::config::WorkerConfig;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::tasks::{run_task, SyncContext, Task, TaskError};

/// Upper bound of a single retry delay
const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// A task together with the number of times it already failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    pub task: Task,
    pub attempt: u32,
}

/// Sending side of the task queue; cheap to clone
#[derive(Debug, Clone)]
pub struct TaskQueue {
    sender: mpsc::UnboundedSender<QueuedTask>,
}

impl TaskQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<QueuedTask>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Fire-and-forget enqueue of a fresh task
    pub fn enqueue(&self, task: Task) -> Result<(), TaskError> {
        self.push(QueuedTask { task, attempt: 0 })
    }

    fn push(&self, queued: QueuedTask) -> Result<(), TaskError> {
        self.sender.send(queued).map_err(|_| TaskError::QueueClosed)
    }
}

/// Retry policy with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Runs per task including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl From<&WorkerConfig> for RetryPolicy {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_ms),
        }
    }
}

impl RetryPolicy {
    /// Whether a task that failed on run `attempt` (0-based) gets another run
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts
    }

    /// Delay before rerunning a task that failed on run `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(MAX_RETRY_DELAY)
    }
}

/// Drains the task queue, running one task at a time
pub struct TaskWorker {
    ctx: Arc<SyncContext>,
    receiver: mpsc::UnboundedReceiver<QueuedTask>,
    retry: RetryPolicy,
    shutdown: Arc<Notify>,
}

impl TaskWorker {
    pub fn new(ctx: Arc<SyncContext>, receiver: mpsc::UnboundedReceiver<QueuedTask>, retry: RetryPolicy) -> Self {
        Self {
            ctx,
            receiver,
            retry,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run until shutdown is signalled or every sender is gone
    pub async fn run(mut self) {
        info!(
            max_attempts = self.retry.max_attempts,
            retry_base_ms = self.retry.base_delay.as_millis() as u64,
            "Task worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Task worker received shutdown signal");
                    break;
                }

                next = self.receiver.recv() => {
                    match next {
                        Some(queued) => self.handle(queued).await,
                        None => break,
                    }
                }
            }
        }

        info!("Task worker stopped");
    }

    async fn handle(&self, queued: QueuedTask) {
        debug!(task = %queued.task, attempt = queued.attempt, "Running task");

        let err = match run_task(&self.ctx, &queued.task).await {
            Ok(()) => return,
            Err(e) => e,
        };

        if !err.is_retryable() || !self.retry.should_retry(queued.attempt) {
            error!(task = %queued.task, attempt = queued.attempt, error = %err, "Task failed, giving up");
            return;
        }

        let delay = self.retry.delay(queued.attempt);
        warn!(
            task = %queued.task,
            attempt = queued.attempt,
            retry_in_ms = delay.as_millis() as u64,
            error = %err,
            "Task failed, will retry"
        );

        let queue = self.ctx.queue.clone();
        let retry = QueuedTask {
            task: queued.task,
            attempt: queued.attempt + 1,
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if queue.push(retry).is_err() {
                debug!("Task queue closed before retry");
            }
        });
    }
}
