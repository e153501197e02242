//! Periodic enqueueing of the batch sync tasks

use std::sync::Arc;
use std::time::Duration;

use pdt_common::config::ScheduleConfig;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::queue::TaskQueue;
use crate::tasks::Task;

/// A task enqueued every `period`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub task: Task,
    pub period: Duration,
}

pub struct Scheduler {
    queue: TaskQueue,
    jobs: Vec<ScheduledJob>,
    shutdown: Arc<Notify>,
}

impl Scheduler {
    /// Jobs with a zero interval are disabled
    pub fn new(queue: TaskQueue, config: &ScheduleConfig) -> Self {
        let jobs = [
            (Task::PullCases, config.pull_interval_secs),
            (Task::FetchCases, config.fetch_interval_secs),
            (Task::PushCases, config.push_interval_secs),
            (Task::SendEmails, config.email_interval_secs),
        ]
        .into_iter()
        .filter(|(_, secs)| *secs > 0)
        .map(|(task, secs)| ScheduledJob {
            task,
            period: Duration::from_secs(secs),
        })
        .collect();

        Self {
            queue,
            jobs,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run until shutdown; every job first fires one period after start
    pub async fn run(self) {
        info!(jobs = self.jobs.len(), "Scheduler started");

        if self.jobs.is_empty() {
            self.shutdown.notified().await;
            info!("Scheduler stopped");
            return;
        }

        let start = Instant::now();
        let mut due: Vec<Instant> = self.jobs.iter().map(|job| start + job.period).collect();

        loop {
            let (next, when) = due
                .iter()
                .copied()
                .enumerate()
                .min_by_key(|(_, when)| *when)
                .unwrap_or((0, start));

            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep_until(when) => {
                    let job = &self.jobs[next];
                    debug!(task = %job.task, "Scheduling periodic task");
                    if let Err(e) = self.queue.enqueue(job.task.clone()) {
                        warn!(task = %job.task, error = %e, "Failed to enqueue periodic task");
                    }
                    due[next] = when + job.period;
                }
            }
        }

        info!("Scheduler stopped");
    }
}
