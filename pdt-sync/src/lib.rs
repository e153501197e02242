//! # PDT Sync
//!
//! Background synchronization between the local store and the issue tracker:
//! - Tracker client ([`tracker`])
//! - Sync tasks: pull, push, batch variants, full fetch and email flush ([`tasks`])
//! - At-least-once task queue with retry ([`queue`])
//! - Periodic scheduler ([`scheduler`])

pub mod mail;
pub mod queue;
pub mod scheduler;
pub mod service;
pub mod tasks;
pub mod tracker;

pub use queue::{QueuedTask, RetryPolicy, TaskQueue, TaskWorker};
pub use scheduler::Scheduler;
pub use service::{init_tracing, sync_context, BackgroundServices};
pub use tasks::{run_task, SyncContext, Task, TaskError};
pub use tracker::{FogBugzClient, IssueTracker, TrackerError};
