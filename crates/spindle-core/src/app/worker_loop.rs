//! WorkerLoop - 1 つの named queue を駆動するループ
//!
//! # フロー
//! 1. `prepare()` で processing に残った id を work に戻す（Recovering）
//! 2. 固定間隔で tick（初回は即時）
//!    - `promote_scheduled()` → `dequeue()`
//!    - before hook → `Job::run` → after / after_error hook
//!    - RecoveryStrategy で complete / requeue を決定して適用
//!
//! 実行は 1 ループにつき常に 1 件だけ。shutdown は tick の境界でのみ効き、
//! 実行中・解決中のタスクは中断しない。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::domain::{JobError, Resolution, TaskId};
use crate::error::QueueError;
use crate::queue::JobQueue;
use crate::typed::{Job, JobContext, MiddlewareChain, TaskInfo};

/// Per-loop tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Fixed interval between ticks.
    pub poll_interval: Duration,
    /// Upper bound on a single `Job::run`. `None` waits forever.
    pub execution_timeout: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            execution_timeout: None,
        }
    }
}

/// Idle → Recovering → Polling → Executing → Resolving → Polling … → Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Recovering,
    Polling,
    Executing,
    Resolving,
    Stopped,
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to run.
    Idle,
    Executed { id: TaskId, resolution: Resolution },
}

pub struct WorkerLoop<J> {
    queue: JobQueue<J>,
    queue_name: Arc<str>,
    middleware: MiddlewareChain,
    config: WorkerConfig,
    shared: Option<Arc<dyn Any + Send + Sync>>,
    state: watch::Sender<WorkerState>,
}

impl<J: Job> WorkerLoop<J> {
    pub fn new(queue: JobQueue<J>, middleware: MiddlewareChain, config: WorkerConfig) -> Self {
        let queue_name = Arc::from(queue.name());
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            queue,
            queue_name,
            middleware,
            config,
            shared: None,
            state,
        }
    }

    /// State handed to every `JobContext`.
    pub fn with_shared(mut self, shared: Option<Arc<dyn Any + Send + Sync>>) -> Self {
        self.shared = shared;
        self
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Move abandoned claims back to `work`.
    pub async fn recover(&self) -> Result<usize, QueueError> {
        self.set_state(WorkerState::Recovering);
        self.queue.prepare().await
    }

    /// One poll cycle. A store error aborts the cycle; the caller decides
    /// whether to try again on the next tick.
    pub async fn tick(&self) -> Result<TickOutcome, QueueError> {
        self.set_state(WorkerState::Polling);
        self.queue.promote_scheduled().await?;
        let Some(mut record) = self.queue.dequeue().await? else {
            return Ok(TickOutcome::Idle);
        };

        let info = TaskInfo::of(Arc::clone(&self.queue_name), &record);
        self.middleware.before(&info).await;

        self.set_state(WorkerState::Executing);
        let ctx = JobContext::new(
            Arc::clone(&self.queue_name),
            record.id(),
            record.retry_count(),
            Arc::clone(self.queue.core().clock()),
        )
        .with_shared(self.shared.clone());
        let result = self.execute(&record.job, &ctx).await;

        self.set_state(WorkerState::Resolving);
        match &result {
            Ok(()) => self.middleware.after(&info).await,
            Err(error) => self.middleware.after_error(&info, error).await,
        }

        let resolution = record.job.recovery_strategy().resolve(
            record.retry_count(),
            record.is_periodic(),
            result.as_ref().map(|_| ()),
        );
        match resolution {
            Resolution::Complete { success } => self.queue.complete(&record, success).await?,
            Resolution::Requeue {
                success,
                bump_retry,
            } => {
                if bump_retry {
                    record.bump_retry();
                }
                self.queue.requeue(&mut record, success).await?;
            }
        }
        self.set_state(WorkerState::Polling);

        Ok(TickOutcome::Executed {
            id: record.id(),
            resolution,
        })
    }

    /// Recover, then tick every `poll_interval` until `shutdown` turns true
    /// (or its sender is dropped).
    ///
    /// A failed recovery is retried on the following ticks before any polling
    /// happens. A failed tick is logged and polling carries on.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut recovered = false;

        tracing::info!(queue = %self.queue_name, job_type = J::TYPE, "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if !recovered {
                match self.recover().await {
                    Ok(_) => recovered = true,
                    Err(err) => {
                        tracing::warn!(queue = %self.queue_name, error = %err, "recovery failed, retrying next tick");
                        continue;
                    }
                }
            }

            match self.tick().await {
                Ok(TickOutcome::Idle) => {}
                Ok(TickOutcome::Executed { id, resolution }) => {
                    tracing::debug!(
                        queue = %self.queue_name,
                        task_id = %id,
                        success = resolution.success(),
                        terminal = resolution.is_terminal(),
                        "task resolved"
                    );
                }
                Err(err) if err.is_consistency_fault() => {
                    tracing::error!(queue = %self.queue_name, error = %err, "store consistency fault");
                }
                Err(err) => {
                    tracing::warn!(queue = %self.queue_name, error = %err, "poll cycle aborted");
                }
            }
        }

        self.set_state(WorkerState::Stopped);
        tracing::info!(queue = %self.queue_name, "worker stopped");
    }

    /// Run the job once. A panic inside `Job::run` becomes a transient
    /// `JobError`, so the task still goes through the recovery strategy.
    async fn execute(&self, job: &J, ctx: &JobContext) -> Result<(), JobError> {
        let run = AssertUnwindSafe(job.run(ctx)).catch_unwind();
        let outcome = match self.config.execution_timeout {
            None => run.await,
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(JobError::timed_out(limit)),
            },
        };
        outcome.unwrap_or_else(|payload| {
            let detail = panic_message(payload.as_ref());
            tracing::error!(queue = %self.queue_name, task_id = %ctx.task_id(), panic = %detail, "job panicked");
            Err(JobError::panicked(&detail))
        })
    }

    fn set_state(&self, next: WorkerState) {
        self.state.send_replace(next);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
