//! Middleware - 実行前後のフック
//!
//! Hooks run in registration order around every execution. They observe, they
//! do not steer: a failing hook is logged and skipped, and never changes the
//! recovery decision for the task.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{JobError, Schedule, TaskId, TaskRecord};
use crate::error::MiddlewareError;

use super::Job;

/// What a hook gets to see about the task being executed.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub queue: Arc<str>,
    pub job_type: &'static str,
    pub retry_count: u32,
    pub schedule: Option<Schedule>,
}

impl TaskInfo {
    pub fn of<J: Job>(queue: Arc<str>, record: &TaskRecord<J>) -> Self {
        Self {
            id: record.id(),
            queue,
            job_type: J::TYPE,
            retry_count: record.retry_count(),
            schedule: record.schedule().copied(),
        }
    }
}

/// Middleware は before / after / after_error を任意に実装する
///
/// すべてデフォルト実装（何もしない）があるので、必要なフックだけ書けばよい。
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Label used when a hook failure is logged.
    fn name(&self) -> &str {
        "middleware"
    }

    async fn before(&self, _task: &TaskInfo) -> Result<(), MiddlewareError> {
        Ok(())
    }

    /// Called after a successful run.
    async fn after(&self, _task: &TaskInfo) -> Result<(), MiddlewareError> {
        Ok(())
    }

    /// Called after a failed run.
    async fn after_error(&self, _task: &TaskInfo, _error: &JobError) -> Result<(), MiddlewareError> {
        Ok(())
    }
}

/// Ordered list of hooks for one queue.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    hooks: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hook: impl Middleware + 'static) -> Self {
        self.push(Arc::new(hook));
        self
    }

    pub fn push(&mut self, hook: Arc<dyn Middleware>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub async fn before(&self, task: &TaskInfo) {
        for hook in &self.hooks {
            if let Err(err) = hook.before(task).await {
                log_failure(hook.as_ref(), "before", task, &err);
            }
        }
    }

    pub async fn after(&self, task: &TaskInfo) {
        for hook in &self.hooks {
            if let Err(err) = hook.after(task).await {
                log_failure(hook.as_ref(), "after", task, &err);
            }
        }
    }

    pub async fn after_error(&self, task: &TaskInfo, error: &JobError) {
        for hook in &self.hooks {
            if let Err(err) = hook.after_error(task, error).await {
                log_failure(hook.as_ref(), "after_error", task, &err);
            }
        }
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|hook| hook.name()))
            .finish()
    }
}

fn log_failure(hook: &dyn Middleware, phase: &'static str, task: &TaskInfo, err: &MiddlewareError) {
    tracing::warn!(
        middleware = hook.name(),
        phase,
        queue = %task.queue,
        task_id = %task.id,
        error = %err,
        "middleware hook failed"
    );
}

/// Logs every execution through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMiddleware;

#[async_trait]
impl Middleware for TracingMiddleware {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn before(&self, task: &TaskInfo) -> Result<(), MiddlewareError> {
        tracing::debug!(
            queue = %task.queue,
            task_id = %task.id,
            job_type = task.job_type,
            retry_count = task.retry_count,
            "task started"
        );
        Ok(())
    }

    async fn after(&self, task: &TaskInfo) -> Result<(), MiddlewareError> {
        tracing::info!(queue = %task.queue, task_id = %task.id, job_type = task.job_type, "task succeeded");
        Ok(())
    }

    async fn after_error(&self, task: &TaskInfo, error: &JobError) -> Result<(), MiddlewareError> {
        tracing::warn!(
            queue = %task.queue,
            task_id = %task.id,
            job_type = task.job_type,
            retry_count = task.retry_count,
            error = %error,
            "task failed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Appends `<label>:<phase>` to a shared journal.
    struct Journal {
        label: &'static str,
        entries: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Journal {
        fn record(&self, phase: &str) -> Result<(), MiddlewareError> {
            self.entries.lock().unwrap().push(format!("{}:{phase}", self.label));
            if self.fail {
                return Err(MiddlewareError::new("journal", "disk full"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Middleware for Journal {
        async fn before(&self, _task: &TaskInfo) -> Result<(), MiddlewareError> {
            self.record("before")
        }

        async fn after(&self, _task: &TaskInfo) -> Result<(), MiddlewareError> {
            self.record("after")
        }

        async fn after_error(&self, _task: &TaskInfo, _error: &JobError) -> Result<(), MiddlewareError> {
            self.record("error")
        }
    }

    fn info() -> TaskInfo {
        TaskInfo {
            id: TaskId::new(),
            queue: Arc::from("q"),
            job_type: "test",
            retry_count: 0,
            schedule: None,
        }
    }

    fn chain(entries: &Arc<Mutex<Vec<String>>>, failing_first: bool) -> MiddlewareChain {
        MiddlewareChain::new()
            .with(Journal {
                label: "a",
                entries: Arc::clone(entries),
                fail: failing_first,
            })
            .with(Journal {
                label: "b",
                entries: Arc::clone(entries),
                fail: false,
            })
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let entries = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(&entries, false);

        chain.before(&info()).await;
        chain.after(&info()).await;
        chain.after_error(&info(), &JobError::new("boom")).await;

        assert_eq!(
            *entries.lock().unwrap(),
            vec!["a:before", "b:before", "a:after", "b:after", "a:error", "b:error"]
        );
    }

    #[tokio::test]
    async fn failing_hook_does_not_stop_the_chain() {
        let entries = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(&entries, true);

        chain.before(&info()).await;

        assert_eq!(*entries.lock().unwrap(), vec!["a:before", "b:before"]);
    }

    #[tokio::test]
    async fn default_hooks_are_noops() {
        struct Silent;
        impl Middleware for Silent {}

        let chain = MiddlewareChain::new().with(Silent).with(TracingMiddleware);
        assert_eq!(chain.len(), 2);
        chain.before(&info()).await;
        chain.after_error(&info(), &JobError::new("boom")).await;
    }
}
