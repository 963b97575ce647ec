//! Job trait - 型付きジョブの定義
//!
//! A job type carries its own payload fields (serialized into the task record),
//! its recovery strategy and its execution logic. Queues are generic over it.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{JobError, RecoveryStrategy, TaskId};
use crate::ports::Clock;

/// Job は payload・recovery strategy・実行ロジックをまとめる
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendWelcomeMail {
///     user_id: u64,
/// }
///
/// #[async_trait]
/// impl Job for SendWelcomeMail {
///     const TYPE: &'static str = "mail.welcome.v1";
///
///     fn recovery_strategy(&self) -> RecoveryStrategy {
///         RecoveryStrategy::Retry { max_attempts: 3 }
///     }
///
///     async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
///         let mailer = ctx.shared::<Mailer>().ok_or_else(|| JobError::permanent("no mailer"))?;
///         mailer.send_welcome(self.user_id).await.map_err(|e| JobError::new("smtp").with_source(e))
///     }
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize + DeserializeOwned`: task record としてストアに保存するため
/// - `Send + Sync + 'static`: ワーカーの tokio task 間で共有するため
///
/// Handlers should be idempotent: delivery is at-least-once.
#[async_trait]
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable name of the job type, used in logs and type checks.
    const TYPE: &'static str;

    fn recovery_strategy(&self) -> RecoveryStrategy {
        RecoveryStrategy::None
    }

    async fn run(&self, ctx: &JobContext) -> Result<(), JobError>;
}

/// Execution context handed to `Job::run`.
#[derive(Clone)]
pub struct JobContext {
    queue: Arc<str>,
    task_id: TaskId,
    retry_count: u32,
    clock: Arc<dyn Clock>,
    shared: Option<Arc<dyn Any + Send + Sync>>,
}

impl JobContext {
    pub fn new(queue: Arc<str>, task_id: TaskId, retry_count: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue,
            task_id,
            retry_count,
            clock,
            shared: None,
        }
    }

    pub fn with_shared(mut self, shared: Option<Arc<dyn Any + Send + Sync>>) -> Self {
        self.shared = shared;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// 0 on the first run, n on the n-th retry.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        self.clock.now()
    }

    /// Application state registered with the queue registry, if it is a `T`.
    pub fn shared<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.shared.as_deref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("queue", &self.queue)
            .field("task_id", &self.task_id)
            .field("retry_count", &self.retry_count)
            .field("has_shared", &self.shared.is_some())
            .finish()
    }
}
