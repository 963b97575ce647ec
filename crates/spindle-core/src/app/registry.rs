//! QueueRegistry - named queue の登録と起動
//!
//! # 学習ポイント
//! - 型消去された trait object を名前で管理（`BTreeMap<String, Box<dyn RegisteredQueue>>`）
//! - `QueueId<J>` で名前とジョブ型の対応を静的に保持
//! - `Any` によるダウンキャストで文字列名からの enqueue を型チェック
//!
//! The registry is built once at startup and owned by the host process.
//! Registering the same name twice is a wiring error and is rejected.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{WorkerConfig, WorkerGroup, WorkerLoop};
use crate::domain::{Schedule, TaskId};
use crate::error::{QueueError, RegistryError};
use crate::ports::{Clock, IdGenerator, QueueStore, SystemClock};
use crate::queue::{JobQueue, QueueCore, QueueStats};
use crate::typed::{Job, MiddlewareChain};

/// Typed handle to a registered queue.
pub struct QueueId<J> {
    name: Arc<str>,
    _job: PhantomData<fn() -> J>,
}

impl<J> QueueId<J> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<J> Clone for QueueId<J> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            _job: PhantomData,
        }
    }
}

impl<J> fmt::Debug for QueueId<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("QueueId").field(&self.name).finish()
    }
}

/// Object-safe view of one registered queue.
trait RegisteredQueue: Send + Sync {
    fn core(&self) -> &QueueCore;
    fn job_type(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn spawn(
        &self,
        config: WorkerConfig,
        shared: Option<Arc<dyn Any + Send + Sync>>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()>;
}

struct Entry<J> {
    queue: JobQueue<J>,
    middleware: MiddlewareChain,
}

impl<J: Job> RegisteredQueue for Entry<J> {
    fn core(&self) -> &QueueCore {
        self.queue.core()
    }

    fn job_type(&self) -> &'static str {
        J::TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn spawn(
        &self,
        config: WorkerConfig,
        shared: Option<Arc<dyn Any + Send + Sync>>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let worker = WorkerLoop::new(self.queue.clone(), self.middleware.clone(), config)
            .with_shared(shared);
        tokio::spawn(worker.run(shutdown))
    }
}

/// QueueRegistry は名前付きキューを登録し、キューごとに 1 つの WorkerLoop を起動する
///
/// # 使用例
/// ```ignore
/// let mut registry = QueueRegistry::new(store);
/// let mail = registry.register::<SendWelcomeMail>("mail", MiddlewareChain::new())?;
/// registry.enqueue_to(&mail, SendWelcomeMail { user_id: 7 }, None).await?;
///
/// let workers = registry.start();
/// // ...
/// workers.shutdown_and_join().await;
/// ```
pub struct QueueRegistry {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    config: WorkerConfig,
    shared: Option<Arc<dyn Any + Send + Sync>>,
    queues: BTreeMap<String, Box<dyn RegisteredQueue>>,
}

impl QueueRegistry {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            ids: None,
            config: WorkerConfig::default(),
            shared: None,
            queues: BTreeMap::new(),
        }
    }

    /// Clock for queues registered after this call.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Id source shared by queues registered after this call. Without one,
    /// each queue mints ULIDs from the registry clock.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_worker_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Application state every job can reach through `JobContext::shared`.
    pub fn with_shared<T: Any + Send + Sync>(mut self, shared: Arc<T>) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn register<J: Job>(
        &mut self,
        name: &str,
        middleware: MiddlewareChain,
    ) -> Result<QueueId<J>, RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.queues.contains_key(name) {
            return Err(RegistryError::DuplicateQueue(name.to_string()));
        }

        let mut queue = JobQueue::<J>::new(name, Arc::clone(&self.store), Arc::clone(&self.clock));
        if let Some(ids) = &self.ids {
            queue = queue.with_id_generator(Arc::clone(ids));
        }
        self.queues
            .insert(name.to_string(), Box::new(Entry { queue, middleware }));
        tracing::debug!(queue = name, job_type = J::TYPE, "registered queue");

        Ok(QueueId {
            name: Arc::from(name),
            _job: PhantomData,
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Typed queue behind `name`.
    pub fn queue<J: Job>(&self, name: &str) -> Result<JobQueue<J>, QueueError> {
        let entry = self
            .queues
            .get(name)
            .ok_or_else(|| QueueError::UnknownQueue(name.to_string()))?;
        entry
            .as_any()
            .downcast_ref::<Entry<J>>()
            .map(|entry| entry.queue.clone())
            .ok_or_else(|| QueueError::QueueTypeMismatch {
                name: name.to_string(),
                expected: J::TYPE,
            })
    }

    /// Enqueue by queue name; the job type must match the registered one.
    pub async fn enqueue<J: Job>(
        &self,
        name: &str,
        job: J,
        schedule: Option<Schedule>,
    ) -> Result<TaskId, QueueError> {
        let queue = self.queue::<J>(name)?;
        queue.enqueue(queue.record(job), schedule).await
    }

    pub async fn enqueue_to<J: Job>(
        &self,
        id: &QueueId<J>,
        job: J,
        schedule: Option<Schedule>,
    ) -> Result<TaskId, QueueError> {
        self.enqueue(id.name(), job, schedule).await
    }

    pub async fn stats(&self, name: &str) -> Result<QueueStats, QueueError> {
        let entry = self
            .queues
            .get(name)
            .ok_or_else(|| QueueError::UnknownQueue(name.to_string()))?;
        entry.core().stats().await
    }

    /// Spawn one worker loop per registered queue.
    pub fn start(&self) -> WorkerGroup {
        let mut group = WorkerGroup::new();
        for (name, entry) in &self.queues {
            let join = entry.spawn(self.config, self.shared.clone(), group.shutdown_signal());
            tracing::info!(queue = %name, job_type = entry.job_type(), "starting worker");
            group.attach(name, join);
        }
        group
    }
}

impl fmt::Debug for QueueRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueRegistry")
            .field("queues", &self.queues.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}
