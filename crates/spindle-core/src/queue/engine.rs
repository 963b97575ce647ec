//! Queue engine: the state-transition protocol over the shared store.
//!
//! # 構造
//! - `work`: 実行待ち id（head に push、tail から取り出す = FIFO）
//! - `processing`: どこかのワーカーが claim 中の id
//! - `scheduled`: id -> due timestamp の scored set
//! - `success` / `failure`: 観測用カウンタ
//!
//! The record itself is stored under its id and is always written before the
//! id becomes visible in `work` or `scheduled`, and deleted last on completion.
//! Mutual exclusion between workers comes only from the store's atomic
//! `move_tail_to_head`; there are no locks.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::domain::{Schedule, TaskId, TaskRecord};
use crate::error::QueueError;
use crate::ports::{Clock, IdGenerator, QueueStore, UlidGenerator};
use crate::typed::Job;

use super::{QueueKeys, QueueStats};

/// Untyped queue operations: everything that does not touch a payload.
///
/// Operator tooling (stats, recovery) works at this level without knowing
/// the job type.
#[derive(Clone)]
pub struct QueueCore {
    name: Arc<str>,
    keys: QueueKeys,
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
}

impl QueueCore {
    pub fn new(name: &str, store: Arc<dyn QueueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: Arc::from(name),
            keys: QueueKeys::new(name),
            store,
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Crash recovery: move every id in `processing` back onto `work`.
    ///
    /// Ids are moved one at a time with the atomic tail-to-head move, so the
    /// oldest claim is served first again and nothing is lost if the process
    /// dies halfway. Anything still claimed by a live worker on the same queue
    /// is moved too; the at-least-once contract covers the duplicate run.
    pub async fn prepare(&self) -> Result<usize, QueueError> {
        let pending = self.store.list_len(&self.keys.processing).await?;
        let mut moved = 0;
        for _ in 0..pending {
            let next = self
                .store
                .move_tail_to_head(&self.keys.processing, &self.keys.work)
                .await?;
            if next.is_none() {
                break;
            }
            moved += 1;
        }
        if moved > 0 {
            tracing::info!(queue = %self.name, moved, "recovered abandoned tasks");
        }
        Ok(moved)
    }

    /// Move at most one due id from `scheduled` to `work`.
    pub async fn promote_scheduled(&self) -> Result<Option<String>, QueueError> {
        let now = self.clock.unix_now();
        let due = self.store.range_by_score(&self.keys.scheduled, now).await?;
        if due.is_empty() {
            return Ok(None);
        }
        let promoted = self
            .store
            .promote_due(&self.keys.scheduled, &self.keys.work, now)
            .await?;
        if let Some(id) = &promoted {
            tracing::debug!(queue = %self.name, task_id = %id, waiting = due.len() - 1, "promoted scheduled task");
        }
        Ok(promoted)
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(QueueStats::collect(self.store.as_ref(), &self.keys).await?)
    }

    async fn claim(&self) -> Result<Option<(String, Vec<u8>)>, QueueError> {
        let Some(id) = self
            .store
            .move_tail_to_head(&self.keys.work, &self.keys.processing)
            .await?
        else {
            return Ok(None);
        };
        match self.store.get(&id).await? {
            Some(bytes) => Ok(Some((id, bytes))),
            None => Err(QueueError::MissingRecord(id)),
        }
    }

    async fn release(&self, id: &str, success: bool) -> Result<(), QueueError> {
        self.store.remove_value(&self.keys.processing, id).await?;
        self.store.increment(self.keys.counter(success)).await?;
        Ok(())
    }
}

/// A named queue carrying jobs of type `J`.
pub struct JobQueue<J> {
    core: QueueCore,
    ids: Arc<dyn IdGenerator>,
    _job: PhantomData<fn() -> J>,
}

impl<J> Clone for JobQueue<J> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            ids: Arc::clone(&self.ids),
            _job: PhantomData,
        }
    }
}

impl<J: Job> JobQueue<J> {
    pub fn new(name: &str, store: Arc<dyn QueueStore>, clock: Arc<dyn Clock>) -> Self {
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self {
            core: QueueCore::new(name, store, clock),
            ids,
            _job: PhantomData,
        }
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn core(&self) -> &QueueCore {
        &self.core
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// Wrap a job in a fresh record with a newly generated id.
    pub fn record(&self, job: J) -> TaskRecord<J> {
        TaskRecord::with_id(self.ids.generate_task_id(), job)
    }

    /// Persist the record, then make its id visible.
    ///
    /// With a schedule (one-shot or periodic) the id goes to `scheduled`
    /// scored by the due time; a one-shot already in the past is promoted on
    /// the next tick. Without one it is pushed straight onto `work`.
    pub async fn enqueue(
        &self,
        mut record: TaskRecord<J>,
        schedule: Option<Schedule>,
    ) -> Result<TaskId, QueueError> {
        record.stamp_enqueued(self.core.clock.unix_now());
        record.set_schedule(schedule);
        self.persist(&record).await?;

        let id = record.id().to_string();
        let keys = &self.core.keys;
        match schedule {
            Some(schedule) => {
                self.core
                    .store
                    .add_scored(&keys.scheduled, &id, schedule.due_at())
                    .await?;
                tracing::debug!(queue = %self.core.name, task_id = %id, due_at = schedule.due_at(), "scheduled task");
            }
            None => {
                self.core.store.push(&keys.work, &id).await?;
                tracing::debug!(queue = %self.core.name, task_id = %id, "enqueued task");
            }
        }
        Ok(record.id())
    }

    /// Claim the oldest id in `work` and load its record.
    ///
    /// `Ok(None)` when `work` is empty. A claimed id whose record is missing or
    /// undecodable stays in `processing` until the next `prepare`.
    pub async fn dequeue(&self) -> Result<Option<TaskRecord<J>>, QueueError> {
        let Some((id, bytes)) = self.core.claim().await? else {
            return Ok(None);
        };
        let record = serde_json::from_slice(&bytes).map_err(|source| QueueError::Decode {
            id: id.clone(),
            source,
        })?;
        Ok(Some(record))
    }

    /// Terminal resolution: the id leaves every structure and the record is deleted.
    pub async fn complete(&self, record: &TaskRecord<J>, success: bool) -> Result<(), QueueError> {
        let id = record.id().to_string();
        self.core.release(&id, success).await?;
        self.core.store.delete(&id).await?;
        tracing::debug!(queue = %self.core.name, task_id = %id, success, "completed task");
        Ok(())
    }

    /// Non-terminal resolution: back to `scheduled` (periodic, re-armed from
    /// now) or to `work` (everything else). Counts towards the success or
    /// failure counter like `complete` does.
    pub async fn requeue(&self, record: &mut TaskRecord<J>, success: bool) -> Result<(), QueueError> {
        let id = record.id().to_string();
        self.core.release(&id, success).await?;

        let keys = &self.core.keys;
        let next = record
            .schedule()
            .and_then(|schedule| schedule.rearm(&self.core.clock.now()));
        match next {
            Some(next) => {
                record.set_schedule(Some(next));
                self.persist(record).await?;
                self.core
                    .store
                    .add_scored(&keys.scheduled, &id, next.due_at())
                    .await?;
                tracing::debug!(queue = %self.core.name, task_id = %id, due_at = next.due_at(), "re-armed periodic task");
            }
            None => {
                self.persist(record).await?;
                self.core.store.push(&keys.work, &id).await?;
                tracing::debug!(queue = %self.core.name, task_id = %id, retry_count = record.retry_count(), "requeued task");
            }
        }
        Ok(())
    }

    pub async fn prepare(&self) -> Result<usize, QueueError> {
        self.core.prepare().await
    }

    pub async fn promote_scheduled(&self) -> Result<Option<String>, QueueError> {
        self.core.promote_scheduled().await
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.core.stats().await
    }

    async fn persist(&self, record: &TaskRecord<J>) -> Result<(), QueueError> {
        let bytes = serde_json::to_vec(record).map_err(|source| QueueError::Encode {
            id: record.id(),
            source,
        })?;
        self.core.store.set(&record.id().to_string(), &bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Delay, JobError, Recurrence};
    use crate::error::StoreError;
    use crate::impls::InMemoryStore;
    use crate::ports::FixedClock;
    use crate::typed::JobContext;
    use async_trait::async_trait;
    use chrono::{DateTime, FixedOffset, TimeDelta, TimeZone};
    use serde::{Deserialize, Serialize};
    use std::collections::HashSet;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Thumbnail {
        path: String,
    }

    #[async_trait]
    impl Job for Thumbnail {
        const TYPE: &'static str = "thumbnail";

        async fn run(&self, _ctx: &JobContext) -> Result<(), JobError> {
            Ok(())
        }
    }

    fn thumb(path: &str) -> Thumbnail {
        Thumbnail {
            path: path.to_string(),
        }
    }

    fn at(h: u32, m: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 3, h, m, 0)
            .unwrap()
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        clock: Arc<FixedClock>,
        queue: JobQueue<Thumbnail>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let clock = Arc::new(FixedClock::new(at(8, 0)));
            let queue = JobQueue::new("images", store.clone(), clock.clone());
            Self { store, clock, queue }
        }

        fn keys(&self) -> &QueueKeys {
            self.queue.core().keys()
        }

        /// Which structures currently hold `id`.
        async fn locations(&self, id: TaskId) -> Vec<&'static str> {
            let id = id.to_string();
            let mut found = Vec::new();
            if self.store.list_snapshot(&self.keys().work).await.contains(&id) {
                found.push("work");
            }
            if self.store.list_snapshot(&self.keys().processing).await.contains(&id) {
                found.push("processing");
            }
            if self
                .store
                .scored_snapshot(&self.keys().scheduled)
                .await
                .iter()
                .any(|(m, _)| *m == id)
            {
                found.push("scheduled");
            }
            found
        }
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_round_trips() {
        let fx = Fixture::new();
        let record = fx.queue.record(thumb("a.png"));
        let id = fx.queue.enqueue(record, None).await.unwrap();

        let got = fx.queue.dequeue().await.unwrap().unwrap();
        assert_eq!(got.id(), id);
        assert_eq!(got.job, thumb("a.png"));
        assert_eq!(got.retry_count(), 0);
        assert_eq!(got.enqueued_at(), Some(at(8, 0).timestamp()));
        assert_eq!(fx.locations(id).await, vec!["processing"]);
    }

    #[tokio::test]
    async fn dequeue_on_empty_queue_is_none() {
        let fx = Fixture::new();
        assert!(fx.queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn work_is_served_fifo() {
        let fx = Fixture::new();
        for path in ["1", "2", "3"] {
            fx.queue.enqueue(fx.queue.record(thumb(path)), None).await.unwrap();
        }
        let mut served = Vec::new();
        while let Some(record) = fx.queue.dequeue().await.unwrap() {
            served.push(record.job.path);
        }
        assert_eq!(served, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn prepare_moves_processing_back_in_order() {
        let fx = Fixture::new();
        let a = fx.queue.enqueue(fx.queue.record(thumb("a")), None).await.unwrap();
        let b = fx.queue.enqueue(fx.queue.record(thumb("b")), None).await.unwrap();
        fx.queue.dequeue().await.unwrap();
        fx.queue.dequeue().await.unwrap();
        let c = fx.queue.enqueue(fx.queue.record(thumb("c")), None).await.unwrap();

        assert_eq!(fx.queue.prepare().await.unwrap(), 2);
        assert_eq!(fx.store.list_len(&fx.keys().processing).await.unwrap(), 0);

        // head first: recovered ids sit after the work that was already waiting
        assert_eq!(
            fx.store.list_snapshot(&fx.keys().work).await,
            vec![b.to_string(), a.to_string(), c.to_string()]
        );
        assert_eq!(fx.queue.dequeue().await.unwrap().unwrap().id(), c);
        assert_eq!(fx.queue.dequeue().await.unwrap().unwrap().id(), a);
        assert_eq!(fx.queue.dequeue().await.unwrap().unwrap().id(), b);
    }

    #[tokio::test]
    async fn prepare_on_clean_queue_is_noop() {
        let fx = Fixture::new();
        assert_eq!(fx.queue.prepare().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn past_one_shot_is_promoted_future_one_is_not() {
        let fx = Fixture::new();
        let past = fx
            .queue
            .enqueue(fx.queue.record(thumb("past")), Some(Schedule::at(at(7, 0).timestamp())))
            .await
            .unwrap();
        let future = fx
            .queue
            .enqueue(
                fx.queue.record(thumb("future")),
                Some(Schedule::after(Delay::Minutes(30), &at(8, 0))),
            )
            .await
            .unwrap();

        assert_eq!(fx.locations(past).await, vec!["scheduled"]);
        assert_eq!(fx.queue.promote_scheduled().await.unwrap(), Some(past.to_string()));
        assert_eq!(fx.locations(past).await, vec!["work"]);
        assert_eq!(fx.locations(future).await, vec!["scheduled"]);

        assert_eq!(fx.queue.promote_scheduled().await.unwrap(), None);

        fx.clock.advance(TimeDelta::minutes(30));
        assert_eq!(fx.queue.promote_scheduled().await.unwrap(), Some(future.to_string()));
    }

    #[tokio::test]
    async fn promotion_moves_one_item_per_call() {
        let fx = Fixture::new();
        for path in ["a", "b", "c"] {
            fx.queue
                .enqueue(fx.queue.record(thumb(path)), Some(Schedule::at(0)))
                .await
                .unwrap();
        }
        fx.queue.promote_scheduled().await.unwrap();
        let stats = fx.queue.stats().await.unwrap();
        assert_eq!((stats.work, stats.scheduled), (1, 2));
    }

    #[tokio::test]
    async fn complete_removes_everything_and_counts() {
        let fx = Fixture::new();
        let id = fx.queue.enqueue(fx.queue.record(thumb("a")), None).await.unwrap();
        let other = fx.queue.enqueue(fx.queue.record(thumb("b")), None).await.unwrap();
        // the first claim ends up at the tail of processing
        let record = fx.queue.dequeue().await.unwrap().unwrap();
        let claimed_later = fx.queue.dequeue().await.unwrap().unwrap();
        assert_eq!((record.id(), claimed_later.id()), (id, other));
        assert_eq!(
            fx.store.list_snapshot(&fx.keys().processing).await,
            vec![other.to_string(), id.to_string()]
        );

        fx.queue.complete(&record, true).await.unwrap();

        assert!(fx.locations(id).await.is_empty());
        assert_eq!(fx.store.get(&id.to_string()).await.unwrap(), None);
        assert_eq!(fx.locations(other).await, vec!["processing"]);
        assert!(fx.store.get(&other.to_string()).await.unwrap().is_some());
        let stats = fx.queue.stats().await.unwrap();
        assert_eq!((stats.succeeded, stats.failed, stats.processing), (1, 0, 1));
    }

    #[tokio::test]
    async fn requeue_persists_mutations_and_counts() {
        let fx = Fixture::new();
        let id = fx.queue.enqueue(fx.queue.record(thumb("a")), None).await.unwrap();
        let mut record = fx.queue.dequeue().await.unwrap().unwrap();
        record.bump_retry();

        fx.queue.requeue(&mut record, false).await.unwrap();

        assert_eq!(fx.locations(id).await, vec!["work"]);
        let again = fx.queue.dequeue().await.unwrap().unwrap();
        assert_eq!(again.retry_count(), 1);
        assert_eq!(fx.queue.stats().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn periodic_requeue_rearms_into_scheduled() {
        let fx = Fixture::new();
        let every = Recurrence::daily(9, 0).unwrap();
        let schedule = Schedule::periodic(every, &fx.clock.now());
        assert_eq!(schedule.due_at(), at(9, 0).timestamp());

        let id = fx
            .queue
            .enqueue(fx.queue.record(thumb("report")), Some(schedule))
            .await
            .unwrap();

        fx.clock.set(at(9, 0));
        fx.queue.promote_scheduled().await.unwrap();
        fx.clock.set(at(10, 0));
        let mut record = fx.queue.dequeue().await.unwrap().unwrap();
        fx.queue.requeue(&mut record, true).await.unwrap();

        let tomorrow = at(9, 0) + TimeDelta::days(1);
        assert_eq!(
            fx.store.scored_snapshot(&fx.keys().scheduled).await,
            vec![(id.to_string(), tomorrow.timestamp())]
        );
        assert_eq!(record.schedule().map(|s| s.due_at()), Some(tomorrow.timestamp()));
        assert_eq!(fx.queue.stats().await.unwrap().succeeded, 1);
    }

    #[tokio::test]
    async fn missing_record_is_a_consistency_fault() {
        let fx = Fixture::new();
        fx.store.push(&fx.keys().work, "ghost").await.unwrap();

        let err = fx.queue.dequeue().await.unwrap_err();
        assert!(matches!(err, QueueError::MissingRecord(ref id) if id == "ghost"));
        assert!(err.is_consistency_fault());
        assert_eq!(fx.store.list_snapshot(&fx.keys().processing).await, vec!["ghost"]);
    }

    #[tokio::test]
    async fn corrupt_record_stays_in_processing_until_prepare() {
        let fx = Fixture::new();
        fx.store.set("junk", b"{not json").await.unwrap();
        fx.store.push(&fx.keys().work, "junk").await.unwrap();

        let err = fx.queue.dequeue().await.unwrap_err();
        assert!(matches!(err, QueueError::Decode { .. }));
        assert_eq!(fx.store.list_snapshot(&fx.keys().processing).await, vec!["junk"]);

        fx.queue.prepare().await.unwrap();
        assert_eq!(fx.store.list_snapshot(&fx.keys().work).await, vec!["junk"]);
    }

    #[tokio::test]
    async fn store_failure_surfaces_from_enqueue() {
        let fx = Fixture::new();
        fx.store.inject_faults(1);
        let err = fx.queue.enqueue(fx.queue.record(thumb("a")), None).await.unwrap_err();
        assert!(matches!(err, QueueError::Store(StoreError::Connection(_))));
        assert_eq!(fx.queue.stats().await.unwrap().active(), 0);
    }

    #[tokio::test]
    async fn concurrent_dequeues_claim_each_item_once() {
        let fx = Fixture::new();
        for i in 0..50 {
            fx.queue
                .enqueue(fx.queue.record(thumb(&i.to_string())), None)
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..6 {
            let queue = fx.queue.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(record) = queue.dequeue().await.unwrap() {
                    claimed.push(record.id());
                }
                claimed
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "task {id} claimed twice");
            }
        }
        assert_eq!(seen.len(), 50);
    }

    #[tokio::test]
    async fn active_items_live_in_exactly_one_structure() {
        let fx = Fixture::new();
        let now = fx.clock.now();
        let id = fx
            .queue
            .enqueue(fx.queue.record(thumb("a")), Some(Schedule::after(Delay::Seconds(5), &now)))
            .await
            .unwrap();
        assert_eq!(fx.locations(id).await, vec!["scheduled"]);

        fx.clock.advance(TimeDelta::seconds(5));
        fx.queue.promote_scheduled().await.unwrap();
        assert_eq!(fx.locations(id).await, vec!["work"]);

        let mut record = fx.queue.dequeue().await.unwrap().unwrap();
        assert_eq!(fx.locations(id).await, vec!["processing"]);

        fx.queue.requeue(&mut record, false).await.unwrap();
        assert_eq!(fx.locations(id).await, vec!["work"]);
    }
}
