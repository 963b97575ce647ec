//! Task record: identity + retry bookkeeping + schedule + the job payload.

use serde::{Deserialize, Serialize};

use super::{Schedule, TaskId};

/// The persisted unit of work.
///
/// Design:
/// - Stored in the backing store under `id`; queue structures hold the id only.
/// - `id` is fixed at creation. `retry_count` only ever grows and is only
///   touched by the worker's recovery strategy.
/// - The job's own fields live under `job`, next to the bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord<J> {
    id: TaskId,

    /// Unix seconds of the first enqueue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enqueued_at: Option<i64>,

    #[serde(default)]
    retry_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    schedule: Option<Schedule>,

    pub job: J,
}

impl<J> TaskRecord<J> {
    pub fn new(job: J) -> Self {
        Self::with_id(TaskId::new(), job)
    }

    pub fn with_id(id: TaskId, job: J) -> Self {
        Self {
            id,
            enqueued_at: None,
            retry_count: 0,
            schedule: None,
            job,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn enqueued_at(&self) -> Option<i64> {
        self.enqueued_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    pub fn is_periodic(&self) -> bool {
        self.schedule.is_some_and(|s| s.is_periodic())
    }

    /// Stamp the first-enqueue time; later calls keep the original.
    pub(crate) fn stamp_enqueued(&mut self, now: i64) {
        self.enqueued_at.get_or_insert(now);
    }

    pub(crate) fn set_schedule(&mut self, schedule: Option<Schedule>) {
        self.schedule = schedule;
    }

    pub(crate) fn bump_retry(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }
}
