//! Queue snapshot for operators (`spindle stats`).

use serde::Serialize;

use super::QueueKeys;
use crate::error::StoreError;
use crate::ports::QueueStore;

/// Sizes of the three structures plus the two counters.
///
/// Each field is read separately, so under concurrent workers the snapshot
/// is not a consistent cut.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub work: usize,
    pub processing: usize,
    pub scheduled: usize,
    pub succeeded: i64,
    pub failed: i64,
}

impl QueueStats {
    pub async fn collect(store: &dyn QueueStore, keys: &QueueKeys) -> Result<Self, StoreError> {
        Ok(Self {
            work: store.list_len(&keys.work).await?,
            processing: store.list_len(&keys.processing).await?,
            scheduled: store.scored_len(&keys.scheduled).await?,
            succeeded: store.counter(&keys.success).await?,
            failed: store.counter(&keys.failure).await?,
        })
    }

    /// Items not yet resolved terminally.
    pub fn active(&self) -> usize {
        self.work + self.processing + self.scheduled
    }
}
