//! QueueStore port - 共有ストア（Redis または InMemory）のプリミティブ
//!
//! The queue engine needs nothing beyond these primitives. The atomic moves
//! (`move_tail_to_head`, `promote_due`) and `remove_value` are the whole
//! concurrency-control surface; there are no locks or leases on top.
//!
//! Lists are addressed head = most recently pushed, tail = oldest, so a list
//! fed by `push` and drained by `move_tail_to_head` is FIFO.

use async_trait::async_trait;

use crate::error::StoreError;

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Prepend `value` to `list`.
    async fn push(&self, list: &str, value: &str) -> Result<(), StoreError>;

    /// Atomically pop the tail of `src` and push it onto the head of `dst`.
    /// `None` when `src` is empty.
    async fn move_tail_to_head(&self, src: &str, dst: &str) -> Result<Option<String>, StoreError>;

    /// Remove every occurrence of `value` from `list`; returns how many.
    async fn remove_value(&self, list: &str, value: &str) -> Result<usize, StoreError>;

    async fn list_len(&self, list: &str) -> Result<usize, StoreError>;

    /// Insert or re-score `member`.
    async fn add_scored(&self, set: &str, member: &str, score: i64) -> Result<(), StoreError>;

    /// Members with score <= `max_score`, lowest score first.
    async fn range_by_score(&self, set: &str, max_score: i64) -> Result<Vec<String>, StoreError>;

    /// Atomically take the lowest-scored member with score <= `max_score`
    /// out of `set` and push it onto the head of `list`.
    async fn promote_due(
        &self,
        set: &str,
        list: &str,
        max_score: i64,
    ) -> Result<Option<String>, StoreError>;

    async fn scored_len(&self, set: &str) -> Result<usize, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomic +1; returns the new value.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Current counter value, 0 if never incremented.
    async fn counter(&self, key: &str) -> Result<i64, StoreError>;
}
