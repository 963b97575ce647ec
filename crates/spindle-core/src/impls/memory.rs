//! InMemoryStore - 開発・テスト用の共有ストア
//!
//! # 実装詳細
//! - すべての構造を 1 つの tokio Mutex で保護（各操作は線形化可能）
//! - list は VecDeque（front = head, back = tail）
//! - scored set は member -> score と (score, member) の順序付き集合
//!
//! Shared between tasks of one process through `Arc`; it is not visible to
//! other processes, so it stands in for Redis only within a single binary.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::ports::QueueStore;

#[derive(Debug, Default)]
struct ScoredSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl ScoredSet {
    fn insert(&mut self, member: &str, score: i64) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(old, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn pop_first_due(&mut self, max_score: i64) -> Option<String> {
        let first = self.ordered.first()?;
        if first.0 > max_score {
            return None;
        }
        let (_, member) = self.ordered.pop_first()?;
        self.scores.remove(&member);
        Some(member)
    }

    fn due(&self, max_score: i64) -> Vec<String> {
        self.ordered
            .iter()
            .take_while(|(score, _)| *score <= max_score)
            .map(|(_, member)| member.clone())
            .collect()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    lists: HashMap<String, VecDeque<String>>,
    scored: HashMap<String, ScoredSet>,
    values: HashMap<String, Vec<u8>>,
    counters: HashMap<String, i64>,
}

impl MemoryState {
    fn push_head(&mut self, list: &str, value: String) {
        self.lists.entry(list.to_string()).or_default().push_front(value);
    }

    fn pop_tail(&mut self, list: &str) -> Option<String> {
        let queue = self.lists.get_mut(list)?;
        let value = queue.pop_back();
        if queue.is_empty() {
            self.lists.remove(list);
        }
        value
    }
}

/// In-process store with the same primitive semantics as the Redis store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
    faults: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` operations fail with a connection error.
    pub fn inject_faults(&self, n: usize) {
        self.faults.store(n, Ordering::SeqCst);
    }

    /// Snapshot of a list, head first.
    pub async fn list_snapshot(&self, list: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .lists
            .get(list)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of a scored set, lowest score first.
    pub async fn scored_snapshot(&self, set: &str) -> Vec<(String, i64)> {
        let state = self.state.lock().await;
        state
            .scored
            .get(set)
            .map(|s| s.ordered.iter().map(|(score, m)| (m.clone(), *score)).collect())
            .unwrap_or_default()
    }

    fn check_fault(&self) -> Result<(), StoreError> {
        let injected = self
            .faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Connection("injected fault".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn push(&self, list: &str, value: &str) -> Result<(), StoreError> {
        self.check_fault()?;
        let mut state = self.state.lock().await;
        state.push_head(list, value.to_string());
        Ok(())
    }

    async fn move_tail_to_head(&self, src: &str, dst: &str) -> Result<Option<String>, StoreError> {
        self.check_fault()?;
        let mut state = self.state.lock().await;
        let Some(value) = state.pop_tail(src) else {
            return Ok(None);
        };
        state.push_head(dst, value.clone());
        Ok(Some(value))
    }

    async fn remove_value(&self, list: &str, value: &str) -> Result<usize, StoreError> {
        self.check_fault()?;
        let mut state = self.state.lock().await;
        let Some(queue) = state.lists.get_mut(list) else {
            return Ok(0);
        };
        let before = queue.len();
        queue.retain(|v| v != value);
        let removed = before - queue.len();
        if queue.is_empty() {
            state.lists.remove(list);
        }
        Ok(removed)
    }

    async fn list_len(&self, list: &str) -> Result<usize, StoreError> {
        self.check_fault()?;
        let state = self.state.lock().await;
        Ok(state.lists.get(list).map_or(0, VecDeque::len))
    }

    async fn add_scored(&self, set: &str, member: &str, score: i64) -> Result<(), StoreError> {
        self.check_fault()?;
        let mut state = self.state.lock().await;
        state.scored.entry(set.to_string()).or_default().insert(member, score);
        Ok(())
    }

    async fn range_by_score(&self, set: &str, max_score: i64) -> Result<Vec<String>, StoreError> {
        self.check_fault()?;
        let state = self.state.lock().await;
        Ok(state
            .scored
            .get(set)
            .map(|s| s.due(max_score))
            .unwrap_or_default())
    }

    async fn promote_due(
        &self,
        set: &str,
        list: &str,
        max_score: i64,
    ) -> Result<Option<String>, StoreError> {
        self.check_fault()?;
        let mut state = self.state.lock().await;
        let Some(member) = state.scored.get_mut(set).and_then(|s| s.pop_first_due(max_score))
        else {
            return Ok(None);
        };
        state.push_head(list, member.clone());
        Ok(Some(member))
    }

    async fn scored_len(&self, set: &str) -> Result<usize, StoreError> {
        self.check_fault()?;
        let state = self.state.lock().await;
        Ok(state.scored.get(set).map_or(0, |s| s.scores.len()))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_fault()?;
        let state = self.state.lock().await;
        Ok(state.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.check_fault()?;
        let mut state = self.state.lock().await;
        state.values.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_fault()?;
        let mut state = self.state.lock().await;
        state.values.remove(key);
        state.lists.remove(key);
        state.scored.remove(key);
        state.counters.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        self.check_fault()?;
        let mut state = self.state.lock().await;
        let counter = state.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn counter(&self, key: &str) -> Result<i64, StoreError> {
        self.check_fault()?;
        let state = self.state.lock().await;
        Ok(state.counters.get(key).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn push_then_move_is_fifo() {
        let store = InMemoryStore::new();
        store.push("work", "a").await.unwrap();
        store.push("work", "b").await.unwrap();

        assert_eq!(store.move_tail_to_head("work", "proc").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.move_tail_to_head("work", "proc").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.move_tail_to_head("work", "proc").await.unwrap(), None);

        assert_eq!(store.list_snapshot("proc").await, vec!["b", "a"]);
        assert_eq!(store.list_len("work").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_value_drops_every_occurrence() {
        let store = InMemoryStore::new();
        for v in ["x", "y", "x"] {
            store.push("l", v).await.unwrap();
        }
        assert_eq!(store.remove_value("l", "x").await.unwrap(), 2);
        assert_eq!(store.list_snapshot("l").await, vec!["y"]);
        assert_eq!(store.remove_value("missing", "x").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn scored_set_orders_by_score_and_rescores() {
        let store = InMemoryStore::new();
        store.add_scored("s", "late", 50).await.unwrap();
        store.add_scored("s", "early", 10).await.unwrap();
        store.add_scored("s", "late", 5).await.unwrap();

        assert_eq!(store.scored_len("s").await.unwrap(), 2);
        assert_eq!(store.range_by_score("s", 20).await.unwrap(), vec!["late", "early"]);
        assert!(store.range_by_score("s", 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn promote_due_moves_one_member() {
        let store = InMemoryStore::new();
        store.add_scored("s", "a", 1).await.unwrap();
        store.add_scored("s", "b", 2).await.unwrap();
        store.add_scored("s", "future", 100).await.unwrap();

        assert_eq!(store.promote_due("s", "work", 10).await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.list_snapshot("work").await, vec!["a"]);
        assert_eq!(store.scored_len("s").await.unwrap(), 2);

        store.promote_due("s", "work", 10).await.unwrap();
        assert_eq!(store.promote_due("s", "work", 10).await.unwrap(), None);
        assert_eq!(store.scored_snapshot("s").await, vec![("future".to_string(), 100)]);
    }

    #[tokio::test]
    async fn values_and_counters() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", b"v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);

        assert_eq!(store.counter("c").await.unwrap(), 0);
        assert_eq!(store.increment("c").await.unwrap(), 1);
        assert_eq!(store.increment("c").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn injected_faults_fail_then_recover() {
        let store = InMemoryStore::new();
        store.inject_faults(1);
        assert!(matches!(store.push("l", "a").await, Err(StoreError::Connection(_))));
        store.push("l", "a").await.unwrap();
        assert_eq!(store.list_len("l").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_moves_never_hand_out_the_same_value() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..100 {
            store.push("work", &i.to_string()).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(v) = store.move_tail_to_head("work", "proc").await.unwrap() {
                    got.push(v);
                }
                got
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 100);
    }
}
