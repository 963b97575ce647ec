//! RedisStore - 本番用の共有ストア
//!
//! Lists map to Redis lists (LPUSH / RPOPLPUSH / LREM), scored sets to sorted
//! sets, records to plain string keys and counters to INCR keys. Moving a due
//! member from a sorted set into a list has no single Redis command, so it runs
//! as a Lua script to stay atomic.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};

use crate::error::StoreError;
use crate::ports::QueueStore;

const PROMOTE_DUE_LUA: &str = r"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #due == 0 then
  return false
end
redis.call('ZREM', KEYS[1], due[1])
redis.call('LPUSH', KEYS[2], due[1])
return due[1]
";

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// Redis-backed store; cheap to clone, every clone shares one managed
/// connection that reconnects on its own.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    promote_due_script: Script,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::with_connection(conn))
    }

    pub fn with_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            promote_due_script: Script::new(PROMOTE_DUE_LUA),
        }
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn push(&self, list: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(list, value).await?;
        Ok(())
    }

    async fn move_tail_to_head(&self, src: &str, dst: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let moved: Option<String> = conn.rpoplpush(src, dst).await?;
        Ok(moved)
    }

    async fn remove_value(&self, list: &str, value: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let removed: usize = conn.lrem(list, 0, value).await?;
        Ok(removed)
    }

    async fn list_len(&self, list: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(list).await?;
        Ok(len)
    }

    async fn add_scored(&self, set: &str, member: &str, score: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(set, member, score).await?;
        Ok(())
    }

    async fn range_by_score(&self, set: &str, max_score: i64) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.zrangebyscore(set, "-inf", max_score).await?;
        Ok(members)
    }

    async fn promote_due(
        &self,
        set: &str,
        list: &str,
        max_score: i64,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let promoted: Option<String> = self
            .promote_due_script
            .key(set)
            .key(list)
            .arg(max_score)
            .invoke_async(&mut conn)
            .await?;
        Ok(promoted)
    }

    async fn scored_len(&self, set: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.zcard(set).await?;
        Ok(len)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn counter(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }
}
