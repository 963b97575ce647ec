//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStore**: 開発・テスト用（単一プロセス内）
//! - **RedisStore**: 本番用（複数プロセスで共有）

pub mod memory;
pub mod redis_store;

pub use self::memory::InMemoryStore;
pub use self::redis_store::RedisStore;
