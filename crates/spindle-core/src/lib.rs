//! spindle-core
//!
//! Core building blocks for the Spindle background job queue.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, schedule, record, recovery, errors）
//! - **ports**: 抽象化レイヤー（QueueStore, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryStore, RedisStore）
//! - **queue**: キューエンジン（prepare / enqueue / dequeue / complete / requeue / promote）
//! - **typed**: 型付き Job API（Job trait, JobContext, Middleware）
//! - **app**: ワーカーループ、レジストリ、WorkerGroup
//! - **config** / **telemetry**: 設定読み込みとログ初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod telemetry;
pub mod typed;
