//! App - アプリケーション層
//!
//! ports と queue を組み合わせてワーカーを動かします。
//!
//! # 主要コンポーネント
//! - **WorkerLoop**: 1 キューを駆動するポーリングループ（recover → promote → dequeue → run → resolve）
//! - **QueueRegistry**: 名前付きキューの登録・型付き enqueue・起動
//! - **WorkerGroup**: 起動したループの shutdown / join

pub mod registry;
pub mod worker_group;
pub mod worker_loop;

pub use self::registry::{QueueId, QueueRegistry};
pub use self::worker_group::WorkerGroup;
pub use self::worker_loop::{TickOutcome, WorkerConfig, WorkerLoop, WorkerState};
