//! Queue module: key layout, the engine and operator stats.

mod engine;
mod keys;
mod stats;

pub use engine::{JobQueue, QueueCore};
pub use keys::QueueKeys;
pub use stats::QueueStats;
