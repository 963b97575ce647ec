//! IdGenerator port - TaskId の発行
//!
//! # 実装
//! - **UlidGenerator**: Clock 基準の単調増加 ULID

use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use ulid::{Generator, Ulid};

use crate::domain::TaskId;
use crate::ports::Clock;

/// Issues ids that are never reused over a queue's lifetime.
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;
}

/// ULIDs whose timestamp part comes from `Clock`.
///
/// Within one generator, ids minted in the same millisecond still sort in
/// issue order (the random part is incremented instead of redrawn).
pub struct UlidGenerator<C> {
    clock: C,
    monotonic: Mutex<Generator>,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            monotonic: Mutex::new(Generator::new()),
        }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        let now = SystemTime::from(self.clock.now());
        let mut generator = self.monotonic.lock().unwrap_or_else(PoisonError::into_inner);
        // overflow of the random part within one millisecond: start a fresh one
        let ulid = generator
            .generate_from_datetime(now)
            .unwrap_or_else(|_| Ulid::from_datetime(now));
        TaskId::from(ulid)
    }
}
