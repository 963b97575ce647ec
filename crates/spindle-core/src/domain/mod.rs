//! Domain model (ids, schedules, task records, recovery decisions, errors).
//!
//! ここは純粋なモデルのみ。ストアやワーカーには依存しない。

pub mod errors;
pub mod ids;
pub mod record;
pub mod recovery;
pub mod schedule;

pub use errors::{ErrorKind, JobError};
pub use ids::TaskId;
pub use record::TaskRecord;
pub use recovery::{RecoveryStrategy, Resolution};
pub use schedule::{Day, Delay, Recurrence, Schedule, ScheduleError, ScheduleKind};
