//! Typed - 型付き Job API
//!
//! Job types carry their payload, recovery strategy and execution logic;
//! middleware hooks wrap every execution.

pub mod job;
pub mod middleware;

pub use self::job::{Job, JobContext};
pub use self::middleware::{Middleware, MiddlewareChain, TaskInfo, TracingMiddleware};
