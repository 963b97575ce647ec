//! Errors raised by job execution itself.
//!
//! These never surface as queue operation failures; the worker hands them to
//! the recovery strategy, which decides between requeue and terminal failure.

use std::error::Error as StdError;
use std::time::Duration;

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（recovery strategy に従ってリトライ）
/// - Permanent: 恒久的なエラー（残りのリトライを消費せず終了）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
}

/// A failed job run.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct JobError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl JobError {
    /// A transient failure (the default).
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
            source: None,
        }
    }

    /// A failure that should not be retried even if attempts remain.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            ..Self::new(message)
        }
    }

    pub fn timed_out(limit: Duration) -> Self {
        Self::new(format!("execution exceeded {}ms", limit.as_millis()))
    }

    /// A `Job::run` that unwound instead of returning.
    pub fn panicked(detail: &str) -> Self {
        Self::new(format!("job panicked: {detail}"))
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == ErrorKind::Permanent
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn default_kind_is_transient() {
        let err = JobError::new("boom");
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn source_is_exposed() {
        let io = std::io::Error::other("disk full");
        let err = JobError::permanent("write failed").with_source(io);
        assert!(err.is_permanent());
        assert_eq!(err.source().unwrap().to_string(), "disk full");
    }

    #[test]
    fn timeout_mentions_limit() {
        let err = JobError::timed_out(Duration::from_millis(1500));
        assert!(err.message().contains("1500ms"));
    }

    #[test]
    fn panic_is_transient_and_keeps_the_detail() {
        let err = JobError::panicked("index out of bounds");
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(err.message(), "job panicked: index out of bounds");
    }
}
