//! Recovery strategy: decides what happens to a task after it runs.
//!
//! The decision is a pure function of the strategy, the record's retry count,
//! whether the record is periodic, and the run result. Applying it (bumping the
//! retry count, calling `complete` / `requeue`) is the worker's job.

use serde::{Deserialize, Serialize};

use super::JobError;

/// Per-job-type failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// A failure is terminal.
    #[default]
    None,
    /// Up to `max_attempts` re-runs after the first failure.
    Retry { max_attempts: u32 },
}

/// What the worker does with a task once its run has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Remove the task from every structure and delete the record.
    Complete { success: bool },
    /// Put the task back into circulation (work, or scheduled if periodic).
    Requeue { success: bool, bump_retry: bool },
}

impl Resolution {
    pub fn success(&self) -> bool {
        match *self {
            Resolution::Complete { success } | Resolution::Requeue { success, .. } => success,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Resolution::Complete { .. })
    }
}

impl RecoveryStrategy {
    /// Decide the resolution for a finished run.
    ///
    /// - success: periodic tasks are re-armed, everything else completes
    /// - failure under `None`: terminal
    /// - failure under `Retry`: requeue while `retry_count < max_attempts`,
    ///   terminal after that (or immediately for a permanent error)
    pub fn resolve(
        &self,
        retry_count: u32,
        periodic: bool,
        result: Result<(), &JobError>,
    ) -> Resolution {
        let error = match result {
            Ok(()) if periodic => {
                return Resolution::Requeue {
                    success: true,
                    bump_retry: false,
                };
            }
            Ok(()) => return Resolution::Complete { success: true },
            Err(error) => error,
        };

        match *self {
            RecoveryStrategy::None => Resolution::Complete { success: false },
            RecoveryStrategy::Retry { .. } if error.is_permanent() => {
                Resolution::Complete { success: false }
            }
            RecoveryStrategy::Retry { max_attempts } if retry_count < max_attempts => {
                Resolution::Requeue {
                    success: false,
                    bump_retry: true,
                }
            }
            RecoveryStrategy::Retry { .. } => Resolution::Complete { success: false },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::one_shot(false, Resolution::Complete { success: true })]
    #[case::periodic(true, Resolution::Requeue { success: true, bump_retry: false })]
    fn success_path(#[case] periodic: bool, #[case] expected: Resolution) {
        for strategy in [RecoveryStrategy::None, RecoveryStrategy::Retry { max_attempts: 3 }] {
            assert_eq!(strategy.resolve(0, periodic, Ok(())), expected);
        }
    }

    #[test]
    fn failure_without_retry_is_terminal() {
        let err = JobError::new("boom");
        let resolution = RecoveryStrategy::None.resolve(0, true, Err(&err));
        assert_eq!(resolution, Resolution::Complete { success: false });
        assert!(resolution.is_terminal());
    }

    #[rstest]
    #[case(0, Resolution::Requeue { success: false, bump_retry: true })]
    #[case(1, Resolution::Requeue { success: false, bump_retry: true })]
    #[case(2, Resolution::Complete { success: false })]
    #[case(7, Resolution::Complete { success: false })]
    fn retry_until_exhausted(#[case] retry_count: u32, #[case] expected: Resolution) {
        let err = JobError::new("boom");
        let strategy = RecoveryStrategy::Retry { max_attempts: 2 };
        assert_eq!(strategy.resolve(retry_count, false, Err(&err)), expected);
    }

    #[test]
    fn permanent_error_skips_remaining_retries() {
        let err = JobError::permanent("bad input");
        let strategy = RecoveryStrategy::Retry { max_attempts: 5 };
        assert_eq!(
            strategy.resolve(0, false, Err(&err)),
            Resolution::Complete { success: false }
        );
    }

    #[rstest]
    #[case(Resolution::Complete { success: true }, true, true)]
    #[case(Resolution::Complete { success: false }, false, true)]
    #[case(Resolution::Requeue { success: true, bump_retry: false }, true, false)]
    #[case(Resolution::Requeue { success: false, bump_retry: true }, false, false)]
    fn resolution_accessors(
        #[case] resolution: Resolution,
        #[case] success: bool,
        #[case] terminal: bool,
    ) {
        assert_eq!(resolution.success(), success);
        assert_eq!(resolution.is_terminal(), terminal);
    }

    #[test]
    fn default_strategy_is_none() {
        assert_eq!(RecoveryStrategy::default(), RecoveryStrategy::None);
    }
}
