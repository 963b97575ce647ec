//! Job types the CLI knows how to run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spindle_core::domain::{JobError, RecoveryStrategy};
use spindle_core::typed::{Job, JobContext};

/// Prints a message. Fails on its first `fail_times` runs to exercise retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Echo {
    pub message: String,
    #[serde(default)]
    pub fail_times: u32,
}

#[async_trait]
impl Job for Echo {
    const TYPE: &'static str = "echo";

    fn recovery_strategy(&self) -> RecoveryStrategy {
        RecoveryStrategy::Retry { max_attempts: 3 }
    }

    async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.retry_count() < self.fail_times {
            return Err(JobError::new(format!(
                "intentional failure ({} left)",
                self.fail_times - ctx.retry_count()
            )));
        }
        println!("[{}] {} (task {})", ctx.queue(), self.message, ctx.task_id());
        Ok(())
    }
}

/// Periodic liveness line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub label: String,
}

#[async_trait]
impl Job for Heartbeat {
    const TYPE: &'static str = "heartbeat";

    async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
        println!("[{}] heartbeat '{}' at {}", ctx.queue(), self.label, ctx.now().to_rfc3339());
        Ok(())
    }
}
