pub use self::consumer::{ConsumerConfig, QueueConsumer};
pub use self::store::{DEFAULT_MAX_RETRIES, PostgresJobQueue};
pub(crate) use self::store::enqueue_on;

mod consumer;
mod store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Result of an enqueue that accounts for the singleton-key guarantee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new job was persisted.
    Created(i64),
    /// A live job with the same (queue, singleton key) already exists.
    AlreadyQueued,
}

impl EnqueueOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueOutcome::Created(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Created,
    Active,
    Retry,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Active => "active",
            JobStatus::Retry => "retry",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(JobStatus::Created),
            "active" => Some(JobStatus::Active),
            "retry" => Some(JobStatus::Retry),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Live states count against the singleton-key uniqueness.
    pub fn is_live(&self) -> bool {
        matches!(self, JobStatus::Created | JobStatus::Active | JobStatus::Retry)
    }
}

/// A claimed job handed to the consumer.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: i64,
    pub queue: String,
    pub payload: Value,
    pub singleton_key: Option<String>,
    pub status: JobStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub scheduled_for: DateTime<Utc>,
}

/// What the handler wants done with a finished job.
///
/// `Retry` is the tagged-outcome equivalent of raising for retry: the
/// consumer translates it into a reschedule with backoff (or a terminal
/// queue failure once retries are exhausted).
#[derive(Debug, Clone)]
pub enum JobDisposition {
    Completed,
    Retry { error: String },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &QueuedJob) -> anyhow::Result<JobDisposition>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_outcome_helpers() {
        assert!(EnqueueOutcome::Created(7).is_created());
        assert!(!EnqueueOutcome::AlreadyQueued.is_created());
    }

    #[test]
    fn job_status_round_trips() {
        for status in [
            JobStatus::Created,
            JobStatus::Active,
            JobStatus::Retry,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("bogus"), None);
    }

    #[test]
    fn only_live_states_hold_the_singleton_key() {
        assert!(JobStatus::Created.is_live());
        assert!(JobStatus::Active.is_live());
        assert!(JobStatus::Retry.is_live());
        assert!(!JobStatus::Completed.is_live());
        assert!(!JobStatus::Failed.is_live());
    }
}
