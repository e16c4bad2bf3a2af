use super::types::{ClaimedJob, JobId, JobState};
use crate::error::{ErrorCategory, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Reliable queue adapter contract (spec.md §4.4): at-least-once
/// delivery, visibility-timeout redelivery, delayed retries, dead-letter
/// routing. Implementations MUST treat `(producerId, eventId)` — or the
/// canonical hash when absent — as the idempotency key; consumers are
/// expected to dedup on it themselves since the queue only guarantees
/// at-least-once, not exactly-once, delivery.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues `payload` for delivery, immediately visible to `claim`.
    async fn enqueue(&self, payload: serde_json::Value, idempotency_key: &str) -> Result<JobId>;

    /// Claims up to `count` ready jobs, making each invisible to other
    /// claimants for `visibility_timeout`. Jobs whose visibility window
    /// lapsed without an `ack`/`nack` are redelivered here as well.
    async fn claim(&self, count: u32, visibility_timeout: Duration) -> Result<Vec<ClaimedJob>>;

    /// Acknowledges successful processing; the job is removed from the
    /// in-flight set and recorded as completed.
    async fn ack(&self, job_id: &JobId) -> Result<()>;

    /// Reports a failed attempt. Retryable categories requeue the job
    /// (respecting `max_retries`); non-retryable or exhausted jobs are
    /// dead-lettered with `error_category` folded into the reason.
    async fn nack(&self, job_id: &JobId, error_category: ErrorCategory) -> Result<()>;

    /// Explicitly defers redelivery of an in-flight or queued job by
    /// `delay`, used by backoff-aware callers instead of a bare `nack`.
    async fn schedule_retry(&self, job_id: &JobId, delay: Duration) -> Result<()>;

    /// Moves a job straight to the dead-letter stream, recording `reason`.
    async fn dead_letter(&self, job_id: &JobId, reason: &str) -> Result<()>;

    /// Lists up to `limit` jobs currently in `state`.
    async fn get_jobs_by_status(&self, state: JobState, limit: Option<u32>) -> Result<Vec<ClaimedJob>>;

    /// Removes completed jobs and their indexes older than `older_than`.
    async fn cleanup_old_jobs(&self, older_than: DateTime<Utc>) -> Result<u64>;

    async fn get_stats(&self) -> Result<QueueStats>;

    async fn health_check(&self) -> Result<bool>;
}

/// Statistics about the job queue, including the dead-letter count that
/// feeds the alert monitor's threshold check (spec.md §4.4, §4.8).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct QueueStats {
    pub total_jobs: u64,
    pub queued_jobs: u64,
    pub processing_jobs: u64,
    pub retrying_jobs: u64,
    pub completed_jobs: u64,
    pub dead_lettered_jobs: u64,
}

impl QueueStats {
    pub fn error_rate(&self) -> f64 {
        if self.total_jobs == 0 {
            0.0
        } else {
            self.dead_lettered_jobs as f64 / self.total_jobs as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_rate_is_zero_with_no_jobs() {
        let stats = QueueStats::default();
        assert_eq!(stats.error_rate(), 0.0);
    }

    #[test]
    fn error_rate_divides_dead_lettered_by_total() {
        let stats = QueueStats { total_jobs: 20, dead_lettered_jobs: 5, ..Default::default() };
        assert_eq!(stats.error_rate(), 0.25);
    }
}
