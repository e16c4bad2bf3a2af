use super::traits::{JobQueue, QueueStats};
use super::types::{ClaimedJob, JobId, JobRecord, JobState};
use crate::error::{Error, ErrorCategory, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Categories a producer can retry from; everything else dead-letters
/// immediately regardless of remaining attempts (spec.md §4.4).
fn is_retryable(category: ErrorCategory) -> bool {
    matches!(
        category,
        ErrorCategory::Network | ErrorCategory::RateLimit | ErrorCategory::Storage | ErrorCategory::System
    )
}

/// Redis-backed implementation of the reliable queue adapter. Grounded
/// on the teacher's `RedisJobQueue` (priority lists, a delayed sorted
/// set drained with `zrangebyscore_limit`, a processing set tracking
/// in-flight jobs) but reshaped around this system's `claim`/`ack`/
/// `nack`/`scheduleRetry`/`deadLetter` contract: the processing set
/// becomes a sorted set keyed by visibility deadline (so lapsed claims
/// redeliver instead of only being swept on a timer), and a dedicated
/// dead-letter list plus a `by_status` index are added — the teacher
/// left both as stubs. `max_retries` (config.rs's
/// `DeadLetterSettings::max_retries`) is taken as a constructor argument
/// rather than hardcoded, so every job enqueued through this instance
/// dead-letters after the operator-configured attempt count.
pub struct RedisJobQueue {
    redis: ConnectionManager,
    queue_name: String,
    max_retries: u32,
}

impl RedisJobQueue {
    pub fn new(redis: ConnectionManager, queue_name: impl Into<String>, max_retries: u32) -> Self {
        Self { redis, queue_name: queue_name.into(), max_retries }
    }

    fn ready_key(&self) -> String {
        format!("{}:ready", self.queue_name)
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.queue_name)
    }

    fn processing_key(&self) -> String {
        format!("{}:processing", self.queue_name)
    }

    fn dead_letter_key(&self) -> String {
        format!("{}:dead_letter", self.queue_name)
    }

    fn by_status_key(&self, state: JobState) -> String {
        format!("{}:by_status:{}", self.queue_name, state.as_str())
    }

    fn completed_index_key(&self) -> String {
        format!("{}:completed_at", self.queue_name)
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.queue_name, id.as_str())
    }

    async fn load(&self, id: &JobId) -> Result<Option<JobRecord>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(self.job_key(id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, record: &JobRecord) -> Result<()> {
        let mut conn = self.redis.clone();
        let json = serde_json::to_string(record)?;
        conn.set::<_, _, ()>(self.job_key(&record.id), json).await?;
        Ok(())
    }

    /// Replaces `record`'s membership in every `by_status:*` set with
    /// its current state. Call after any state transition.
    async fn reindex_status(&self, record: &JobRecord, previous: Option<JobState>) -> Result<()> {
        let mut conn = self.redis.clone();
        if let Some(previous) = previous {
            if previous != record.state {
                let _: u32 = conn.srem(self.by_status_key(previous), record.id.as_str()).await?;
            }
        }
        conn.sadd::<_, _, ()>(self.by_status_key(record.state), record.id.as_str()).await?;
        Ok(())
    }

    async fn incr_stat(&self, field: &str, by: i64) -> Result<()> {
        let mut conn = self.redis.clone();
        conn.hincr::<_, _, _, ()>(format!("{}:stats", self.queue_name), field, by).await?;
        Ok(())
    }

    /// Moves delayed jobs whose scheduled time has passed, and
    /// processing jobs whose visibility window lapsed, back onto the
    /// ready list. Called at the top of every `claim`.
    async fn promote_due_jobs(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        let now = Utc::now().timestamp();

        let due_delayed: Vec<String> =
            conn.zrangebyscore_limit(self.delayed_key(), 0, now, 0, 200).await?;
        for id_str in due_delayed {
            let _: u32 = conn.zrem(self.delayed_key(), &id_str).await?;
            conn.lpush::<_, _, ()>(self.ready_key(), &id_str).await?;
        }

        let lapsed_processing: Vec<String> =
            conn.zrangebyscore_limit(self.processing_key(), 0, now, 0, 200).await?;
        for id_str in lapsed_processing {
            let id = JobId::from_string(id_str.clone());
            let _: u32 = conn.zrem(self.processing_key(), &id_str).await?;
            if let Some(mut record) = self.load(&id).await? {
                warn!("job {id} redelivered after visibility timeout lapsed");
                let previous = record.state;
                record.state = JobState::Queued;
                self.store(&record).await?;
                self.reindex_status(&record, Some(previous)).await?;
                conn.lpush::<_, _, ()>(self.ready_key(), &id_str).await?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, payload: serde_json::Value, idempotency_key: &str) -> Result<JobId> {
        let record = JobRecord::new(payload, idempotency_key, self.max_retries);
        self.store(&record).await?;
        self.reindex_status(&record, None).await?;

        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(self.ready_key(), record.id.as_str()).await?;
        self.incr_stat("total_jobs", 1).await?;

        info!("enqueued job {}", record.id);
        Ok(record.id)
    }

    async fn claim(&self, count: u32, visibility_timeout: Duration) -> Result<Vec<ClaimedJob>> {
        self.promote_due_jobs().await?;

        let mut conn = self.redis.clone();
        let mut claimed = Vec::new();

        for _ in 0..count {
            let id_str: Option<String> = conn.rpop(self.ready_key(), None).await?;
            let Some(id_str) = id_str else { break };
            let id = JobId::from_string(id_str);

            let Some(mut record) = self.load(&id).await? else { continue };
            let previous = record.state;
            record.state = JobState::Processing;
            record.attempts += 1;
            self.store(&record).await?;
            self.reindex_status(&record, Some(previous)).await?;

            let deadline = Utc::now().timestamp() + visibility_timeout.as_secs() as i64;
            conn.zadd::<_, _, _, ()>(self.processing_key(), id.as_str(), deadline).await?;

            debug!("claimed job {id} (attempt {})", record.attempts);
            claimed.push(ClaimedJob { id, payload: record.payload, attempts: record.attempts });
        }

        Ok(claimed)
    }

    async fn ack(&self, job_id: &JobId) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: u32 = conn.zrem(self.processing_key(), job_id.as_str()).await?;

        if let Some(mut record) = self.load(job_id).await? {
            let previous = record.state;
            record.state = JobState::Completed;
            self.store(&record).await?;
            self.reindex_status(&record, Some(previous)).await?;

            let now = Utc::now().timestamp();
            conn.zadd::<_, _, _, ()>(self.completed_index_key(), job_id.as_str(), now).await?;
            self.incr_stat("completed_jobs", 1).await?;
        }

        debug!("acked job {job_id}");
        Ok(())
    }

    async fn nack(&self, job_id: &JobId, error_category: ErrorCategory) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: u32 = conn.zrem(self.processing_key(), job_id.as_str()).await?;

        let Some(mut record) = self.load(job_id).await? else { return Ok(()) };

        if is_retryable(error_category) && record.attempts < record.max_retries {
            let delay_seconds = 2_u64.pow(record.attempts).min(300);
            self.schedule_retry_record(&mut record, ChronoDuration::seconds(delay_seconds as i64))
                .await?;
            Ok(())
        } else {
            let reason = format!("exhausted after {} attempts ({error_category:?})", record.attempts);
            self.dead_letter_record(&mut record, &reason).await
        }
    }

    async fn schedule_retry(&self, job_id: &JobId, delay: Duration) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: u32 = conn.zrem(self.processing_key(), job_id.as_str()).await?;

        let Some(mut record) = self.load(job_id).await? else {
            return Err(Error::not_found(format!("job {job_id} not found")));
        };
        self.schedule_retry_record(&mut record, ChronoDuration::from_std(delay).unwrap_or_default())
            .await
    }

    async fn dead_letter(&self, job_id: &JobId, reason: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: u32 = conn.zrem(self.processing_key(), job_id.as_str()).await?;
        let _: u32 = conn.zrem(self.delayed_key(), job_id.as_str()).await?;

        let Some(mut record) = self.load(job_id).await? else {
            return Err(Error::not_found(format!("job {job_id} not found")));
        };
        self.dead_letter_record(&mut record, reason).await
    }

    async fn get_jobs_by_status(&self, state: JobState, limit: Option<u32>) -> Result<Vec<ClaimedJob>> {
        let mut conn = self.redis.clone();
        let ids: Vec<String> = conn.smembers(self.by_status_key(state)).await?;
        let limit = limit.unwrap_or(u32::MAX) as usize;

        let mut jobs = Vec::new();
        for id_str in ids.into_iter().take(limit) {
            if let Some(record) = self.load(&JobId::from_string(id_str)).await? {
                jobs.push(ClaimedJob { id: record.id, payload: record.payload, attempts: record.attempts });
            }
        }
        Ok(jobs)
    }

    async fn cleanup_old_jobs(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut conn = self.redis.clone();
        let cutoff = older_than.timestamp();

        let stale: Vec<String> =
            conn.zrangebyscore_limit(self.completed_index_key(), 0, cutoff, 0, 1000).await?;

        for id_str in &stale {
            let _: u32 = conn.zrem(self.completed_index_key(), id_str).await?;
            let _: u32 = conn.srem(self.by_status_key(JobState::Completed), id_str).await?;
            let _: u32 = conn.del(self.job_key(&JobId::from_string(id_str.clone()))).await?;
        }

        if !stale.is_empty() {
            info!("cleaned up {} completed jobs older than {older_than}", stale.len());
        }
        Ok(stale.len() as u64)
    }

    async fn get_stats(&self) -> Result<QueueStats> {
        let mut conn = self.redis.clone();
        let stats_map: std::collections::HashMap<String, i64> =
            conn.hgetall(format!("{}:stats", self.queue_name)).await?;

        let get = |k: &str| stats_map.get(k).copied().unwrap_or(0) as u64;
        Ok(QueueStats {
            total_jobs: get("total_jobs"),
            queued_jobs: conn.scard(self.by_status_key(JobState::Queued)).await?,
            processing_jobs: conn.scard(self.by_status_key(JobState::Processing)).await?,
            retrying_jobs: conn.scard(self.by_status_key(JobState::Retrying)).await?,
            completed_jobs: get("completed_jobs"),
            dead_lettered_jobs: get("dead_lettered_jobs"),
        })
    }

    async fn health_check(&self) -> Result<bool> {
        let mut conn = self.redis.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(true)
    }
}

impl RedisJobQueue {
    async fn schedule_retry_record(&self, record: &mut JobRecord, delay: ChronoDuration) -> Result<()> {
        let mut conn = self.redis.clone();
        let previous = record.state;
        record.state = JobState::Retrying;
        self.store(record).await?;
        self.reindex_status(record, Some(previous)).await?;

        let when = (Utc::now() + delay).timestamp();
        conn.zadd::<_, _, _, ()>(self.delayed_key(), record.id.as_str(), when).await?;
        Ok(())
    }

    async fn dead_letter_record(&self, record: &mut JobRecord, reason: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let previous = record.state;
        record.state = JobState::DeadLettered;
        record.last_error = Some(reason.to_string());
        self.store(record).await?;
        self.reindex_status(record, Some(previous)).await?;

        let envelope = serde_json::json!({
            "job": record,
            "reason": reason,
            "deadLetteredAt": Utc::now(),
        });
        conn.lpush::<_, _, ()>(self.dead_letter_key(), envelope.to_string()).await?;
        self.incr_stat("dead_lettered_jobs", 1).await?;

        warn!("dead-lettered job {}: {reason}", record.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_and_storage_errors_are_retryable() {
        assert!(is_retryable(ErrorCategory::Network));
        assert!(is_retryable(ErrorCategory::Storage));
        assert!(!is_retryable(ErrorCategory::Validation));
        assert!(!is_retryable(ErrorCategory::Security));
    }
}
