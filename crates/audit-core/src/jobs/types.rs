use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a queued job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Retrying,
    Completed,
    DeadLettered,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Retrying => "retrying",
            JobState::Completed => "completed",
            JobState::DeadLettered => "dead_lettered",
        }
    }
}

/// Durable record for one queued job: the producer's payload plus
/// delivery bookkeeping. `idempotency_key` is `(producerId, eventId)`
/// when the producer supplies one, else the event's canonical hash
/// (spec.md §4.4) — consumers dedup on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub payload: serde_json::Value,
    pub idempotency_key: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl JobRecord {
    pub fn new(payload: serde_json::Value, idempotency_key: impl Into<String>, max_retries: u32) -> Self {
        Self {
            id: JobId::new(),
            payload,
            idempotency_key: idempotency_key.into(),
            state: JobState::Queued,
            attempts: 0,
            max_retries,
            created_at: Utc::now(),
            last_error: None,
        }
    }
}

/// A job handed to a claimant for processing; wraps just enough of the
/// record for the caller to do work and later `ack`/`nack`/`deadLetter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedJob {
    pub id: JobId,
    pub payload: serde_json::Value,
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_round_trips_through_string() {
        let id = JobId::new();
        let same = JobId::from_string(id.as_str().to_string());
        assert_eq!(id, same);
    }

    #[test]
    fn new_record_starts_queued_with_zero_attempts() {
        let record = JobRecord::new(serde_json::json!({"a": 1}), "idem-1", 3);
        assert_eq!(record.state, JobState::Queued);
        assert_eq!(record.attempts, 0);
    }
}
