//! Ingestion worker (spec.md §4.5): claims jobs from the queue, validates
//! and hashes the payload, persists it, and acks — or nacks/dead-letters
//! on failure. Bounded-concurrency pool and graceful-shutdown shape
//! grounded on the teacher's (now-removed) `jobs::executor::JobExecutor`:
//! a semaphore caps in-flight work, `tokio::select!` races claim-loop
//! ticks against a shutdown signal, and shutdown waits for in-flight
//! jobs up to a deadline before forcing a nack.

use crate::canonical;
use crate::error::{Error, ErrorCategory, ErrorCode, Result};
use crate::jobs::{JobQueue, JobState};
use crate::model::{AuditEvent, DataClassification, EventStatus, SessionContext};
use crate::repository::AuditRepository;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Default 2 in development, 8 in production (spec.md §4.5).
    pub concurrency: usize,
    pub visibility_timeout: Duration,
    pub poll_interval: Duration,
    pub claim_batch_size: u32,
    pub shutdown_timeout: Duration,
    pub clock_skew_tolerance: chrono::Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            visibility_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            claim_batch_size: 10,
            shutdown_timeout: Duration::from_secs(30),
            clock_skew_tolerance: chrono::Duration::seconds(60),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct WorkerMetrics {
    pub received: Arc<AtomicU64>,
    pub processed: Arc<AtomicU64>,
    pub failed: Arc<AtomicU64>,
    pub dead_lettered: Arc<AtomicU64>,
}

/// Wire shape producers enqueue; validated and turned into an
/// [`AuditEvent`] before hashing and persistence.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingEvent {
    pub timestamp: DateTime<Utc>,
    pub principal_id: Option<String>,
    pub organization_id: Option<String>,
    pub action: String,
    pub status: EventStatus,
    pub target_resource_type: Option<String>,
    pub target_resource_id: Option<String>,
    pub outcome_description: Option<String>,
    #[serde(default)]
    pub data_classification: DataClassification,
    pub retention_policy: Option<String>,
    pub correlation_id: Option<String>,
    pub session_context: Option<SessionContext>,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

/// Validates §3's invariants on an incoming payload and turns it into an
/// [`AuditEvent`] ready for hashing.
fn validate_and_build(incoming: IncomingEvent, clock_skew_tolerance: chrono::Duration) -> Result<AuditEvent> {
    if incoming.action.is_empty() || incoming.action.len() > 255 {
        return Err(Error::invalid_event("action must be 1-255 bytes"));
    }
    if incoming.timestamp > Utc::now() + clock_skew_tolerance {
        return Err(Error::invalid_event("timestamp is too far in the future"));
    }

    let mut event = AuditEvent::new(incoming.action, incoming.status);
    event.timestamp = incoming.timestamp;
    event.principal_id = incoming.principal_id;
    event.organization_id = incoming.organization_id;
    event.target_resource_type = incoming.target_resource_type;
    event.target_resource_id = incoming.target_resource_id;
    event.outcome_description = incoming.outcome_description;
    event.data_classification = incoming.data_classification;
    if let Some(policy) = incoming.retention_policy {
        event.retention_policy = policy;
    }
    event.correlation_id = incoming.correlation_id;
    event.session_context = incoming.session_context;
    event.details = incoming.details;

    Ok(event)
}

pub struct IngestionWorker {
    queue: Arc<dyn JobQueue>,
    repository: Arc<AuditRepository>,
    config: WorkerConfig,
    metrics: WorkerMetrics,
}

impl IngestionWorker {
    pub fn new(queue: Arc<dyn JobQueue>, repository: Arc<AuditRepository>, config: WorkerConfig) -> Self {
        Self { queue, repository, config, metrics: WorkerMetrics::default() }
    }

    pub fn metrics(&self) -> WorkerMetrics {
        self.metrics.clone()
    }

    /// Runs the claim loop until `shutdown` resolves, then drains
    /// in-flight work up to `shutdown_timeout` before returning.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut interval = tokio::time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.claim_and_spawn(&semaphore).await {
                        error!("claim cycle failed: {err}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("shutting down, waiting up to {:?} for in-flight jobs", self.config.shutdown_timeout);
        let drained = timeout(self.config.shutdown_timeout, async {
            let _ = semaphore.acquire_many(self.config.concurrency as u32).await;
        })
        .await;

        if drained.is_err() {
            warn!("shutdown timeout elapsed with jobs still in flight; they will be redelivered after their visibility window lapses");
        }
    }

    async fn claim_and_spawn(&self, semaphore: &Arc<Semaphore>) -> Result<()> {
        let available = semaphore.available_permits() as u32;
        if available == 0 {
            return Ok(());
        }

        let claimed = self
            .queue
            .claim(available.min(self.config.claim_batch_size), self.config.visibility_timeout)
            .await?;

        for job in claimed {
            self.metrics.received.fetch_add(1, Ordering::Relaxed);
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let queue = self.queue.clone();
            let repository = self.repository.clone();
            let metrics = self.metrics.clone();
            let clock_skew_tolerance = self.config.clock_skew_tolerance;

            tokio::spawn(async move {
                let _permit = permit;
                let job_id = job.id.clone();
                match process_one(job.payload, clock_skew_tolerance, &repository).await {
                    Ok(()) => {
                        metrics.processed.fetch_add(1, Ordering::Relaxed);
                        if let Err(err) = queue.ack(&job_id).await {
                            error!("ack failed for {job_id}: {err}");
                        }
                    }
                    Err(err) if err.code == ErrorCode::InvalidEvent => {
                        metrics.dead_lettered.fetch_add(1, Ordering::Relaxed);
                        let _ = queue.dead_letter(&job_id, &err.to_string()).await;
                    }
                    Err(err) => {
                        metrics.failed.fetch_add(1, Ordering::Relaxed);
                        let category = err.category();
                        if let Err(nack_err) = queue.nack(&job_id, category).await {
                            error!("nack failed for {job_id}: {nack_err}");
                        }
                    }
                }
            });
        }

        Ok(())
    }
}

async fn process_one(
    payload: serde_json::Value,
    clock_skew_tolerance: chrono::Duration,
    repository: &AuditRepository,
) -> Result<()> {
    let started_at = Utc::now();

    let incoming: IncomingEvent = serde_json::from_value(payload)
        .map_err(|e| Error::invalid_event(format!("malformed event payload: {e}")))?;

    let mut event = validate_and_build(incoming, clock_skew_tolerance)?;
    event.hash = Some(canonical::hash(&event)?);
    event.processing_latency_ms = Some((Utc::now() - started_at).num_milliseconds());

    repository.insert_event(&event).await?;
    Ok(())
}

/// Convenience wrapper the queue consumer uses when enqueueing; the
/// idempotency key is the producer's `(producerId, eventId)` when
/// present, else the event's own canonical hash (spec.md §4.4).
pub fn idempotency_key_for(producer_id: Option<&str>, event_id: Option<&str>, fallback_hash: &str) -> String {
    match (producer_id, event_id) {
        (Some(p), Some(e)) => format!("{p}:{e}"),
        _ => fallback_hash.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_action() {
        let incoming = IncomingEvent {
            timestamp: Utc::now(),
            principal_id: None,
            organization_id: None,
            action: String::new(),
            status: EventStatus::Success,
            target_resource_type: None,
            target_resource_id: None,
            outcome_description: None,
            data_classification: DataClassification::Internal,
            retention_policy: None,
            correlation_id: None,
            session_context: None,
            details: BTreeMap::new(),
        };

        let result = validate_and_build(incoming, chrono::Duration::seconds(60));
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code, ErrorCode::InvalidEvent);
    }

    #[test]
    fn rejects_future_timestamp_beyond_skew_tolerance() {
        let incoming = IncomingEvent {
            timestamp: Utc::now() + chrono::Duration::hours(1),
            principal_id: None,
            organization_id: None,
            action: "auth.login.success".into(),
            status: EventStatus::Success,
            target_resource_type: None,
            target_resource_id: None,
            outcome_description: None,
            data_classification: DataClassification::Internal,
            retention_policy: None,
            correlation_id: None,
            session_context: None,
            details: BTreeMap::new(),
        };

        let result = validate_and_build(incoming, chrono::Duration::seconds(60));
        assert!(result.is_err());
    }

    #[test]
    fn idempotency_key_prefers_producer_event_pair() {
        assert_eq!(idempotency_key_for(Some("p1"), Some("e1"), "deadbeef"), "p1:e1");
        assert_eq!(idempotency_key_for(None, None, "deadbeef"), "deadbeef");
    }
}
