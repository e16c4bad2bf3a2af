//! Per-`endpoint:method` circuit breaker state machine (spec.md §4.3).
//!
//! State shape (closed/open/half-open, failure/success counters, windowed
//! reset) is grounded on the synchronous, single-instance
//! `CircuitBreaker` in `build-event-loop/src/circuit_breaker.rs`; this
//! version is async and keyed by endpoint so a single process can track
//! many independent downstreams, each behind its own breaker.

use crate::error::{Error, ErrorCode, Result};
use crate::model::{BreakerState, CircuitBreakerStats};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub failure_threshold: u64,
    pub recovery_timeout_ms: i64,
    pub monitoring_window_ms: i64,
    pub minimum_request_threshold: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            monitoring_window_ms: 60_000,
            minimum_request_threshold: 5,
        }
    }
}

struct BreakerEntry {
    stats: Mutex<CircuitBreakerStats>,
    /// Claimed by the single trial admitted while `HalfOpen`; cleared once
    /// that trial's `record_success`/`record_failure` resolves it. Separate
    /// from `stats` so admission can be decided with one atomic op while
    /// the stats lock is already held.
    half_open_trial_in_flight: AtomicBool,
}

/// Shared, per-key breaker table. Updates for a given key are serialized
/// through that key's `Mutex`; different keys never contend with each
/// other (spec.md §5: "the circuit-breaker map is shared ... updates are
/// serialized per key").
pub struct BreakerTable {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<BreakerEntry>>,
}

impl BreakerTable {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config, breakers: DashMap::new() }
    }

    fn entry(&self, key: &str) -> Arc<BreakerEntry> {
        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(BreakerEntry {
                    stats: Mutex::new(CircuitBreakerStats::default()),
                    half_open_trial_in_flight: AtomicBool::new(false),
                })
            })
            .clone()
    }

    pub async fn stats(&self, key: &str) -> CircuitBreakerStats {
        self.entry(key).stats.lock().await.clone()
    }

    /// Runs `op` under breaker protection for `key` (conventionally
    /// `"{endpoint}:{method}"`). Rejects immediately with `CircuitOpen`
    /// while the breaker is open and `now < nextRetryTime`.
    pub async fn execute<T, F, Fut>(&self, key: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.config.enabled {
            return op().await;
        }

        let entry = self.entry(key);
        let admitted = {
            let mut stats = entry.stats.lock().await;
            self.maybe_transition(&mut stats);

            match stats.state {
                BreakerState::Open => false,
                BreakerState::Closed => true,
                // Only the caller that wins this compare-exchange gets to
                // run the trial; everyone else arriving while a half-open
                // trial is already in flight is rejected like `Open`.
                BreakerState::HalfOpen => entry
                    .half_open_trial_in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok(),
            }
        };

        if !admitted {
            let next_retry = entry.stats.lock().await.next_retry_time;
            return Err(Error::new(
                ErrorCode::CircuitOpen,
                format!("circuit open for {key}"),
            )
            .add_metadata(
                "nextRetryTime",
                serde_json::json!(next_retry.map(|t| t.to_rfc3339())),
            ));
        }

        match op().await {
            Ok(value) => {
                self.record_success(&entry).await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure(&entry).await;
                Err(err)
            }
        }
    }

    /// Evaluates pending closed->open and open->half-open transitions
    /// before admitting a call. Must be called with the lock held.
    fn maybe_transition(&self, stats: &mut CircuitBreakerStats) {
        let now = Utc::now();

        if let Some(last_failure) = stats.last_failure_time {
            let window = chrono::Duration::milliseconds(self.config.monitoring_window_ms);
            if now - last_failure > window && stats.state == BreakerState::Closed {
                stats.failure_count = 0;
                stats.success_count = 0;
                stats.total_requests = 0;
            }
        }

        match stats.state {
            BreakerState::Closed => {
                if stats.total_requests >= self.config.minimum_request_threshold
                    && stats.failure_count >= self.config.failure_threshold
                {
                    self.open(stats, now);
                }
            }
            BreakerState::Open => {
                if let Some(next_retry) = stats.next_retry_time {
                    if now >= next_retry {
                        stats.state = BreakerState::HalfOpen;
                    }
                }
            }
            BreakerState::HalfOpen => {}
        }
    }

    fn open(&self, stats: &mut CircuitBreakerStats, now: DateTime<Utc>) {
        stats.state = BreakerState::Open;
        stats.next_retry_time =
            Some(now + chrono::Duration::milliseconds(self.config.recovery_timeout_ms));
    }

    async fn record_success(&self, entry: &BreakerEntry) {
        let mut stats = entry.stats.lock().await;
        stats.total_requests += 1;
        stats.success_count += 1;

        if stats.state == BreakerState::HalfOpen {
            stats.state = BreakerState::Closed;
            stats.failure_count = 0;
            stats.success_count = 0;
            stats.total_requests = 0;
            stats.next_retry_time = None;
            entry.half_open_trial_in_flight.store(false, Ordering::SeqCst);
        }
    }

    async fn record_failure(&self, entry: &BreakerEntry) {
        let now = Utc::now();
        let mut stats = entry.stats.lock().await;
        stats.total_requests += 1;
        stats.failure_count += 1;
        stats.last_failure_time = Some(now);

        if stats.state == BreakerState::HalfOpen {
            self.open(&mut stats, now);
            entry.half_open_trial_in_flight.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 5,
            recovery_timeout_ms: 1000,
            monitoring_window_ms: 60_000,
            minimum_request_threshold: 5,
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_and_rejects_without_invoking() {
        let table = BreakerTable::new(config());
        let key = "svc:POST";

        for _ in 0..5 {
            let _ = table
                .execute(key, || async { Err::<(), _>(Error::transient("boom")) })
                .await;
        }

        let invoked = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let invoked_clone = invoked.clone();
        let result = table
            .execute(key, || async move {
                invoked_clone.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<(), Error>(())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code, ErrorCode::CircuitOpen);
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn half_open_success_closes_and_resets_counters() {
        let table = BreakerTable::new(CircuitBreakerConfig {
            recovery_timeout_ms: 1,
            ..config()
        });
        let key = "svc:GET";

        for _ in 0..5 {
            let _ = table.execute(key, || async { Err::<(), _>(Error::transient("boom")) }).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let result = table.execute(key, || async { Ok::<_, Error>(()) }).await;
        assert!(result.is_ok());

        let stats = table.stats(key).await;
        assert_eq!(stats.state, BreakerState::Closed);
        assert_eq!(stats.failure_count, 0);
    }

    #[tokio::test]
    async fn half_open_admits_exactly_one_concurrent_trial() {
        let table = Arc::new(BreakerTable::new(CircuitBreakerConfig {
            recovery_timeout_ms: 1,
            ..config()
        }));
        let key = "svc:PUT";

        for _ in 0..5 {
            let _ = table.execute(key, || async { Err::<(), _>(Error::transient("boom")) }).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        // Only the winning caller ever reaches `op()`; the loser is rejected
        // at the admission check itself, so there is no barrier to wait on
        // from the rejected side.
        let admitted_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let table = table.clone();
            let admitted_count = admitted_count.clone();
            handles.push(tokio::spawn(async move {
                table
                    .execute(key, || async {
                        admitted_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok::<(), Error>(())
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await);
        }
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Ok(Err(e)) if e.code == ErrorCode::CircuitOpen))
            .count();

        assert_eq!(admitted_count.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(rejected, 1);
    }
}
