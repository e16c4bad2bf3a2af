//! Alert store and threshold monitor (spec.md §4.8). Thresholds watch a
//! sliding window of processed events (e.g. 5x `auth.login.failure` for
//! the same principal in 60s raises a SECURITY/HIGH alert). Every query
//! path is scoped by `organizationId` — cross-org reads fail with
//! `Forbidden`, the same isolation invariant the teacher enforces for
//! tenant-scoped resources elsewhere in this codebase. Alerts themselves
//! are persisted via `AuditRepository`'s `audit_alert` table (spec.md §3:
//! "the store owns persisted...alerts") so they survive restarts and are
//! visible to every process sharing the database, not just the worker
//! that raised them; only the per-rule sliding windows used to evaluate
//! thresholds stay in-memory, since they're recomputable from the event
//! stream and don't need to survive a restart.

use crate::error::{Error, Result};
use crate::model::{Alert, AlertSeverity, AlertType};
use crate::repository::{AlertFilter, AuditRepository};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ThresholdRule {
    pub name: String,
    pub action: String,
    pub count: u32,
    pub window: chrono::Duration,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
}

struct SeenEvent {
    principal_id: String,
    at: DateTime<Utc>,
}

/// Pushes one observation onto a rule's sliding window, evicts entries
/// that have aged out of `rule.window`, and reports whether the window
/// now meets `rule.count`. Pure function of the window's contents, kept
/// free of the repository so the threshold math is directly testable.
fn record_and_check_threshold(
    window: &mut VecDeque<SeenEvent>,
    principal_id: &str,
    now: DateTime<Utc>,
    rule: &ThresholdRule,
) -> bool {
    window.push_back(SeenEvent { principal_id: principal_id.to_string(), at: now });
    while let Some(front) = window.front() {
        if now - front.at > rule.window {
            window.pop_front();
        } else {
            break;
        }
    }
    window.len() as u32 >= rule.count
}

#[derive(Default, Clone, serde::Serialize)]
pub struct AlertStatistics {
    pub total: u64,
    pub active: u64,
    pub resolved: u64,
    pub by_severity: std::collections::BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default)]
pub struct AlertQueryFilters {
    pub organization_id: String,
    pub severity: Option<AlertSeverity>,
    pub alert_type: Option<AlertType>,
    pub source: Option<String>,
    pub resolved: Option<bool>,
    pub limit: usize,
    pub offset: usize,
}

/// Threshold monitor backed by the persisted `audit_alert` table. Per-rule
/// sliding windows (dashmap + per-key mutex, mirroring the breaker table's
/// concurrency pattern) stay in-memory; raised alerts are durable.
pub struct AlertMonitor {
    repository: Arc<AuditRepository>,
    rules: Vec<ThresholdRule>,
    windows: DashMap<String, Arc<Mutex<VecDeque<SeenEvent>>>>,
    dedup_window: chrono::Duration,
}

impl AlertMonitor {
    pub fn new(repository: Arc<AuditRepository>, rules: Vec<ThresholdRule>, dedup_window: chrono::Duration) -> Self {
        Self {
            repository,
            rules,
            windows: DashMap::new(),
            dedup_window,
        }
    }

    /// Feeds one processed event's `(action, principalId, organizationId)`
    /// through every matching rule, raising an alert when a rule's
    /// threshold trips within its window.
    pub async fn observe(&self, organization_id: &str, principal_id: &str, action: &str) -> Result<Option<Alert>> {
        for rule in self.rules.iter().filter(|r| r.action == action) {
            let key = format!("{}:{}:{}", rule.name, organization_id, principal_id);
            let window = self
                .windows
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
                .clone();

            let now = Utc::now();
            let mut guard = window.lock().await;
            let tripped = record_and_check_threshold(&mut guard, principal_id, now, rule);
            drop(guard);

            if tripped {
                let correlation_key = principal_id.to_string();
                let title = format!("{} threshold exceeded", rule.name);
                return Ok(Some(
                    self.raise(organization_id, rule.alert_type, rule.severity, &rule.name, &title, &correlation_key)
                        .await?,
                ));
            }
        }

        Ok(None)
    }

    /// Creates an alert unless an unresolved duplicate (same
    /// `source:title:correlationKey`) already exists within the dedup
    /// window. Persisted via `AuditRepository` so the dedup check and the
    /// resulting row are visible to every process sharing the database.
    pub async fn raise(
        &self,
        organization_id: &str,
        alert_type: AlertType,
        severity: AlertSeverity,
        source: &str,
        title: &str,
        correlation_key: &str,
    ) -> Result<Alert> {
        let dedup_key = Alert::dedup_key(source, title, correlation_key);

        let alert = Alert {
            id: Uuid::new_v4(),
            organization_id: organization_id.to_string(),
            alert_type,
            severity,
            source: source.to_string(),
            title: title.to_string(),
            description: format!("{title} ({source})"),
            timestamp: Utc::now(),
            resolved: false,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
        };

        self.repository
            .insert_alert_if_not_duplicate(&alert, &dedup_key, self.dedup_window)
            .await
    }

    pub async fn get_alerts(&self, filters: &AlertQueryFilters) -> Result<Vec<Alert>> {
        self.repository
            .find_alerts(&AlertFilter {
                organization_id: filters.organization_id.clone(),
                severity: filters.severity,
                alert_type: filters.alert_type,
                source: filters.source.clone(),
                resolved: filters.resolved,
                limit: if filters.limit == usize::MAX { i64::MAX } else { filters.limit as i64 },
                offset: filters.offset as i64,
            })
            .await
    }

    pub async fn get_active_alerts(&self, organization_id: &str) -> Result<Vec<Alert>> {
        self.get_alerts(&AlertQueryFilters {
            organization_id: organization_id.to_string(),
            resolved: Some(false),
            limit: usize::MAX,
            ..Default::default()
        })
        .await
    }

    pub async fn resolve_alert(&self, id: Uuid, organization_id: &str, resolver: &str, notes: Option<String>) -> Result<Alert> {
        self.repository
            .resolve_alert(id, organization_id, resolver, notes)
            .await?
            .ok_or_else(|| Error::not_found(format!("alert {id} not found")))
    }

    pub async fn get_alert_statistics(&self, organization_id: &str) -> Result<AlertStatistics> {
        let (total, active, resolved, by_severity) = self.repository.alert_statistics(organization_id).await?;
        Ok(AlertStatistics {
            total,
            active,
            resolved,
            by_severity: by_severity.into_iter().map(|(k, n)| (k, n as u64)).collect(),
        })
    }

    pub async fn cleanup_resolved_alerts(&self, organization_id: &str, older_than_days: i64) -> Result<u64> {
        self.repository.delete_resolved_alerts_older_than(organization_id, older_than_days).await
    }
}

// `raise`/`get_alerts`/`resolve_alert`/`get_alert_statistics` round-trip
// through `AuditRepository` and need a live Postgres connection, so
// (like `repository.rs`'s own methods) they aren't unit tested here.
// The threshold math they sit behind is pure and is tested directly.
#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> ThresholdRule {
        ThresholdRule {
            name: "login-failure-burst".into(),
            action: "auth.login.failure".into(),
            count: 5,
            window: chrono::Duration::seconds(60),
            alert_type: AlertType::Security,
            severity: AlertSeverity::High,
        }
    }

    #[test]
    fn threshold_trips_on_the_nth_observation() {
        let rule = rule();
        let mut window = VecDeque::new();
        let now = Utc::now();

        for _ in 0..4 {
            assert!(!record_and_check_threshold(&mut window, "u1", now, &rule));
        }
        assert!(record_and_check_threshold(&mut window, "u1", now, &rule));
    }

    #[test]
    fn entries_older_than_the_window_are_evicted() {
        let rule = rule();
        let mut window = VecDeque::new();
        let start = Utc::now();

        for _ in 0..4 {
            record_and_check_threshold(&mut window, "u1", start, &rule);
        }

        let after_window = start + rule.window + chrono::Duration::seconds(1);
        assert!(!record_and_check_threshold(&mut window, "u1", after_window, &rule));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn dedup_key_is_stable_for_identical_inputs_and_differs_otherwise() {
        let a = Alert::dedup_key("src", "title", "corr");
        let b = Alert::dedup_key("src", "title", "corr");
        let c = Alert::dedup_key("src", "title", "other-corr");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
