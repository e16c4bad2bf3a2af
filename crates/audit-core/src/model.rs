//! Core data model: audit events, retention policies, pseudonym mappings,
//! integrity verification records, alerts, and circuit breaker stats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Event outcome as recorded by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Failure,
    Attempt,
}

/// Data sensitivity classification, drives retention and access rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataClassification {
    Public,
    Internal,
    Confidential,
    Phi,
}

impl Default for DataClassification {
    fn default() -> Self {
        DataClassification::Internal
    }
}

/// Session metadata attached to an event, if the producer supplied one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// An immutable, hash-sealed record of a security- or compliance-relevant
/// action. Once `archived_at` is set the event is read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub principal_id: Option<String>,
    pub organization_id: Option<String>,
    /// Free-form dotted string, max 255 bytes (e.g. `auth.login.success`).
    pub action: String,
    pub status: EventStatus,
    pub target_resource_type: Option<String>,
    pub target_resource_id: Option<String>,
    pub outcome_description: Option<String>,
    pub data_classification: DataClassification,
    pub retention_policy: String,
    pub correlation_id: Option<String>,
    pub session_context: Option<SessionContext>,
    pub details: BTreeMap<String, serde_json::Value>,
    /// Lowercase hex SHA-256 over the canonical form; absent until hashed.
    pub hash: Option<String>,
    pub hash_algorithm: String,
    pub event_version: i32,
    pub processing_latency_ms: Option<i64>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl AuditEvent {
    /// Default retention policy name new events are tagged with absent an
    /// explicit choice by the producer.
    pub const DEFAULT_RETENTION_POLICY: &'static str = "standard";
    pub const DEFAULT_HASH_ALGORITHM: &'static str = "SHA-256";

    pub fn new(action: impl Into<String>, status: EventStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            principal_id: None,
            organization_id: None,
            action: action.into(),
            status,
            target_resource_type: None,
            target_resource_id: None,
            outcome_description: None,
            data_classification: DataClassification::default(),
            retention_policy: Self::DEFAULT_RETENTION_POLICY.to_string(),
            correlation_id: None,
            session_context: None,
            details: BTreeMap::new(),
            hash: None,
            hash_algorithm: Self::DEFAULT_HASH_ALGORITHM.to_string(),
            event_version: 1,
            processing_latency_ms: None,
            archived_at: None,
        }
    }

    pub fn with_principal(mut self, principal_id: impl Into<String>) -> Self {
        self.principal_id = Some(principal_id.into());
        self
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

/// Rules that archive and then delete records by classification and age.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    pub policy_name: String,
    pub data_classification: DataClassification,
    pub retention_days: u32,
    pub archive_after_days: Option<u32>,
    pub delete_after_days: Option<u32>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RetentionPolicy {
    /// Validates the `archiveAfterDays <= deleteAfterDays <= retentionDays`
    /// invariant from spec.md §3. Violations are configuration errors, not
    /// runtime errors, so the caller decides how to surface them.
    pub fn invariant_holds(&self) -> bool {
        match (self.archive_after_days, self.delete_after_days) {
            (Some(archive), Some(delete)) => {
                archive <= delete && delete <= self.retention_days
            }
            (Some(archive), None) => archive <= self.retention_days,
            (None, Some(delete)) => delete <= self.retention_days,
            (None, None) => true,
        }
    }
}

/// Strategy used to derive a pseudonym for a subject identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PseudonymStrategy {
    Hash,
    Token,
    Encryption,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PseudonymMapping {
    pub original_id: String,
    pub pseudonym_id: String,
    pub strategy: PseudonymStrategy,
    pub created_at: DateTime<Utc>,
    pub context: Option<String>,
}

/// Outcome of re-hashing a persisted event and comparing against the
/// stored hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Ok,
    Mismatch,
    MissingHash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityVerification {
    pub audit_log_id: Uuid,
    pub verified_at: DateTime<Utc>,
    pub status: VerificationStatus,
    pub expected_hash: Option<String>,
    pub observed_hash: Option<String>,
    pub verified_by: String,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertType {
    Security,
    Performance,
    Compliance,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: Uuid,
    pub organization_id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub source: String,
    pub title: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
}

impl Alert {
    /// Dedup key: identical `(source, title, correlationKey)` within the
    /// dedup window does not create a new alert (spec.md §4.8).
    pub fn dedup_key(source: &str, title: &str, correlation_key: &str) -> String {
        format!("{source}\u{1}{title}\u{1}{correlation_key}")
    }
}

/// State machine transitions for a single `endpoint:method` breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStats {
    pub state: BreakerState,
    pub failure_count: u64,
    pub success_count: u64,
    pub total_requests: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_retry_time: Option<DateTime<Utc>>,
}

impl Default for CircuitBreakerStats {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            total_requests: 0,
            last_failure_time: None,
            next_retry_time: None,
        }
    }
}
