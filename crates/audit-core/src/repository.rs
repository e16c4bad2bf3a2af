//! Postgres persistence for the four primary tables (spec.md §6):
//! `audit_log`, `audit_integrity_log`, `audit_retention_policy`,
//! `audit_alert`. Uses raw `sqlx::query`/`query_as` rather than
//! compile-time-checked macros, matching the teacher's style of binding
//! every parameter explicitly rather than relying on a build-time
//! `DATABASE_URL`.

use crate::error::Result;
use crate::model::{
    Alert, AlertSeverity, AlertType, AuditEvent, DataClassification, EventStatus,
    IntegrityVerification, RetentionPolicy, SessionContext, VerificationStatus,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

pub const AUDIT_LOG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_log (
    id                      UUID PRIMARY KEY,
    "timestamp"             TIMESTAMPTZ NOT NULL,
    principal_id            VARCHAR(255),
    organization_id         VARCHAR(255),
    action                  VARCHAR(255) NOT NULL,
    status                  VARCHAR(20) NOT NULL,
    target_resource_type    VARCHAR(255),
    target_resource_id      VARCHAR(255),
    outcome_description     TEXT,
    data_classification     VARCHAR(20) NOT NULL DEFAULT 'INTERNAL',
    retention_policy        VARCHAR(50) NOT NULL DEFAULT 'standard',
    correlation_id          VARCHAR(255),
    session_context         JSONB,
    details                 JSONB NOT NULL DEFAULT '{}',
    hash                    VARCHAR(64),
    hash_algorithm          VARCHAR(20) NOT NULL DEFAULT 'SHA-256',
    event_version           INTEGER NOT NULL DEFAULT 1,
    processing_latency_ms   BIGINT,
    archived_at             TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_audit_log_timestamp ON audit_log ("timestamp");
CREATE INDEX IF NOT EXISTS idx_audit_log_principal ON audit_log (principal_id);
CREATE INDEX IF NOT EXISTS idx_audit_log_organization ON audit_log (organization_id);
CREATE INDEX IF NOT EXISTS idx_audit_log_action ON audit_log (action);
CREATE INDEX IF NOT EXISTS idx_audit_log_status ON audit_log (status);
CREATE INDEX IF NOT EXISTS idx_audit_log_hash ON audit_log (hash);
CREATE INDEX IF NOT EXISTS idx_audit_log_target_resource ON audit_log (target_resource_type, target_resource_id);
CREATE INDEX IF NOT EXISTS idx_audit_log_correlation ON audit_log (correlation_id);
CREATE INDEX IF NOT EXISTS idx_audit_log_classification ON audit_log (data_classification);
CREATE INDEX IF NOT EXISTS idx_audit_log_retention_policy ON audit_log (retention_policy);
CREATE INDEX IF NOT EXISTS idx_audit_log_archived_at ON audit_log (archived_at);
CREATE INDEX IF NOT EXISTS idx_audit_log_timestamp_status ON audit_log ("timestamp", status);
CREATE INDEX IF NOT EXISTS idx_audit_log_principal_action ON audit_log (principal_id, action);
CREATE INDEX IF NOT EXISTS idx_audit_log_classification_retention ON audit_log (data_classification, retention_policy);
"#;

pub const AUDIT_INTEGRITY_LOG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_integrity_log (
    id              UUID PRIMARY KEY,
    audit_log_id    UUID NOT NULL REFERENCES audit_log(id),
    verified_at     TIMESTAMPTZ NOT NULL,
    status          VARCHAR(20) NOT NULL,
    expected_hash   VARCHAR(64),
    observed_hash   VARCHAR(64),
    verified_by     VARCHAR(255) NOT NULL,
    details         TEXT
);

CREATE INDEX IF NOT EXISTS idx_audit_integrity_log_audit_log_id ON audit_integrity_log (audit_log_id);
CREATE INDEX IF NOT EXISTS idx_audit_integrity_log_status ON audit_integrity_log (status);
"#;

pub const AUDIT_RETENTION_POLICY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_retention_policy (
    policy_name         VARCHAR(255) PRIMARY KEY,
    data_classification VARCHAR(20) NOT NULL,
    retention_days      INTEGER NOT NULL,
    archive_after_days  INTEGER,
    delete_after_days   INTEGER,
    is_active           BOOLEAN NOT NULL DEFAULT TRUE,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at          TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;

pub const AUDIT_ALERT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_alert (
    id                  UUID PRIMARY KEY,
    organization_id     VARCHAR(255) NOT NULL,
    alert_type          VARCHAR(20) NOT NULL,
    severity            VARCHAR(20) NOT NULL,
    source              VARCHAR(255) NOT NULL,
    title               VARCHAR(255) NOT NULL,
    description         TEXT NOT NULL,
    dedup_key           VARCHAR(767) NOT NULL,
    "timestamp"         TIMESTAMPTZ NOT NULL,
    resolved            BOOLEAN NOT NULL DEFAULT FALSE,
    resolved_at         TIMESTAMPTZ,
    resolved_by         VARCHAR(255),
    resolution_notes    TEXT
);

CREATE INDEX IF NOT EXISTS idx_audit_alert_organization ON audit_alert (organization_id);
CREATE INDEX IF NOT EXISTS idx_audit_alert_dedup_key ON audit_alert (dedup_key);
CREATE INDEX IF NOT EXISTS idx_audit_alert_resolved ON audit_alert (organization_id, resolved);
"#;

fn classification_str(c: DataClassification) -> &'static str {
    match c {
        DataClassification::Public => "PUBLIC",
        DataClassification::Internal => "INTERNAL",
        DataClassification::Confidential => "CONFIDENTIAL",
        DataClassification::Phi => "PHI",
    }
}

fn parse_classification(s: &str) -> DataClassification {
    match s {
        "PUBLIC" => DataClassification::Public,
        "CONFIDENTIAL" => DataClassification::Confidential,
        "PHI" => DataClassification::Phi,
        _ => DataClassification::Internal,
    }
}

fn status_str(s: EventStatus) -> &'static str {
    match s {
        EventStatus::Success => "success",
        EventStatus::Failure => "failure",
        EventStatus::Attempt => "attempt",
    }
}

fn parse_status(s: &str) -> EventStatus {
    match s {
        "failure" => EventStatus::Failure,
        "attempt" => EventStatus::Attempt,
        _ => EventStatus::Success,
    }
}

fn alert_type_str(t: AlertType) -> &'static str {
    match t {
        AlertType::Security => "SECURITY",
        AlertType::Performance => "PERFORMANCE",
        AlertType::Compliance => "COMPLIANCE",
        AlertType::System => "SYSTEM",
    }
}

fn parse_alert_type(s: &str) -> AlertType {
    match s {
        "PERFORMANCE" => AlertType::Performance,
        "COMPLIANCE" => AlertType::Compliance,
        "SYSTEM" => AlertType::System,
        _ => AlertType::Security,
    }
}

fn severity_str(s: AlertSeverity) -> &'static str {
    match s {
        AlertSeverity::Low => "LOW",
        AlertSeverity::Medium => "MEDIUM",
        AlertSeverity::High => "HIGH",
        AlertSeverity::Critical => "CRITICAL",
    }
}

fn parse_severity(s: &str) -> AlertSeverity {
    match s {
        "LOW" => AlertSeverity::Low,
        "MEDIUM" => AlertSeverity::Medium,
        "CRITICAL" => AlertSeverity::Critical,
        _ => AlertSeverity::High,
    }
}

/// Filter set for selective alert reads, mirrors `EventFilter`'s shape.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub organization_id: String,
    pub severity: Option<AlertSeverity>,
    pub alert_type: Option<AlertType>,
    pub source: Option<String>,
    pub resolved: Option<bool>,
    pub limit: i64,
    pub offset: i64,
}

/// Filter set for selective reads (integrity sweeps, GDPR export, retention).
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub principal_id: Option<String>,
    pub organization_id: Option<String>,
    pub data_classification: Option<DataClassification>,
    pub retention_policy: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub archived_only: Option<bool>,
}

pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(AUDIT_LOG_SCHEMA).execute(&self.pool).await?;
        sqlx::query(AUDIT_INTEGRITY_LOG_SCHEMA).execute(&self.pool).await?;
        sqlx::query(AUDIT_RETENTION_POLICY_SCHEMA).execute(&self.pool).await?;
        sqlx::query(AUDIT_ALERT_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Lightweight liveness probe for `/healthz` (spec.md §6).
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Exposes the underlying pool so callers (CLI binaries in
    /// particular) can construct sibling components, e.g.
    /// `PseudonymRegistry`, against the same connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts an already-hashed event as a single transactional insert
    /// (spec.md §4.5: the worker never mutates previously persisted
    /// events).
    pub async fn insert_event(&self, event: &AuditEvent) -> Result<()> {
        let session_context = event
            .session_context
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let details = serde_json::to_value(&event.details)?;

        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, "timestamp", principal_id, organization_id, action, status,
                target_resource_type, target_resource_id, outcome_description,
                data_classification, retention_policy, correlation_id,
                session_context, details, hash, hash_algorithm, event_version,
                processing_latency_ms, archived_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19
            )
            "#,
        )
        .bind(event.id)
        .bind(event.timestamp)
        .bind(&event.principal_id)
        .bind(&event.organization_id)
        .bind(&event.action)
        .bind(status_str(event.status))
        .bind(&event.target_resource_type)
        .bind(&event.target_resource_id)
        .bind(&event.outcome_description)
        .bind(classification_str(event.data_classification))
        .bind(&event.retention_policy)
        .bind(&event.correlation_id)
        .bind(session_context)
        .bind(details)
        .bind(&event.hash)
        .bind(&event.hash_algorithm)
        .bind(event.event_version)
        .bind(event.processing_latency_ms)
        .bind(event.archived_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_event(&self, id: Uuid) -> Result<Option<AuditEvent>> {
        let row = sqlx::query(r#"SELECT * FROM audit_log WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_event(&r)))
    }

    pub async fn find_events(&self, filter: &EventFilter, limit: i64, offset: i64) -> Result<Vec<AuditEvent>> {
        let mut sql = String::from("SELECT * FROM audit_log WHERE 1=1");
        let mut binds: Vec<String> = Vec::new();
        let mut idx = 1;

        macro_rules! clause {
            ($cond:expr) => {{
                sql.push_str(&format!(" AND {} = ${}", $cond, idx));
                idx += 1;
            }};
        }

        if filter.principal_id.is_some() {
            clause!("principal_id");
        }
        if filter.organization_id.is_some() {
            clause!("organization_id");
        }
        if filter.data_classification.is_some() {
            clause!("data_classification");
        }
        if filter.retention_policy.is_some() {
            clause!("retention_policy");
        }
        if let Some(since) = filter.since {
            sql.push_str(&format!(" AND \"timestamp\" >= ${idx}"));
            binds.push(since.to_rfc3339());
            idx += 1;
        }
        if let Some(until) = filter.until {
            sql.push_str(&format!(" AND \"timestamp\" <= ${idx}"));
            binds.push(until.to_rfc3339());
            idx += 1;
        }
        if let Some(archived_only) = filter.archived_only {
            sql.push_str(&format!(
                " AND archived_at IS {}",
                if archived_only { "NOT NULL" } else { "NULL" }
            ));
        }

        sql.push_str(&format!(" ORDER BY \"timestamp\" ASC LIMIT ${idx} OFFSET ${}", idx + 1));

        let mut query = sqlx::query(&sql);
        if let Some(v) = &filter.principal_id {
            query = query.bind(v);
        }
        if let Some(v) = &filter.organization_id {
            query = query.bind(v);
        }
        if let Some(v) = filter.data_classification {
            query = query.bind(classification_str(v));
        }
        if let Some(v) = &filter.retention_policy {
            query = query.bind(v);
        }
        for b in &binds {
            query = query.bind(b);
        }
        query = query.bind(limit).bind(offset);

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_event).collect())
    }

    pub async fn archive_events(&self, filter: &EventFilter) -> Result<u64> {
        let classification = filter.data_classification.map(classification_str);
        let result = sqlx::query(
            r#"
            UPDATE audit_log SET archived_at = now()
            WHERE data_classification = COALESCE($1, data_classification)
              AND "timestamp" <= $2
              AND archived_at IS NULL
            "#,
        )
        .bind(classification)
        .bind(filter.until)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn delete_events(&self, filter: &EventFilter) -> Result<u64> {
        let classification = filter.data_classification.map(classification_str);
        let result = sqlx::query(
            r#"
            DELETE FROM audit_log
            WHERE data_classification = COALESCE($1, data_classification)
              AND "timestamp" <= $2
              AND archived_at IS NOT NULL
            "#,
        )
        .bind(classification)
        .bind(filter.until)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn delete_events_for_principal(&self, principal_id: &str, exclude_ids: &[Uuid]) -> Result<u64> {
        let result = sqlx::query(
            r#"DELETE FROM audit_log WHERE principal_id = $1 AND NOT (id = ANY($2))"#,
        )
        .bind(principal_id)
        .bind(exclude_ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn update_principal_and_details(
        &self,
        id: Uuid,
        principal_id: &str,
        details: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(r#"UPDATE audit_log SET principal_id = $1, details = $2 WHERE id = $3"#)
            .bind(principal_id)
            .bind(details)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_verification(&self, verification: &IntegrityVerification) -> Result<()> {
        let status = match verification.status {
            VerificationStatus::Ok => "ok",
            VerificationStatus::Mismatch => "mismatch",
            VerificationStatus::MissingHash => "missing_hash",
        };

        sqlx::query(
            r#"
            INSERT INTO audit_integrity_log (
                id, audit_log_id, verified_at, status, expected_hash, observed_hash, verified_by, details
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(verification.audit_log_id)
        .bind(verification.verified_at)
        .bind(status)
        .bind(&verification.expected_hash)
        .bind(&verification.observed_hash)
        .bind(&verification.verified_by)
        .bind(&verification.details)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn upsert_retention_policy(&self, policy: &RetentionPolicy) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_retention_policy (
                policy_name, data_classification, retention_days, archive_after_days,
                delete_after_days, is_active, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (policy_name) DO UPDATE SET
                data_classification = EXCLUDED.data_classification,
                retention_days = EXCLUDED.retention_days,
                archive_after_days = EXCLUDED.archive_after_days,
                delete_after_days = EXCLUDED.delete_after_days,
                is_active = EXCLUDED.is_active,
                updated_at = now()
            "#,
        )
        .bind(&policy.policy_name)
        .bind(classification_str(policy.data_classification))
        .bind(policy.retention_days as i32)
        .bind(policy.archive_after_days.map(|d| d as i32))
        .bind(policy.delete_after_days.map(|d| d as i32))
        .bind(policy.is_active)
        .bind(policy.created_at)
        .bind(policy.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn active_retention_policies(&self) -> Result<Vec<RetentionPolicy>> {
        let rows = sqlx::query(
            r#"SELECT * FROM audit_retention_policy WHERE is_active = TRUE ORDER BY created_at ASC"#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| RetentionPolicy {
                policy_name: r.get("policy_name"),
                data_classification: parse_classification(r.get("data_classification")),
                retention_days: r.get::<i32, _>("retention_days") as u32,
                archive_after_days: r.get::<Option<i32>, _>("archive_after_days").map(|d| d as u32),
                delete_after_days: r.get::<Option<i32>, _>("delete_after_days").map(|d| d as u32),
                is_active: r.get("is_active"),
                created_at: r.get("created_at"),
                updated_at: r.get("updated_at"),
            })
            .collect())
    }

    /// Inserts an alert unless an unresolved, unexpired duplicate with the
    /// same dedup key already exists — returns the existing row in that
    /// case, mirroring `AlertMonitor::raise`'s dedup contract (spec.md §4.8).
    pub async fn insert_alert_if_not_duplicate(
        &self,
        alert: &Alert,
        dedup_key: &str,
        dedup_window: chrono::Duration,
    ) -> Result<Alert> {
        let cutoff = Utc::now() - dedup_window;
        let existing = sqlx::query(
            r#"
            SELECT * FROM audit_alert
            WHERE dedup_key = $1 AND resolved = FALSE AND "timestamp" >= $2
            ORDER BY "timestamp" DESC LIMIT 1
            "#,
        )
        .bind(dedup_key)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            return Ok(row_to_alert(&row));
        }

        sqlx::query(
            r#"
            INSERT INTO audit_alert (
                id, organization_id, alert_type, severity, source, title,
                description, dedup_key, "timestamp", resolved, resolved_at,
                resolved_by, resolution_notes
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(alert.id)
        .bind(&alert.organization_id)
        .bind(alert_type_str(alert.alert_type))
        .bind(severity_str(alert.severity))
        .bind(&alert.source)
        .bind(&alert.title)
        .bind(&alert.description)
        .bind(dedup_key)
        .bind(alert.timestamp)
        .bind(alert.resolved)
        .bind(alert.resolved_at)
        .bind(&alert.resolved_by)
        .bind(&alert.resolution_notes)
        .execute(&self.pool)
        .await?;

        Ok(alert.clone())
    }

    pub async fn find_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        let mut sql = String::from("SELECT * FROM audit_alert WHERE organization_id = $1");
        let mut idx = 2;

        if filter.severity.is_some() {
            sql.push_str(&format!(" AND severity = ${idx}"));
            idx += 1;
        }
        if filter.alert_type.is_some() {
            sql.push_str(&format!(" AND alert_type = ${idx}"));
            idx += 1;
        }
        if filter.source.is_some() {
            sql.push_str(&format!(" AND source = ${idx}"));
            idx += 1;
        }
        if filter.resolved.is_some() {
            sql.push_str(&format!(" AND resolved = ${idx}"));
            idx += 1;
        }
        sql.push_str(&format!(" ORDER BY \"timestamp\" DESC LIMIT ${idx} OFFSET ${}", idx + 1));

        let mut query = sqlx::query(&sql).bind(&filter.organization_id);
        if let Some(v) = filter.severity {
            query = query.bind(severity_str(v));
        }
        if let Some(v) = filter.alert_type {
            query = query.bind(alert_type_str(v));
        }
        if let Some(v) = &filter.source {
            query = query.bind(v);
        }
        if let Some(v) = filter.resolved {
            query = query.bind(v);
        }
        query = query.bind(filter.limit).bind(filter.offset);

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_alert).collect())
    }

    pub async fn resolve_alert(
        &self,
        id: Uuid,
        organization_id: &str,
        resolver: &str,
        notes: Option<String>,
    ) -> Result<Option<Alert>> {
        let row = sqlx::query(
            r#"
            UPDATE audit_alert SET resolved = TRUE, resolved_at = now(), resolved_by = $1, resolution_notes = $2
            WHERE id = $3 AND organization_id = $4
            RETURNING *
            "#,
        )
        .bind(resolver)
        .bind(&notes)
        .bind(id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_alert(&r)))
    }

    pub async fn alert_statistics(&self, organization_id: &str) -> Result<(u64, u64, u64, Vec<(String, i64)>)> {
        let totals = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE resolved) AS resolved,
                COUNT(*) FILTER (WHERE NOT resolved) AS active
            FROM audit_alert WHERE organization_id = $1
            "#,
        )
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;

        let by_severity = sqlx::query(
            r#"SELECT severity, COUNT(*) AS n FROM audit_alert WHERE organization_id = $1 GROUP BY severity"#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|r| (r.get::<String, _>("severity"), r.get::<i64, _>("n")))
        .collect();

        Ok((
            totals.get::<i64, _>("total") as u64,
            totals.get::<i64, _>("active") as u64,
            totals.get::<i64, _>("resolved") as u64,
            by_severity,
        ))
    }

    pub async fn delete_resolved_alerts_older_than(&self, organization_id: &str, older_than_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(older_than_days);
        let result = sqlx::query(
            r#"DELETE FROM audit_alert WHERE organization_id = $1 AND resolved = TRUE AND resolved_at < $2"#,
        )
        .bind(organization_id)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_alert(row: &sqlx::postgres::PgRow) -> Alert {
    Alert {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        alert_type: parse_alert_type(row.get("alert_type")),
        severity: parse_severity(row.get("severity")),
        source: row.get("source"),
        title: row.get("title"),
        description: row.get("description"),
        timestamp: row.get("timestamp"),
        resolved: row.get("resolved"),
        resolved_at: row.get("resolved_at"),
        resolved_by: row.get("resolved_by"),
        resolution_notes: row.get("resolution_notes"),
    }
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> AuditEvent {
    let session_context: Option<serde_json::Value> = row.get("session_context");
    let details: serde_json::Value = row.get("details");

    AuditEvent {
        id: row.get("id"),
        timestamp: row.get("timestamp"),
        principal_id: row.get("principal_id"),
        organization_id: row.get("organization_id"),
        action: row.get("action"),
        status: parse_status(row.get("status")),
        target_resource_type: row.get("target_resource_type"),
        target_resource_id: row.get("target_resource_id"),
        outcome_description: row.get("outcome_description"),
        data_classification: parse_classification(row.get("data_classification")),
        retention_policy: row.get("retention_policy"),
        correlation_id: row.get("correlation_id"),
        session_context: session_context.and_then(|v| serde_json::from_value::<SessionContext>(v).ok()),
        details: serde_json::from_value(details).unwrap_or_default(),
        hash: row.get("hash"),
        hash_algorithm: row.get("hash_algorithm"),
        event_version: row.get("event_version"),
        processing_latency_ms: row.get("processing_latency_ms"),
        archived_at: row.get("archived_at"),
    }
}
