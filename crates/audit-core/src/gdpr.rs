//! GDPR engine (spec.md §4.7): export, pseudonymize, retention apply,
//! and erasure-with-audit-trail-preservation. Every operation audits
//! itself by writing a fresh, hashed `AuditEvent` for its own action —
//! the engine is both a mutator of the store and a producer into it.
//!
//! Operations on a single subject are serialized via a per-`principalId`
//! advisory lock (spec.md §5) so a pseudonymize and a delete can never
//! interleave; the `DashMap<String, Arc<Mutex<()>>>` shape mirrors the
//! per-key locking already used by the circuit-breaker table.

use crate::canonical;
use crate::error::{Error, Result};
use crate::model::{AuditEvent, DataClassification, EventStatus, PseudonymStrategy};
use crate::pseudonym::PseudonymRegistry;
use crate::repository::{AuditRepository, EventFilter};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Compliance-critical actions preserved under erasure by default
/// (spec.md §4.7.4).
pub const DEFAULT_COMPLIANCE_CRITICAL_ACTIONS: &[&str] = &[
    "auth.login.success",
    "auth.login.failure",
    "data.access.unauthorized",
    "gdpr.data.export",
    "gdpr.data.pseudonymize",
    "gdpr.data.delete",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Xml,
}

pub struct ExportRequest {
    pub principal_id: String,
    pub format: ExportFormat,
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub include_metadata: bool,
    pub requested_by: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExportMetadata {
    pub request_id: uuid::Uuid,
    pub record_count: usize,
    pub data_size: usize,
    pub exported_by: String,
    pub categories: Vec<String>,
    pub retention_policies: Vec<String>,
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

pub struct ExportResult {
    pub bytes: Vec<u8>,
    pub metadata: ExportMetadata,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PseudonymizeResult {
    pub pseudonym_id: String,
    pub records_affected: u64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RetentionResult {
    pub policy_name: String,
    pub records_archived: u64,
    pub records_deleted: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ErasureResult {
    pub records_deleted: u64,
    pub compliance_records_preserved: u64,
}

pub struct GdprEngine {
    repository: Arc<AuditRepository>,
    pseudonyms: Arc<PseudonymRegistry>,
    subject_locks: DashMap<String, Arc<Mutex<()>>>,
    compliance_critical_actions: Vec<String>,
}

impl GdprEngine {
    pub fn new(repository: Arc<AuditRepository>, pseudonyms: Arc<PseudonymRegistry>) -> Self {
        Self {
            repository,
            pseudonyms,
            subject_locks: DashMap::new(),
            compliance_critical_actions: DEFAULT_COMPLIANCE_CRITICAL_ACTIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    fn lock_for(&self, principal_id: &str) -> Arc<Mutex<()>> {
        self.subject_locks
            .entry(principal_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn audit_self(&self, action: &str, principal_id: Option<&str>, details: BTreeMap<String, serde_json::Value>) -> Result<()> {
        let mut event = AuditEvent::new(action, EventStatus::Success);
        if let Some(p) = principal_id {
            event = event.with_principal(p);
        }
        event.data_classification = DataClassification::Confidential;
        event.details = details;
        event.hash = Some(canonical::hash(&event)?);
        self.repository.insert_event(&event).await
    }

    pub async fn export(&self, request: ExportRequest) -> Result<ExportResult> {
        let _guard = self.lock_for(&request.principal_id).lock().await;

        let filter = EventFilter {
            principal_id: Some(request.principal_id.clone()),
            since: request.date_range.map(|(s, _)| s),
            until: request.date_range.map(|(_, e)| e),
            ..Default::default()
        };

        let events = self.repository.find_events(&filter, 100_000, 0).await?;
        let categories: Vec<String> = {
            let mut set: std::collections::BTreeSet<String> =
                events.iter().map(|e| format!("{:?}", e.data_classification)).collect();
            set.drain().collect()
        };
        let retention_policies: Vec<String> = {
            let mut set: std::collections::BTreeSet<String> =
                events.iter().map(|e| e.retention_policy.clone()).collect();
            set.drain().collect()
        };

        let bytes = match request.format {
            ExportFormat::Json => render_json(&events, request.include_metadata)?,
            ExportFormat::Csv => render_csv(&events)?,
            ExportFormat::Xml => render_xml(&events)?,
        };

        let metadata = ExportMetadata {
            request_id: uuid::Uuid::new_v4(),
            record_count: events.len(),
            data_size: bytes.len(),
            exported_by: request.requested_by.clone(),
            categories,
            retention_policies,
            date_range: request.date_range,
        };

        let mut details = BTreeMap::new();
        details.insert("requestId".to_string(), serde_json::json!(metadata.request_id));
        details.insert("recordCount".to_string(), serde_json::json!(metadata.record_count));
        details.insert("format".to_string(), serde_json::json!(format!("{:?}", request.format)));
        details.insert("requestedBy".to_string(), serde_json::json!(request.requested_by));
        self.audit_self("gdpr.data.export", Some(&request.principal_id), details).await?;

        Ok(ExportResult { bytes, metadata })
    }

    pub async fn pseudonymize(&self, principal_id: &str, strategy: PseudonymStrategy, requested_by: &str) -> Result<PseudonymizeResult> {
        let _guard = self.lock_for(principal_id).lock().await;

        let pseudonym_id = self.pseudonyms.create_pseudonym(principal_id, strategy).await?;

        let filter = EventFilter { principal_id: Some(principal_id.to_string()), ..Default::default() };
        let events = self.repository.find_events(&filter, 100_000, 0).await?;

        let mut affected = 0u64;
        for event in &events {
            let mut details = event.details.clone();
            details.insert("pseudonymized".to_string(), serde_json::json!(true));
            details.insert("pseudonymizedAt".to_string(), serde_json::json!(Utc::now()));
            let details_value = serde_json::to_value(&details)?;
            self.repository
                .update_principal_and_details(event.id, &pseudonym_id, &details_value)
                .await?;
            affected += 1;
        }

        let mut audit_details = BTreeMap::new();
        audit_details.insert("pseudonymId".to_string(), serde_json::json!(pseudonym_id));
        audit_details.insert("recordsAffected".to_string(), serde_json::json!(affected));
        audit_details.insert("requestedBy".to_string(), serde_json::json!(requested_by));
        self.audit_self("gdpr.data.pseudonymize", Some(principal_id), audit_details).await?;

        Ok(PseudonymizeResult { pseudonym_id, records_affected: affected })
    }

    /// Applies every active retention policy in creation order
    /// (spec.md §4.7.3): archive first, then delete from among the
    /// already-archived.
    pub async fn apply_retention(&self) -> Result<Vec<RetentionResult>> {
        let policies = self.repository.active_retention_policies().await?;
        let mut results = Vec::with_capacity(policies.len());

        for policy in policies {
            let mut result = RetentionResult { policy_name: policy.policy_name.clone(), ..Default::default() };

            if let Some(archive_after) = policy.archive_after_days {
                let cutoff = Utc::now() - chrono::Duration::days(archive_after as i64);
                let filter = EventFilter {
                    data_classification: Some(policy.data_classification),
                    until: Some(cutoff),
                    archived_only: Some(false),
                    ..Default::default()
                };
                result.records_archived = self.repository.archive_events(&filter).await?;
            }

            if let Some(delete_after) = policy.delete_after_days {
                let cutoff = Utc::now() - chrono::Duration::days(delete_after as i64);
                let filter = EventFilter {
                    data_classification: Some(policy.data_classification),
                    until: Some(cutoff),
                    archived_only: Some(true),
                    ..Default::default()
                };
                result.records_deleted = self.repository.delete_events(&filter).await?;
            }

            let mut details = BTreeMap::new();
            details.insert("policyName".to_string(), serde_json::json!(result.policy_name));
            details.insert("recordsArchived".to_string(), serde_json::json!(result.records_archived));
            details.insert("recordsDeleted".to_string(), serde_json::json!(result.records_deleted));
            self.audit_self("gdpr.retention.apply", None, details).await?;

            results.push(result);
        }

        Ok(results)
    }

    /// Erasure with audit-trail preservation (spec.md §4.7.4). When
    /// `preserve_compliance_audits`, the subject's compliance-critical
    /// events are pseudonymized rather than deleted; everything else is
    /// removed outright.
    pub async fn erase(&self, principal_id: &str, requested_by: &str, preserve_compliance_audits: bool) -> Result<ErasureResult> {
        let _guard = self.lock_for(principal_id).lock().await;

        let filter = EventFilter { principal_id: Some(principal_id.to_string()), ..Default::default() };
        let events = self.repository.find_events(&filter, 100_000, 0).await?;

        let (preserved, erase_result) = if preserve_compliance_audits {
            let compliance_ids: Vec<uuid::Uuid> = events
                .iter()
                .filter(|e| self.compliance_critical_actions.iter().any(|a| a == &e.action))
                .map(|e| e.id)
                .collect();

            if !compliance_ids.is_empty() {
                let pseudonym_id = self
                    .pseudonyms
                    .create_pseudonym(principal_id, PseudonymStrategy::Hash)
                    .await?;
                for event in events.iter().filter(|e| compliance_ids.contains(&e.id)) {
                    let mut details = event.details.clone();
                    details.insert("pseudonymized".to_string(), serde_json::json!(true));
                    details.insert("pseudonymizedAt".to_string(), serde_json::json!(Utc::now()));
                    let details_value = serde_json::to_value(&details)?;
                    self.repository
                        .update_principal_and_details(event.id, &pseudonym_id, &details_value)
                        .await?;
                }
            }

            let deleted = self
                .repository
                .delete_events_for_principal(principal_id, &compliance_ids)
                .await?;
            (compliance_ids.len() as u64, deleted)
        } else {
            let deleted = self.repository.delete_events_for_principal(principal_id, &[]).await?;
            (0, deleted)
        };

        let mut details = BTreeMap::new();
        details.insert("recordsDeleted".to_string(), serde_json::json!(erase_result));
        details.insert("complianceRecordsPreserved".to_string(), serde_json::json!(preserved));
        details.insert("requestedBy".to_string(), serde_json::json!(requested_by));
        self.audit_self("gdpr.data.delete", Some(principal_id), details).await?;

        Ok(ErasureResult { records_deleted: erase_result, compliance_records_preserved: preserved })
    }
}

fn render_json(events: &[AuditEvent], include_metadata: bool) -> Result<Vec<u8>> {
    let wrapper = if include_metadata {
        serde_json::json!({ "exportMetadata": {}, "auditLogs": events })
    } else {
        serde_json::json!({ "auditLogs": events })
    };
    Ok(serde_json::to_vec_pretty(&wrapper)?)
}

/// CSV per spec.md §4.7.1: header = union of keys in the first record;
/// values comma-separated; quoting/doubling delegated to the `csv`
/// crate, which already implements "quote only when necessary, double
/// inner quotes" (RFC 4180) — exactly this spec's rule.
fn render_csv(events: &[AuditEvent]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());

    if let Some(first) = events.first() {
        let first_value = serde_json::to_value(first)?;
        let keys: Vec<String> = match &first_value {
            serde_json::Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        };
        writer.write_record(&keys).map_err(|e| Error::internal(format!("csv header write failed: {e}")))?;

        for event in events {
            let value = serde_json::to_value(event)?;
            let row: Vec<String> = keys
                .iter()
                .map(|k| match value.get(k) {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                })
                .collect();
            writer.write_record(&row).map_err(|e| Error::internal(format!("csv row write failed: {e}")))?;
        }
    }

    writer.into_inner().map_err(|e| Error::internal(format!("csv flush failed: {e}")))
}

/// XML per spec.md §4.7.1: `<?xml ...?>` prologue, root `<gdprExport>`,
/// repeated `<auditLog>` children; escaping delegated to `quick_xml`.
fn render_xml(events: &[AuditEvent]) -> Result<Vec<u8>> {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<gdprExport>\n");

    for event in events {
        let value = serde_json::to_value(event)?;
        out.push_str("  <auditLog>\n");
        if let serde_json::Value::Object(map) = value {
            for (key, v) in map {
                let text = match v {
                    serde_json::Value::Null => String::new(),
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                let escaped = quick_xml::escape::escape(&text);
                out.push_str(&format!("    <{key}>{escaped}</{key}>\n"));
            }
        }
        out.push_str("  </auditLog>\n");
    }

    out.push_str("</gdprExport>\n");
    Ok(out.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventStatus;

    fn sample_event(principal: &str, action: &str) -> AuditEvent {
        let mut e = AuditEvent::new(action, EventStatus::Success).with_principal(principal);
        e.hash = Some(canonical::hash(&e).unwrap());
        e
    }

    #[test]
    fn csv_header_matches_first_record_keys() {
        let events = vec![sample_event("u1", "auth.login.success")];
        let csv_bytes = render_csv(&events).unwrap();
        let csv_text = String::from_utf8(csv_bytes).unwrap();
        let header = csv_text.lines().next().unwrap();
        assert!(header.contains("action"));
        assert!(header.contains("principalId"));
    }

    #[test]
    fn xml_escapes_reserved_characters() {
        let mut e = sample_event("u1", "auth.login.success");
        e.outcome_description = Some("a < b & c > d".to_string());
        let xml_bytes = render_xml(&[e]).unwrap();
        let xml_text = String::from_utf8(xml_bytes).unwrap();
        assert!(xml_text.contains("&lt;"));
        assert!(xml_text.contains("&amp;"));
        assert!(xml_text.contains("&gt;"));
    }

    #[test]
    fn json_wraps_events_under_audit_logs_key() {
        let events = vec![sample_event("u1", "auth.login.success")];
        let json_bytes = render_json(&events, false).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json_bytes).unwrap();
        assert!(value.get("auditLogs").is_some());
    }
}
