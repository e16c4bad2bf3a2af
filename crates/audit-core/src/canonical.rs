//! Deterministic canonicalization and SHA-256 hashing of audit events.
//!
//! Canonicalization removes `hash` and `archivedAt`, orders all object keys
//! lexicographically (recursively), keeps array order as-is, and represents
//! numbers in their shortest round-trip decimal form. Two events with the
//! same logical content always canonicalize to identical bytes regardless
//! of field insertion order — this is what makes hashes comparable across
//! producers and across time (spec.md §4.1, tested in §8 as "key-order
//! permutations produce identical hashes").

use crate::error::{Error, ErrorCode, Result};
use crate::model::AuditEvent;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const EXCLUDED_FIELDS: [&str; 2] = ["hash", "archivedAt"];

/// Produces the canonical byte form of a JSON value: object keys sorted
/// lexicographically at every level, arrays left in insertion order.
fn canonicalize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: BTreeMap<String, Value> = BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k.clone(), canonicalize_value(v));
            }
            let mut ordered = serde_json::Map::new();
            for (k, v) in sorted {
                ordered.insert(k, v);
            }
            Value::Object(ordered)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize_value).collect()),
        other => other.clone(),
    }
}

/// Serializes an event to its canonical JSON representation, minus the
/// fields excluded from the hash domain.
fn canonical_json(event: &AuditEvent) -> Result<Value> {
    let mut value = serde_json::to_value(event).map_err(|e| {
        Error::new(ErrorCode::InvalidEvent, format!("event is not serializable: {e}"))
    })?;

    if let Value::Object(map) = &mut value {
        for field in EXCLUDED_FIELDS {
            map.remove(field);
        }
    }

    Ok(canonicalize_value(&value))
}

/// Serializes the canonical form to bytes using serde_json's compact
/// writer. `BTreeMap`/sorted-`Map` ordering plus serde_json's own
/// shortest-round-trip float formatting gives us the byte-exactness
/// spec.md §4.1 requires.
fn canonical_bytes(event: &AuditEvent) -> Result<Vec<u8>> {
    let value = canonical_json(event)?;
    serde_json::to_vec(&value)
        .map_err(|e| Error::new(ErrorCode::InvalidEvent, format!("canonicalization failed: {e}")))
}

/// Computes the lowercase hex SHA-256 digest of an event's canonical form.
///
/// Fails with `InvalidEvent` if required fields (`action`, `status`) are
/// missing — in practice this can only happen if the caller bypasses
/// `AuditEvent::new`, since the struct's own fields are non-optional for
/// those two.
pub fn hash(event: &AuditEvent) -> Result<String> {
    if event.action.is_empty() {
        return Err(Error::new(ErrorCode::InvalidEvent, "action is required"));
    }
    if event.action.len() > 255 {
        return Err(Error::new(
            ErrorCode::InvalidEvent,
            "action exceeds the 255 character limit",
        ));
    }

    let bytes = canonical_bytes(event)?;
    let digest = Sha256::digest(&bytes);
    Ok(hex::encode(digest))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Ok,
    Mismatch { recomputed: String },
    MissingHash,
}

/// Recomputes the hash and compares it against the stored one. Any
/// formatting difference that alters bytes causes a mismatch — this is a
/// testable property, not an implementation detail. An event with no
/// stored hash yields `MissingHash` rather than an error, since the
/// integrity verifier (§4.6) must tally it into a batch summary without
/// aborting the sweep.
pub fn verify(event: &AuditEvent) -> Result<VerifyOutcome> {
    let Some(expected) = event.hash.as_deref() else {
        return Ok(VerifyOutcome::MissingHash);
    };
    let recomputed = hash(event)?;
    Ok(if recomputed == expected {
        VerifyOutcome::Ok
    } else {
        VerifyOutcome::Mismatch { recomputed }
    })
}

/// Minimal hex encoder so `audit-core` doesn't need a dedicated `hex`
/// crate dependency beyond what `sha2`'s ecosystem already implies.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for byte in bytes.as_ref() {
            write!(s, "{byte:02x}").expect("writing to a String never fails");
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventStatus;
    use serde_json::json;

    fn sample_event() -> AuditEvent {
        let mut e = AuditEvent::new("auth.login.success", EventStatus::Success)
            .with_principal("u1")
            .with_detail("ip", json!("10.0.0.1"))
            .with_detail("method", json!("password"));
        e.id = uuid::Uuid::nil();
        e.timestamp = chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        e
    }

    #[test]
    fn hash_is_stable_for_identical_content() {
        let a = sample_event();
        let b = sample_event();
        assert_eq!(hash(&a).unwrap(), hash(&b).unwrap());
    }

    #[test]
    fn key_order_does_not_affect_hash() {
        let mut a = sample_event();
        let mut b = sample_event();
        a.details.insert("z".into(), json!(1));
        a.details.insert("a".into(), json!(2));
        b.details.insert("a".into(), json!(2));
        b.details.insert("z".into(), json!(1));
        assert_eq!(hash(&a).unwrap(), hash(&b).unwrap());
    }

    #[test]
    fn hash_excludes_archived_at() {
        let mut a = sample_event();
        let b = sample_event();
        a.archived_at = Some(chrono::Utc::now());
        assert_eq!(hash(&a).unwrap(), hash(&b).unwrap());
    }

    #[test]
    fn verify_detects_tampering() {
        let mut e = sample_event();
        e.hash = Some(hash(&e).unwrap());
        assert_eq!(verify(&e).unwrap(), VerifyOutcome::Ok);

        e.outcome_description = Some("tampered".to_string());
        assert!(matches!(verify(&e).unwrap(), VerifyOutcome::Mismatch { .. }));
    }

    #[test]
    fn verify_reports_missing_hash_without_erroring() {
        let e = sample_event();
        assert_eq!(verify(&e).unwrap(), VerifyOutcome::MissingHash);
    }

    #[test]
    fn missing_action_is_invalid() {
        let mut e = sample_event();
        e.action = String::new();
        assert!(matches!(hash(&e), Err(err) if err.code == ErrorCode::InvalidEvent));
    }
}
