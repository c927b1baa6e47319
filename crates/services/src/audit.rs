//! Constructors for the append-only audit and lineage records.
//!
//! Every mutating transaction in the core goes through these helpers so no
//! write path can forget the integrity hash.

use chrono::{DateTime, Utc};
use serde_json::Value;

use animus_types::audit::{AuditEvent, LineageEvent};
use animus_types::codec;
use animus_types::error::CoreError;
use animus_types::ids;

/// Builds a sealed audit event.
pub fn audit_event(
    actor_subject: &str,
    action: &str,
    resource_type: &str,
    resource_id: &str,
    payload: Value,
    at: DateTime<Utc>,
) -> Result<AuditEvent, CoreError> {
    let mut event = AuditEvent {
        audit_id: ids::new_id("aud"),
        actor_subject: actor_subject.to_string(),
        action: action.to_string(),
        resource_type: resource_type.to_string(),
        resource_id: resource_id.to_string(),
        payload,
        created_at: at,
        integrity_sha256: String::new(),
    };
    event.integrity_sha256 = codec::record_integrity(&event)?;
    Ok(event)
}

/// Builds a sealed lineage event.
pub fn lineage_event(
    subject_type: &str,
    subject_id: &str,
    predicate: &str,
    object_type: &str,
    object_id: &str,
    payload: Value,
    at: DateTime<Utc>,
) -> Result<LineageEvent, CoreError> {
    let mut event = LineageEvent {
        lineage_id: ids::new_id("lin"),
        subject_type: subject_type.to_string(),
        subject_id: subject_id.to_string(),
        predicate: predicate.to_string(),
        object_type: object_type.to_string(),
        object_id: object_id.to_string(),
        payload,
        created_at: at,
        integrity_sha256: String::new(),
    };
    event.integrity_sha256 = codec::record_integrity(&event)?;
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_are_sealed() {
        let e = audit_event("u1", "experiment_run.submit", "experiment_run", "r1", json!({}), Utc::now())
            .unwrap();
        assert_eq!(e.integrity_sha256.len(), 64);
        assert_eq!(e.integrity_sha256, codec::record_integrity(&e).unwrap());
    }
}
