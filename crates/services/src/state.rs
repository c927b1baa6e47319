//! The run state machine.
//!
//! State is reified as the append-only `RunStateEvent` log; the unique
//! `(run_id, status)` constraint in the store makes every transition write
//! idempotent and safe under concurrent writers. Two entry points:
//! [`transition`] enforces the legal edges and is used by the request
//! paths, [`project_observed`] is the reconciler's projection, which never
//! errors on a terminal run — it just declines to write.

use chrono::{DateTime, Utc};
use serde_json::Value;

use animus_api::store::StoreTx;
use animus_types::codec;
use animus_types::error::{CoreError, StateError};
use animus_types::ids;
use animus_types::run::{RunStateEvent, RunStatus};

/// Whether an edge is legal in the run state machine.
///
/// `None` is the implicit `created` state a run holds before any event.
pub fn is_legal(from: Option<RunStatus>, to: RunStatus) -> bool {
    use RunStatus::*;
    match (from, to) {
        // submission accepted, or pre-execution abort (policy denial)
        (None, Pending) | (None, Canceled) => true,
        // executor accepted / rejected / pre-execution abort
        (Some(Pending), Running) | (Some(Pending), Failed) | (Some(Pending), Canceled) => true,
        // driven by the reconciler from executor observations
        (Some(Running), Succeeded) | (Some(Running), Failed) => true,
        _ => false,
    }
}

fn sealed_event(
    run_id: &str,
    status: RunStatus,
    details: Option<Value>,
    at: DateTime<Utc>,
) -> Result<RunStateEvent, CoreError> {
    let mut event = RunStateEvent {
        state_id: ids::new_id("rse"),
        run_id: run_id.to_string(),
        status,
        observed_at: at,
        details,
        integrity_sha256: String::new(),
    };
    event.integrity_sha256 = codec::record_integrity(&event)?;
    Ok(event)
}

/// Applies a request-driven transition, failing with `invalid_transition`
/// on an illegal edge. Returns `false` when the event already existed.
pub async fn transition(
    tx: &mut dyn StoreTx,
    run_id: &str,
    to: RunStatus,
    details: Option<Value>,
    at: DateTime<Utc>,
) -> Result<bool, CoreError> {
    let from = tx.current_status(run_id).await?;
    if !is_legal(from, to) {
        return Err(StateError::InvalidTransition {
            from: from.map(|s| s.as_str().to_string()).unwrap_or_else(|| "created".into()),
            to: to.as_str().to_string(),
        }
        .into());
    }
    Ok(tx.append_state_event(sealed_event(run_id, to, details, at)?).await?)
}

/// Projects an executor observation into the log. Terminal runs are left
/// untouched; duplicate observations collapse on the unique constraint.
/// Returns `true` only when a new event was written.
pub async fn project_observed(
    tx: &mut dyn StoreTx,
    run_id: &str,
    to: RunStatus,
    details: Option<Value>,
    at: DateTime<Utc>,
) -> Result<bool, CoreError> {
    let from = tx.current_status(run_id).await?;
    if from.map(|s| s.is_terminal()).unwrap_or(false) {
        return Ok(false);
    }
    if from == Some(to) {
        return Ok(false);
    }
    Ok(tx.append_state_event(sealed_event(run_id, to, details, at)?).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_edges() {
        use RunStatus::*;
        assert!(is_legal(None, Pending));
        assert!(is_legal(None, Canceled));
        assert!(is_legal(Some(Pending), Running));
        assert!(is_legal(Some(Pending), Failed));
        assert!(is_legal(Some(Pending), Canceled));
        assert!(is_legal(Some(Running), Succeeded));
        assert!(is_legal(Some(Running), Failed));

        assert!(!is_legal(None, Running));
        assert!(!is_legal(Some(Running), Pending));
        assert!(!is_legal(Some(Succeeded), Failed));
        assert!(!is_legal(Some(Canceled), Pending));
    }
}
