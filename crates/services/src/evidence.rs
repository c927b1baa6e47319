//! The evidence assembler.
//!
//! Gathers the ledger, lineage, audit and policy slices for a run, renders
//! the human report, and seals everything into a deterministic ZIP signed
//! with HMAC-SHA256 over the bundle hash. Object uploads precede the DB
//! row; on DB failure the uploads are compensated by best-effort removal.

use std::io::Write as _;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::json;
use sha2::Sha256;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use animus_api::identity::Actor;
use animus_api::report::ReportContext;
use animus_types::audit::{AuditEvent, LineageEvent, AUDIT_RESOURCE_WHITELIST};
use animus_types::codec::{self, sha256_hex};
use animus_types::error::{CoreError, UpstreamError};
use animus_types::evidence::{
    EvidenceBundle, EvidenceManifest, ManifestFile, EVIDENCE_MANIFEST_SCHEMA,
    EVIDENCE_SIGNATURE_ALG,
};
use animus_types::ids;
use animus_types::ledger::LedgerEntry;
use animus_types::policy::{Approval, PolicyDecision, PolicyVersion};

use crate::audit::audit_event;
use crate::ledger;
use crate::Core;

/// Bounded per-operation upload timeouts.
pub const BUNDLE_UPLOAD_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const REPORT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(2 * 60);
pub const ARTIFACT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// `ledger.json`: the one-element entry slice plus its transport checksum.
#[derive(Debug, Serialize)]
struct LedgerDoc {
    entries: Vec<LedgerEntry>,
    checksum: String,
}

#[derive(Debug, Serialize)]
struct LineageDoc {
    events: Vec<LineageEvent>,
}

#[derive(Debug, Serialize)]
struct AuditDoc {
    events: Vec<AuditEvent>,
}

#[derive(Debug, Serialize)]
struct PoliciesDoc {
    decisions: Vec<PolicyDecision>,
    approvals: Vec<Approval>,
    policy_versions: Vec<PolicyVersion>,
}

/// Signs a bundle hash: `base64url(HMAC-SHA256(secret, bundle_sha256))`.
pub fn sign(secret: &str, bundle_sha256: &str) -> Result<String, CoreError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| CoreError::Internal(format!("hmac key: {e}")))?;
    mac.update(bundle_sha256.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Verifies a bundle signature under the service secret.
pub fn verify_signature(secret: &str, bundle_sha256: &str, signature: &str) -> bool {
    sign(secret, bundle_sha256)
        .map(|expected| expected == signature)
        .unwrap_or(false)
}

fn json_pretty<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    serde_json::to_vec_pretty(value).map_err(|e| CoreError::Internal(format!("evidence doc: {e}")))
}

/// Writes the six bundle files into a deterministic ZIP: fixed file order,
/// fixed modification times, DEFLATE.
fn write_zip(files: &[(String, Vec<u8>)]) -> Result<Vec<u8>, CoreError> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());
    for (name, bytes) in files {
        writer
            .start_file(name, options)
            .map_err(|e| CoreError::Internal(format!("zip: {e}")))?;
        writer
            .write_all(bytes)
            .map_err(|e| CoreError::Internal(format!("zip: {e}")))?;
    }
    let cursor = writer
        .finish()
        .map_err(|e| CoreError::Internal(format!("zip: {e}")))?;
    Ok(cursor.into_inner())
}

fn content_type_for(name: &str) -> &'static str {
    if name.ends_with(".pdf") {
        "application/pdf"
    } else {
        "application/json"
    }
}

/// Builds, uploads and records an evidence bundle for a run.
pub async fn build_bundle(
    core: &Core,
    actor: &Actor,
    run_id: &str,
) -> Result<EvidenceBundle, CoreError> {
    let secret = core.config.evidence_signing_secret()?.to_string();

    let run = core
        .store
        .get_run(run_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("run {run_id}")))?;
    let entry = core
        .store
        .ledger_for_run(run_id)
        .await?
        .ok_or_else(|| CoreError::Conflict(format!("run {run_id} has no ledger entry")))?;
    let decisions = core.store.decisions_for_run(run_id).await?;
    let approvals = core.store.approvals_for_run(run_id).await?;
    let status = core.store.current_status(run_id).await?;

    // 1. Ledger slice + checksum.
    let entries = vec![entry.clone()];
    let ledger_doc = LedgerDoc {
        checksum: ledger::slice_checksum(&entries)?,
        entries,
    };

    // 2. Lineage touching the run.
    let lineage_doc = LineageDoc {
        events: core.store.lineage_touching(run_id).await?,
    };

    // 3. Audit events over the run's resource closure, restricted to the
    // whitelisted resource types.
    let mut resource_ids: Vec<String> = vec![
        run_id.to_string(),
        entry.execution_id.clone(),
        run.dataset_version_id.clone(),
    ];
    resource_ids.extend(decisions.iter().map(|d| d.decision_id.clone()));
    resource_ids.extend(approvals.iter().map(|a| a.approval_id.clone()));
    let audit_doc = AuditDoc {
        events: core
            .store
            .audit_for_resources(&resource_ids)
            .await?
            .into_iter()
            .filter(|e| AUDIT_RESOURCE_WHITELIST.contains(&e.resource_type.as_str()))
            .collect(),
    };

    // 4. Policy snapshot: decisions + approvals + referenced versions.
    let mut policy_versions = Vec::new();
    let mut seen = std::collections::BTreeSet::new();
    for decision in &decisions {
        if seen.insert(decision.policy_version_id.clone()) {
            if let Some(version) = core
                .store
                .policy_version(&decision.policy_version_id)
                .await?
            {
                policy_versions.push(version);
            }
        }
    }
    let policies_doc = PoliciesDoc {
        decisions: decisions.clone(),
        approvals: approvals.clone(),
        policy_versions,
    };

    // 5. The human report.
    let report_pdf = core
        .renderer
        .render(&ReportContext {
            run: run.clone(),
            status,
            decisions: decisions.clone(),
            approvals: approvals.clone(),
        })
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))?;

    // 6. Manifest over the payload files, sorted by name.
    let mut payload_files = vec![
        ("audit.json".to_string(), json_pretty(&audit_doc)?),
        ("ledger.json".to_string(), json_pretty(&ledger_doc)?),
        ("lineage.json".to_string(), json_pretty(&lineage_doc)?),
        ("policies.json".to_string(), json_pretty(&policies_doc)?),
        ("report.pdf".to_string(), report_pdf.clone()),
    ];
    payload_files.sort_by(|a, b| a.0.cmp(&b.0));
    let manifest = EvidenceManifest {
        schema: EVIDENCE_MANIFEST_SCHEMA.to_string(),
        run_id: run_id.to_string(),
        files: payload_files
            .iter()
            .map(|(name, bytes)| ManifestFile {
                name: name.clone(),
                sha256: sha256_hex(bytes),
                size_bytes: bytes.len() as u64,
                content_type: content_type_for(name).to_string(),
            })
            .collect(),
    };

    let mut files = payload_files;
    files.push(("manifest.json".to_string(), json_pretty(&manifest)?));
    files.sort_by(|a, b| a.0.cmp(&b.0));
    let zip_bytes = write_zip(&files)?;

    let bundle_sha256 = sha256_hex(&zip_bytes);
    let signature = sign(&secret, &bundle_sha256)?;

    let bundle_id = ids::new_id("evb");
    let bundle_object_key = format!("{}/evidence/{}/bundle.zip", run.artifacts_prefix, bundle_id);
    let report_object_key = format!("{}/evidence/{}/report.pdf", run.artifacts_prefix, bundle_id);

    // Uploads first; the DB row only ever points at blobs that exist.
    let bundle_size_bytes = zip_bytes.len() as u64;
    tokio::time::timeout(
        BUNDLE_UPLOAD_TIMEOUT,
        core.objects
            .put_object(&bundle_object_key, Bytes::from(zip_bytes), "application/zip"),
    )
    .await
    .map_err(|_| UpstreamError::ObjectStore("bundle upload timed out".into()))?
    .map_err(|e| UpstreamError::ObjectStore(e.to_string()))?;
    tokio::time::timeout(
        REPORT_UPLOAD_TIMEOUT,
        core.objects
            .put_object(&report_object_key, Bytes::from(report_pdf), "application/pdf"),
    )
    .await
    .map_err(|_| UpstreamError::ObjectStore("report upload timed out".into()))?
    .map_err(|e| UpstreamError::ObjectStore(e.to_string()))?;

    let now = Utc::now();
    let mut bundle = EvidenceBundle {
        bundle_id: bundle_id.clone(),
        run_id: run_id.to_string(),
        bundle_object_key: bundle_object_key.clone(),
        report_object_key: report_object_key.clone(),
        bundle_sha256,
        bundle_size_bytes,
        signature,
        signature_alg: EVIDENCE_SIGNATURE_ALG.to_string(),
        created_at: now,
        integrity_sha256: String::new(),
    };
    bundle.integrity_sha256 = codec::record_integrity(&bundle)?;

    let committed: Result<(), CoreError> = async {
        let mut tx = core.store.begin().await?;
        tx.insert_evidence_bundle(bundle.clone()).await?;
        // Deliberately audit-only: a lineage edge touching the run would
        // change what the next bundle build gathers, breaking rebuild
        // determinism for an unchanged run.
        tx.insert_audit_event(audit_event(
            &actor.subject,
            "evidence_bundle.created",
            "evidence_bundle",
            &bundle.bundle_id,
            json!({"run_id": run_id, "bundle_sha256": &bundle.bundle_sha256}),
            now,
        )?)
        .await?;
        tx.commit().await?;
        Ok(())
    }
    .await;

    if let Err(e) = committed {
        // Compensation: the system tolerates orphan blobs but we try not
        // to leave them behind.
        let _ = core.objects.delete_object(&bundle_object_key).await;
        let _ = core.objects.delete_object(&report_object_key).await;
        return Err(e);
    }

    tracing::info!(
        target: "evidence",
        run_id = %run_id,
        bundle_id = %bundle.bundle_id,
        size = bundle.bundle_size_bytes,
        "evidence bundle sealed"
    );
    Ok(bundle)
}
