//! Evidence bundle assembly: determinism, manifest integrity and the HMAC
//! signature chain.

mod support;

use std::io::Read as _;

use animus_api::executor::ObservedStatus;
use animus_api::identity::Actor;
use animus_api::object_store::ObjectStore;
use animus_api::store::MetaStore;
use animus_services::reconciler::Reconciler;
use animus_services::{evidence, orchestrator};
use animus_types::codec::sha256_hex;
use animus_types::error::ErrorCode;
use animus_types::evidence::EvidenceManifest;
use animus_types::execution::ExecutorKind;

use support::*;

fn researcher() -> Actor {
    Actor::new("alice").with_roles(&["researcher"])
}

async fn completed_run(h: &Harness) -> String {
    let outcome = orchestrator::submit(
        &h.core,
        &researcher(),
        submit_request(&format!("ghcr.io/acme/train@{DIGEST_A}")),
    )
    .await
    .unwrap();
    let run_id = match outcome {
        orchestrator::SubmitOutcome::Started { run, .. } => run.run_id,
        other => panic!("expected Started, got {other:?}"),
    };
    h.executor.push_observation(ObservedStatus::Succeeded).await;
    Reconciler::new(h.core.clone(), ExecutorKind::Docker)
        .tick()
        .await
        .unwrap();
    run_id
}

#[tokio::test]
async fn bundle_verifies_end_to_end() {
    let h = harness();
    let run_id = completed_run(&h).await;
    let admin = Actor::new("carol").with_roles(&["admin"]);

    let bundle = evidence::build_bundle(&h.core, &admin, &run_id).await.unwrap();
    assert_eq!(bundle.signature_alg, "hmac-sha256");

    // Download the ZIP and recompute the hash chain.
    let zip_bytes = h.objects.get_object(&bundle.bundle_object_key).await.unwrap();
    assert_eq!(sha256_hex(&zip_bytes), bundle.bundle_sha256);
    assert_eq!(zip_bytes.len() as u64, bundle.bundle_size_bytes);
    assert!(evidence::verify_signature(
        EVIDENCE_SECRET,
        &bundle.bundle_sha256,
        &bundle.signature
    ));
    assert!(!evidence::verify_signature(
        "wrong-secret",
        &bundle.bundle_sha256,
        &bundle.signature
    ));

    // The ZIP contains exactly the six files.
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(zip_bytes.to_vec())).unwrap();
    let mut names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "audit.json",
            "ledger.json",
            "lineage.json",
            "manifest.json",
            "policies.json",
            "report.pdf"
        ]
    );

    // Manifest entries match the hashes of the embedded files.
    let mut manifest_bytes = Vec::new();
    archive
        .by_name("manifest.json")
        .unwrap()
        .read_to_end(&mut manifest_bytes)
        .unwrap();
    let manifest: EvidenceManifest = serde_json::from_slice(&manifest_bytes).unwrap();
    assert_eq!(manifest.schema, "animus.evidence_bundle.v1");
    assert_eq!(manifest.run_id, run_id);
    assert_eq!(manifest.files.len(), 5);
    let sorted: Vec<_> = manifest.files.iter().map(|f| f.name.clone()).collect();
    let mut expected = sorted.clone();
    expected.sort();
    assert_eq!(sorted, expected, "manifest files must be sorted by name");

    for file in &manifest.files {
        let mut bytes = Vec::new();
        archive
            .by_name(&file.name)
            .unwrap()
            .read_to_end(&mut bytes)
            .unwrap();
        assert_eq!(sha256_hex(&bytes), file.sha256, "hash mismatch for {}", file.name);
        assert_eq!(bytes.len() as u64, file.size_bytes);
    }

    // ledger.json carries the slice checksum contract.
    let mut ledger_bytes = Vec::new();
    archive
        .by_name("ledger.json")
        .unwrap()
        .read_to_end(&mut ledger_bytes)
        .unwrap();
    let ledger_doc: serde_json::Value = serde_json::from_slice(&ledger_bytes).unwrap();
    let entries = ledger_doc["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        ledger_doc["checksum"],
        animus_services::ledger::slice_checksum(entries).unwrap()
    );
}

#[tokio::test]
async fn two_builds_of_the_same_state_agree_on_the_manifest() {
    let h = harness();
    let run_id = completed_run(&h).await;
    let admin = Actor::new("carol").with_roles(&["admin"]);

    let first = evidence::build_bundle(&h.core, &admin, &run_id).await.unwrap();
    let second = evidence::build_bundle(&h.core, &admin, &run_id).await.unwrap();

    let read_manifest = |key: &str| {
        let objects = h.objects.clone();
        let key = key.to_string();
        async move {
            let bytes = objects.get_object(&key).await.unwrap();
            let mut archive =
                zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
            let mut manifest = Vec::new();
            archive
                .by_name("manifest.json")
                .unwrap()
                .read_to_end(&mut manifest)
                .unwrap();
            manifest
        }
    };

    // Byte-identical manifests; the payload hashes are deterministic even
    // though the second build happened later.
    assert_eq!(
        read_manifest(&first.bundle_object_key).await,
        read_manifest(&second.bundle_object_key).await
    );
}

#[tokio::test]
async fn unledgered_runs_cannot_be_bundled() {
    let h = harness();
    let admin = Actor::new("carol").with_roles(&["admin"]);

    let err = evidence::build_bundle(&h.core, &admin, "run_missing")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn missing_signing_secret_surfaces_not_configured() {
    let mut h = harness();
    let mut config = (*h.core.config).clone();
    config.evidence_signing_secret = None;
    h.core.config = std::sync::Arc::new(config);

    let run_id = completed_run(&h).await;
    let admin = Actor::new("carol").with_roles(&["admin"]);
    let err = evidence::build_bundle(&h.core, &admin, &run_id).await.unwrap_err();
    assert_eq!(err.code(), "evidence_signing_secret_not_configured");
}
