//! End-to-end scenarios over the run orchestrator: deterministic fallback,
//! valid and orphan citations, baseline enforcement, empty-plan preflight,
//! and the run-hash cache.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use dcs_assess::{
    AssessmentStatus, CoverageLevel, DeterministicFallbackProvider, FailureReason, ProviderRecord,
    ProviderStatus,
};
use dcs_core::ObligationCode;
use dcs_ingest::DocumentStore;
use dcs_integration_tests::{
    company_profile, esrs_mini_bundle, ingest_text_document, run_inputs, ScriptedProvider,
};
use dcs_run::{build_evidence_pack, execute_run, RunCache, RunError, RunStatus};
use tempfile::TempDir;

const THREE_PAGE_REPORT: &str = "We describe governance arrangements on this page.\x0c\
    The transition plan for climate change mitigation is described here.\x0c\
    Gross emissions were 1,250.5 tCO2e in 2026, down from 1,400 tCO2e in 2019.";

fn record(status: ProviderStatus) -> ProviderRecord {
    ProviderRecord {
        status,
        value: None,
        unit: None,
        year: None,
        baseline_year: None,
        baseline_value: None,
        evidence_chunk_ids: vec![],
        rationale: "scripted extraction".to_string(),
    }
}

// ── S1: deterministic fallback over known bytes ─────────────────────────────

#[tokio::test]
async fn s1_deterministic_fallback_over_known_bytes() {
    let dir = TempDir::new().unwrap();
    let store = DocumentStore::open(dir.path()).unwrap();
    let (doc_hash, chunks) = ingest_text_document(&store, THREE_PAGE_REPORT);

    let inputs = run_inputs(vec![esrs_mini_bundle()], chunks.clone(), vec![doc_hash.clone()]);
    let cache = RunCache::new();
    let cancel = AtomicBool::new(false);

    let output = execute_run(&inputs, &DeterministicFallbackProvider, &cache, &cancel)
        .await
        .expect("run completes");

    assert_eq!(output.status, RunStatus::Completed);
    assert!(!output.cache_hit);
    assert_eq!(output.assessments.len(), 2);
    for assessment in &output.assessments {
        assert_eq!(assessment.status, AssessmentStatus::Absent);
        assert_eq!(assessment.rationale, "Deterministic local execution fallback.");
        assert!(assessment.evidence_chunk_ids.is_empty());
    }
    // Datapoints assessed in plan order.
    assert_eq!(output.assessments[0].datapoint_key.as_str(), "ESRS-E1-1");
    assert_eq!(output.assessments[1].datapoint_key.as_str(), "ESRS-E1-6");

    // Manifest carries the pinned bundle checksum.
    assert_eq!(output.manifest.fingerprint.bundle_refs.len(), 1);
    assert_eq!(output.manifest.fingerprint.bundle_refs[0].bundle_id, "esrs_mini");
    assert_eq!(output.manifest.fingerprint.bundle_refs[0].checksum.len(), 64);
    assert!(!output.manifest.run_hash.is_empty());
    assert!(!output.manifest.plan_hash.is_empty());

    // Evidence archive entries, in exact lexicographic order.
    let archive = build_evidence_pack(&store, &output, &chunks).unwrap();
    let mut zip = zip::ZipArchive::new(std::io::Cursor::new(archive)).unwrap();
    let names: Vec<String> = (0..zip.len())
        .map(|i| zip.by_index(i).unwrap().name().to_string())
        .collect();
    assert_eq!(
        names,
        vec![
            "assessments.jsonl".to_string(),
            "compiled_plan.json".to_string(),
            "coverage_matrix.json".to_string(),
            format!("documents/{doc_hash}"),
            "evidence.jsonl".to_string(),
            "manifest.json".to_string(),
        ]
    );
}

// ── S2: Present with valid citation ─────────────────────────────────────────

#[tokio::test]
async fn s2_present_with_valid_citation() {
    let dir = TempDir::new().unwrap();
    let store = DocumentStore::open(dir.path()).unwrap();
    let (doc_hash, chunks) = ingest_text_document(&store, THREE_PAGE_REPORT);

    // Cite the page-2 chunk, which holds the transition plan narrative.
    let cited_id = chunks
        .iter()
        .find(|c| c.text.contains("transition plan"))
        .expect("transition plan chunk")
        .chunk_id
        .clone();

    let mut scripted = BTreeMap::new();
    let mut present = record(ProviderStatus::Present);
    present.evidence_chunk_ids = vec![cited_id.as_str().to_string()];
    scripted.insert("ESRS-E1-1".to_string(), present);
    // Leave ESRS-E1-6 unscripted: Absent.
    let provider = ScriptedProvider::new(scripted);

    let inputs = run_inputs(vec![esrs_mini_bundle()], chunks, vec![doc_hash]);
    let cache = RunCache::new();
    let cancel = AtomicBool::new(false);
    let output = execute_run(&inputs, &provider, &cache, &cancel).await.unwrap();

    let e1_1 = &output.assessments[0];
    assert_eq!(e1_1.datapoint_key.as_str(), "ESRS-E1-1");
    assert_eq!(e1_1.status, AssessmentStatus::Present);
    assert_eq!(e1_1.evidence_chunk_ids.len(), 1);
    assert_eq!(e1_1.evidence_chunk_ids[0], cited_id);

    // The obligation has a second mandatory datapoint (Absent), so coverage
    // is Partial — with only the one datapoint it would be Full.
    assert_eq!(
        output
            .coverage
            .level_for(&ObligationCode::new("ESRS-E1").unwrap()),
        Some(CoverageLevel::Partial)
    );
}

#[tokio::test]
async fn s2_single_datapoint_obligation_reaches_full() {
    let dir = TempDir::new().unwrap();
    let store = DocumentStore::open(dir.path()).unwrap();
    let (doc_hash, chunks) = ingest_text_document(&store, THREE_PAGE_REPORT);

    let mut bundle = esrs_mini_bundle();
    bundle.obligations[0].datapoints.truncate(1); // only ESRS-E1-1

    let cited = chunks
        .iter()
        .find(|c| c.text.contains("transition plan"))
        .unwrap();
    let mut scripted = BTreeMap::new();
    let mut present = record(ProviderStatus::Present);
    present.evidence_chunk_ids = vec![cited.chunk_id.as_str().to_string()];
    scripted.insert("ESRS-E1-1".to_string(), present);
    let provider = ScriptedProvider::new(scripted);

    let inputs = run_inputs(vec![bundle], chunks, vec![doc_hash]);
    let cache = RunCache::new();
    let cancel = AtomicBool::new(false);
    let output = execute_run(&inputs, &provider, &cache, &cancel).await.unwrap();

    assert_eq!(
        output
            .coverage
            .level_for(&ObligationCode::new("ESRS-E1").unwrap()),
        Some(CoverageLevel::Full)
    );
}

// ── S3: orphan citation downgrades ──────────────────────────────────────────

#[tokio::test]
async fn s3_orphan_citation_downgrades_to_absent() {
    let dir = TempDir::new().unwrap();
    let store = DocumentStore::open(dir.path()).unwrap();
    let (doc_hash, chunks) = ingest_text_document(&store, THREE_PAGE_REPORT);

    let mut scripted = BTreeMap::new();
    let mut orphan = record(ProviderStatus::Present);
    orphan.evidence_chunk_ids = vec!["DEADBEEF".to_string()];
    scripted.insert("ESRS-E1-1".to_string(), orphan);
    let provider = ScriptedProvider::new(scripted);

    let inputs = run_inputs(vec![esrs_mini_bundle()], chunks, vec![doc_hash]);
    let cache = RunCache::new();
    let cancel = AtomicBool::new(false);
    let output = execute_run(&inputs, &provider, &cache, &cancel).await.unwrap();

    let e1_1 = &output.assessments[0];
    assert_eq!(e1_1.status, AssessmentStatus::Absent);
    assert!(e1_1.rationale.contains("DEADBEEF"));

    let diagnostic = &output.diagnostics[0];
    assert_eq!(
        diagnostic.failure_reason_code,
        Some(FailureReason::ChunkNotFound)
    );
}

// ── S4: metric missing baseline ─────────────────────────────────────────────

#[tokio::test]
async fn s4_metric_missing_baseline_downgrades() {
    let dir = TempDir::new().unwrap();
    let store = DocumentStore::open(dir.path()).unwrap();
    let (doc_hash, chunks) = ingest_text_document(&store, THREE_PAGE_REPORT);

    let cited = chunks
        .iter()
        .find(|c| c.text.contains("1,250.5"))
        .expect("emissions chunk");

    let mut scripted = BTreeMap::new();
    let mut partial = record(ProviderStatus::Partial);
    partial.value = Some("1,250.5".to_string());
    partial.unit = Some("tCO2e".to_string());
    partial.year = Some(2026);
    partial.evidence_chunk_ids = vec![cited.chunk_id.as_str().to_string()];
    // No baseline, although ESRS-E1-6 requires one.
    scripted.insert("ESRS-E1-6".to_string(), partial);
    let provider = ScriptedProvider::new(scripted);

    let inputs = run_inputs(vec![esrs_mini_bundle()], chunks, vec![doc_hash]);
    let cache = RunCache::new();
    let cancel = AtomicBool::new(false);
    let output = execute_run(&inputs, &provider, &cache, &cancel).await.unwrap();

    let e1_6 = &output.assessments[1];
    assert_eq!(e1_6.datapoint_key.as_str(), "ESRS-E1-6");
    assert_eq!(e1_6.status, AssessmentStatus::Absent);

    let diagnostic = &output.diagnostics[1];
    assert_eq!(
        diagnostic.failure_reason_code,
        Some(FailureReason::BaselineMissing)
    );
}

// ── S5: empty plan fails before any provider call ───────────────────────────

#[tokio::test]
async fn s5_empty_plan_fails_before_provider_call() {
    let dir = TempDir::new().unwrap();
    let store = DocumentStore::open(dir.path()).unwrap();
    let (doc_hash, chunks) = ingest_text_document(&store, THREE_PAGE_REPORT);

    let mut bundle = esrs_mini_bundle();
    bundle.obligations[0].applicability = Some("company.employees > 100000".to_string());

    let provider = ScriptedProvider::new(BTreeMap::new());
    let calls = provider.call_counter();

    let inputs = run_inputs(vec![bundle], chunks, vec![doc_hash]);
    let cache = RunCache::new();
    let cancel = AtomicBool::new(false);
    match execute_run(&inputs, &provider, &cache, &cancel).await {
        Err(RunError::EmptyPlan { .. }) => {}
        other => panic!("expected EmptyPlan, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0, "no provider call may happen");
}

#[tokio::test]
async fn empty_corpus_fails_when_plan_exists() {
    let provider = ScriptedProvider::new(BTreeMap::new());
    let inputs = run_inputs(vec![esrs_mini_bundle()], vec![], vec![]);
    let cache = RunCache::new();
    let cancel = AtomicBool::new(false);
    match execute_run(&inputs, &provider, &cache, &cancel).await {
        Err(RunError::EmptyCorpus { .. }) => {}
        other => panic!("expected EmptyCorpus, got {other:?}"),
    }
}

// ── S6: cache hit ───────────────────────────────────────────────────────────

#[tokio::test]
async fn s6_cache_hit_returns_identical_outputs_without_provider_calls() {
    let dir = TempDir::new().unwrap();
    let store = DocumentStore::open(dir.path()).unwrap();
    let (doc_hash, chunks) = ingest_text_document(&store, THREE_PAGE_REPORT);

    let cache = RunCache::new();
    let cancel = AtomicBool::new(false);

    let inputs_first = run_inputs(
        vec![esrs_mini_bundle()],
        chunks.clone(),
        vec![doc_hash.clone()],
    );
    let first = execute_run(
        &inputs_first,
        &DeterministicFallbackProvider,
        &cache,
        &cancel,
    )
    .await
    .unwrap();
    assert!(!first.cache_hit);

    // Same inputs, different run id: the fingerprint matches.
    let inputs_second = run_inputs(vec![esrs_mini_bundle()], chunks.clone(), vec![doc_hash]);
    let second = execute_run(
        &inputs_second,
        &DeterministicFallbackProvider,
        &cache,
        &cancel,
    )
    .await
    .unwrap();
    assert!(second.cache_hit);
    assert_eq!(first.run_hash, second.run_hash);
    assert_eq!(first.assessments, second.assessments);
    assert_eq!(first.coverage, second.coverage);
    assert_eq!(first.manifest, second.manifest);

    // Archives are byte-identical.
    let archive_first = build_evidence_pack(&store, &first, &chunks).unwrap();
    let archive_second = build_evidence_pack(&store, &second, &chunks).unwrap();
    assert_eq!(archive_first, archive_second);
}

#[tokio::test]
async fn changed_profile_misses_the_cache() {
    let dir = TempDir::new().unwrap();
    let store = DocumentStore::open(dir.path()).unwrap();
    let (doc_hash, chunks) = ingest_text_document(&store, THREE_PAGE_REPORT);

    let cache = RunCache::new();
    let cancel = AtomicBool::new(false);

    let inputs = run_inputs(
        vec![esrs_mini_bundle()],
        chunks.clone(),
        vec![doc_hash.clone()],
    );
    let first = execute_run(&inputs, &DeterministicFallbackProvider, &cache, &cancel)
        .await
        .unwrap();

    let mut changed = run_inputs(vec![esrs_mini_bundle()], chunks, vec![doc_hash]);
    changed.profile = dcs_run::CompanyProfileSnapshot {
        employees: Some(751),
        ..company_profile()
    };
    let second = execute_run(&changed, &DeterministicFallbackProvider, &cache, &cancel)
        .await
        .unwrap();
    assert!(!second.cache_hit);
    assert_ne!(first.run_hash, second.run_hash);
}

// ── Cancellation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn pre_cancelled_run_fails_with_cancelled() {
    let dir = TempDir::new().unwrap();
    let store = DocumentStore::open(dir.path()).unwrap();
    let (doc_hash, chunks) = ingest_text_document(&store, THREE_PAGE_REPORT);

    let provider = ScriptedProvider::new(BTreeMap::new());
    let inputs = run_inputs(vec![esrs_mini_bundle()], chunks, vec![doc_hash]);
    let cache = RunCache::new();
    let cancel = AtomicBool::new(true);
    match execute_run(&inputs, &provider, &cache, &cancel).await {
        Err(RunError::Cancelled { assessments, .. }) => {
            assert!(assessments.is_empty());
        }
        other => panic!("expected Cancelled, got {other:?}"),
    }
}
