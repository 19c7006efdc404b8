//! # dcs-integration-tests — Shared Scenario Fixtures
//!
//! Fixture builders and a scripted provider used by the cross-crate
//! scenario and property suites under `tests/`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use dcs_assess::{
    ExtractionPrompt, ExtractionProvider, ProviderError, ProviderIdentity, ProviderRecord,
    ProviderStatus, PROMPT_TEMPLATE_VERSION,
};
use dcs_core::DocHash;
use dcs_ingest::{chunk_pages, extract_pages, ChunkParams, DocumentStore};
use dcs_regulatory::Bundle;
use dcs_retrieval::IndexedChunk;
use dcs_run::{CompanyProfileSnapshot, RunConfig, RunInputs};

/// The `esrs_mini@2026.01` fixture bundle: one obligation with a narrative
/// and a baseline-required metric datapoint.
pub fn esrs_mini_bundle() -> Bundle {
    serde_json::from_value(serde_json::json!({
        "regime": "CSRD",
        "bundle_id": "esrs_mini",
        "version": "2026.01",
        "jurisdiction": "EU",
        "obligations": [{
            "obligation_code": "ESRS-E1",
            "title": "Climate change",
            "standard_reference": "ESRS E1",
            "section": "E1",
            "datapoints": [
                {
                    "datapoint_key": "ESRS-E1-1",
                    "title": "Transition plan for climate change mitigation",
                    "disclosure_reference": "ESRS E1-1"
                },
                {
                    "datapoint_key": "ESRS-E1-6",
                    "title": "Gross Scopes 1 2 3 and Total GHG emissions",
                    "disclosure_reference": "ESRS E1-6",
                    "datapoint_type": "metric",
                    "requires_baseline": true
                }
            ]
        }]
    }))
    .expect("fixture bundle is valid")
}

/// A CSRD-in-scope EU company profile for reporting year 2026.
pub fn company_profile() -> CompanyProfileSnapshot {
    CompanyProfileSnapshot {
        name: "Acme Renewables".to_string(),
        employees: Some(750),
        turnover: Some(45_000_000.0),
        listed_status: Some(true),
        reporting_year: Some(2026),
        reporting_year_start: Some("2026-01-01".to_string()),
        reporting_year_end: Some("2026-12-31".to_string()),
        jurisdictions: vec!["EU".to_string()],
        regimes: vec!["CSRD".to_string()],
    }
}

/// Ingest a plain-text document (form-feed paged) into a store and return
/// its hash plus indexed chunks.
pub fn ingest_text_document(
    store: &DocumentStore,
    text: &str,
) -> (DocHash, Vec<IndexedChunk>) {
    let bytes = text.as_bytes();
    let (doc_hash, _) = store.put(bytes).expect("store put");
    let pages = extract_pages(bytes, "text/plain").expect("extract");
    let chunks = chunk_pages(&doc_hash, &pages, &ChunkParams::default()).expect("chunk");
    let indexed = chunks
        .into_iter()
        .map(|c| IndexedChunk {
            chunk_id: c.chunk_id,
            doc_hash: c.doc_hash,
            page_number: c.page_number,
            start_offset: c.start_offset,
            end_offset: c.end_offset,
            text: c.text,
            embedding: None,
        })
        .collect();
    (doc_hash, indexed)
}

/// Build run inputs for the fixture company over the given corpus.
pub fn run_inputs(
    bundles: Vec<Bundle>,
    chunks: Vec<IndexedChunk>,
    document_hashes: Vec<DocHash>,
) -> RunInputs {
    RunInputs {
        run_id: Uuid::new_v4(),
        tenant: dcs_core::TenantId::new("tenant-1").expect("tenant"),
        company_id: Uuid::new_v4(),
        profile: company_profile(),
        materiality: BTreeMap::new(),
        bundles,
        compiler_mode: dcs_regulatory::CompilerMode::Registry,
        chunks,
        document_hashes,
        config: RunConfig {
            code_version: "test-sha".to_string(),
            ..RunConfig::default()
        },
    }
}

/// Provider that replays scripted records per datapoint key and counts
/// calls, so tests can assert "no provider call happened".
pub struct ScriptedProvider {
    records: BTreeMap<String, ProviderRecord>,
    calls: Arc<AtomicU32>,
}

impl ScriptedProvider {
    /// Create a provider replaying the given records. Datapoints without a
    /// script entry get `Absent`.
    pub fn new(records: BTreeMap<String, ProviderRecord>) -> Self {
        Self {
            records,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Handle to the call counter.
    pub fn call_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl ExtractionProvider for ScriptedProvider {
    fn identity(&self) -> ProviderIdentity {
        ProviderIdentity {
            name: "scripted-test".to_string(),
            model: "scripted-v1".to_string(),
            prompt_template_version: PROMPT_TEMPLATE_VERSION.to_string(),
        }
    }

    async fn extract(&self, prompt: &ExtractionPrompt) -> Result<ProviderRecord, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .records
            .get(prompt.datapoint_key.as_str())
            .cloned()
            .unwrap_or(ProviderRecord {
                status: ProviderStatus::Absent,
                value: None,
                unit: None,
                year: None,
                baseline_year: None,
                baseline_value: None,
                evidence_chunk_ids: vec![],
                rationale: "not scripted".to_string(),
            }))
    }
}
