//! # Run Fingerprint
//!
//! The run hash is the canonical SHA-256 over every input that can influence
//! a run's outputs: document hashes, the company profile snapshot, the
//! materiality snapshot, pinned bundle references, compiler mode, retrieval
//! parameters, provider identity, prompt template version, and code version.
//!
//! Nothing ambient participates: every field arrives explicitly, and the
//! same structure is captured in the manifest so a consumer can re-derive
//! the hash from the manifest alone.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dcs_assess::ProviderIdentity;
use dcs_core::{sha256_digest, CanonicalBytes, CanonicalizationError};
use dcs_ingest::ChunkParams;
use dcs_regulatory::{BundleRef, CompanyContext};
use dcs_retrieval::RetrievalPolicy;

/// Snapshot of the company profile as it entered the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfileSnapshot {
    /// Company display name.
    pub name: String,
    /// Headcount.
    pub employees: Option<i64>,
    /// Annual turnover.
    pub turnover: Option<f64>,
    /// Listed on a regulated market.
    pub listed_status: Option<bool>,
    /// Reporting year under assessment.
    pub reporting_year: Option<i64>,
    /// Reporting period start (ISO date).
    pub reporting_year_start: Option<String>,
    /// Reporting period end (ISO date).
    pub reporting_year_end: Option<String>,
    /// Jurisdictions the company operates in, sorted.
    pub jurisdictions: Vec<String>,
    /// Regimes the company declares itself in scope for, sorted.
    pub regimes: Vec<String>,
}

impl CompanyProfileSnapshot {
    /// Build the evaluator context from this snapshot.
    pub fn context(&self) -> CompanyContext {
        CompanyContext {
            employees: self.employees,
            turnover: self.turnover,
            listed_status: self.listed_status,
            reporting_year: self.reporting_year,
            reporting_year_start: self.reporting_year_start.clone(),
            reporting_year_end: self.reporting_year_end.clone(),
            jurisdictions: self.jurisdictions.clone(),
        }
    }
}

/// Retrieval parameters in force for a run. Recorded in every assessment
/// and in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalParams {
    /// Retrieved chunks per datapoint.
    pub top_k: usize,
    /// Query construction mode.
    pub query_mode: String,
    /// The hybrid scoring policy.
    pub policy: RetrievalPolicy,
    /// Chunking parameters the index was built with.
    pub chunk_params: ChunkParams,
}

impl RetrievalParams {
    /// Default parameters: hybrid retrieval, top 5, default chunking.
    pub fn new(top_k: usize, policy: RetrievalPolicy, chunk_params: ChunkParams) -> Self {
        Self {
            top_k,
            query_mode: "hybrid".to_string(),
            policy,
            chunk_params,
        }
    }
}

/// The full fingerprint input set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFingerprint {
    /// Hashes of every document in the company's linked scope, sorted.
    pub document_hashes: Vec<String>,
    /// Company profile snapshot.
    pub company_profile: CompanyProfileSnapshot,
    /// Materiality snapshot: topic → is material.
    pub materiality: BTreeMap<String, bool>,
    /// Bundles pinned by `(bundle_id, version, checksum)`, sorted.
    pub bundle_refs: Vec<BundleRef>,
    /// Compiler mode.
    pub compiler_mode: String,
    /// Retrieval parameters.
    pub retrieval_params: RetrievalParams,
    /// Provider identity (name + model + prompt template fingerprint).
    pub provider_identity: ProviderIdentity,
    /// Prompt template version.
    pub prompt_template_version: String,
    /// Code version (git SHA) of the pipeline.
    pub code_version: String,
}

impl RunFingerprint {
    /// Compute the canonical run hash.
    pub fn run_hash(&self) -> Result<String, CanonicalizationError> {
        let mut normalized = self.clone();
        normalized.document_hashes.sort();
        normalized.bundle_refs.sort();
        let canonical = CanonicalBytes::new(&normalized)?;
        Ok(sha256_digest(&canonical).to_hex())
    }
}
