//! # Extraction Adapter
//!
//! Drives one datapoint through the provider: build the retrieval query,
//! compose the prompt, call the provider, and enforce the pre-persistence
//! evidence gate. Verification runs after this adapter; the gate here only
//! guarantees that a Present/Partial record with zero citations can never
//! continue as Present/Partial.

use std::time::Duration;

use thiserror::Error;

use dcs_core::CanonicalizationError;
use dcs_regulatory::CompiledDatapoint;
use dcs_retrieval::RetrievalResult;

use crate::prompt::ExtractionPrompt;
use crate::provider::{ExtractionProvider, ProviderError, ProviderRecord, ProviderStatus};

/// Adapter failures for one datapoint.
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// Provider failure (schema, transport, status).
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The provider call exceeded the hard per-datapoint timeout.
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),

    /// Prompt hashing failed.
    #[error("prompt canonicalization failed: {0}")]
    Canonicalization(#[from] CanonicalizationError),
}

/// Result of a successful extraction call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionOutcome {
    /// The provider record, after evidence gating.
    pub record: ProviderRecord,
    /// Hash of the prompt that produced it.
    pub prompt_hash: String,
    /// Whether the evidence gate downgraded the record.
    pub gated: bool,
}

/// Deterministic retrieval query for a datapoint: title and disclosure
/// reference concatenated.
pub fn build_query(datapoint: &CompiledDatapoint) -> String {
    if datapoint.disclosure_reference.is_empty() {
        datapoint.title.clone()
    } else {
        format!("{} {}", datapoint.title, datapoint.disclosure_reference)
    }
}

/// Apply the pre-persistence evidence gate.
///
/// `status ∈ {Present, Partial}` with empty `evidence_chunk_ids` downgrades
/// to `Absent` with reason `EVIDENCE_MISSING` noted in the rationale.
pub fn apply_evidence_gate(mut record: ProviderRecord) -> (ProviderRecord, bool) {
    let claims_evidence =
        matches!(record.status, ProviderStatus::Present | ProviderStatus::Partial);
    if claims_evidence && record.evidence_chunk_ids.is_empty() {
        record.status = ProviderStatus::Absent;
        record.rationale = format!(
            "{} Downgraded to Absent: EVIDENCE_MISSING (no evidence chunks cited).",
            record.rationale
        );
        return (record, true);
    }
    (record, false)
}

/// Run the full extraction for one datapoint under a hard timeout.
pub async fn run_extraction(
    provider: &dyn ExtractionProvider,
    datapoint: &CompiledDatapoint,
    retrieved: &[RetrievalResult],
    timeout: Duration,
) -> Result<ExtractionOutcome, ExtractionError> {
    let prompt = ExtractionPrompt::build(datapoint, retrieved);
    let prompt_hash = prompt.hash()?;

    let record = match tokio::time::timeout(timeout, provider.extract(&prompt)).await {
        Ok(result) => result?,
        Err(_) => return Err(ExtractionError::Timeout(timeout)),
    };

    let (record, gated) = apply_evidence_gate(record);
    if gated {
        tracing::warn!(
            datapoint_key = %datapoint.datapoint_key,
            "evidence gate downgraded ungrounded Present/Partial to Absent"
        );
    }

    Ok(ExtractionOutcome {
        record,
        prompt_hash,
        gated,
    })
}
