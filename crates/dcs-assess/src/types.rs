//! # Assessment Types
//!
//! The persisted record types of the assessment loop: statuses, assessments,
//! and per-datapoint diagnostics. Serialization shapes here are part of the
//! external contract (evidence packs, cache entries, API responses), so
//! field names and enum spellings are stable.

use serde::{Deserialize, Serialize};

use dcs_core::{ChunkId, DatapointKey, DocHash};

/// Terminal status of one datapoint assessment.
///
/// `NeedsReview` is reserved for verifier-injected cases; providers cannot
/// emit it (their status vocabulary is [`crate::provider::ProviderStatus`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssessmentStatus {
    /// The disclosure is present with cited evidence.
    Present,
    /// The disclosure is partially present with cited evidence.
    Partial,
    /// The disclosure is absent.
    Absent,
    /// The datapoint is not applicable to this company.
    #[serde(rename = "NA")]
    NotApplicable,
    /// Verification could not settle the verdict; human review required.
    #[serde(rename = "Needs-Review")]
    NeedsReview,
}

impl AssessmentStatus {
    /// String form used in reports and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Partial => "Partial",
            Self::Absent => "Absent",
            Self::NotApplicable => "NA",
            Self::NeedsReview => "Needs-Review",
        }
    }

    /// Whether this status requires cited evidence to persist.
    pub fn requires_evidence(&self) -> bool {
        matches!(self, Self::Present | Self::Partial)
    }
}

impl std::fmt::Display for AssessmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted datapoint assessment.
///
/// Invariant: `status ∈ {Present, Partial}` implies `evidence_chunk_ids` is
/// non-empty and every listed chunk exists with non-empty text. The
/// verification engine enforces this before anything is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    /// Datapoint the verdict is for.
    pub datapoint_key: DatapointKey,
    /// Terminal status.
    pub status: AssessmentStatus,
    /// Extracted value, for metric datapoints.
    pub value: Option<String>,
    /// Extracted unit, for metric datapoints.
    pub unit: Option<String>,
    /// Extracted year, for metric datapoints.
    pub year: Option<i32>,
    /// Rationale, including any verification downgrade detail.
    pub rationale: String,
    /// Cited evidence chunks, sorted ascending.
    pub evidence_chunk_ids: Vec<ChunkId>,
    /// Hash of the exact prompt this assessment was extracted with.
    pub prompt_hash: String,
    /// Snapshot of the retrieval parameters in force.
    pub retrieval_params: serde_json::Value,
}

/// Machine-readable reason a verification check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// A cited chunk does not exist.
    ChunkNotFound,
    /// A cited chunk exists but has empty text.
    EmptyChunk,
    /// The extracted numeric value does not appear in the cited evidence.
    NumericMismatch,
    /// A required baseline year/value pair is missing.
    BaselineMissing,
    /// The declared unit is outside the controlled vocabulary.
    UnitMismatch,
    /// A metric datapoint carries no year.
    YearMissing,
}

impl FailureReason {
    /// String form used in diagnostics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChunkNotFound => "CHUNK_NOT_FOUND",
            Self::EmptyChunk => "EMPTY_CHUNK",
            Self::NumericMismatch => "NUMERIC_MISMATCH",
            Self::BaselineMissing => "BASELINE_MISSING",
            Self::UnitMismatch => "UNIT_MISMATCH",
            Self::YearMissing => "YEAR_MISSING",
        }
    }
}

/// How verification concluded for a datapoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// All checks passed (or none applied).
    Verified,
    /// One or more checks failed; the status was downgraded.
    Downgraded,
    /// Present/Partial arrived with no citations and was gated to Absent
    /// before verification.
    EvidenceGated,
    /// The provider response violated the output schema.
    SchemaViolation,
    /// The provider could not be reached within the retry budget.
    ProviderFailure,
}

/// One ranked retrieval candidate, recorded so the exact retrieval state of
/// a datapoint is replayable from diagnostics alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalTraceEntry {
    /// 1-based rank in the retrieval ordering.
    pub rank: u32,
    /// Chunk identifier.
    pub chunk_id: ChunkId,
    /// Owning document.
    pub doc_hash: DocHash,
    /// 1-based page number.
    pub page_number: u32,
    /// Start character offset.
    pub start_offset: usize,
    /// End character offset (exclusive).
    pub end_offset: usize,
    /// Lexical score.
    pub lexical_score: f64,
    /// Vector score.
    pub vector_score: f64,
    /// Combined score.
    pub combined_score: f64,
}

/// Per-datapoint diagnostic persisted alongside the assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionDiagnostic {
    /// Datapoint the diagnostic is for.
    pub datapoint_key: DatapointKey,
    /// Chunk ids retrieved for the prompt, in retrieval order.
    pub retrieved_chunk_ids: Vec<ChunkId>,
    /// Full ranked candidate trace.
    pub candidates: Vec<RetrievalTraceEntry>,
    /// Count of numeric tokens matched in cited evidence.
    pub numeric_matches_found: u32,
    /// How verification concluded.
    pub verification_status: VerificationStatus,
    /// Primary failure reason, if any check failed.
    pub failure_reason_code: Option<FailureReason>,
    /// Every failure reason, in check order.
    pub failure_reasons: Vec<FailureReason>,
}
