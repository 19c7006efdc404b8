//! # dcs-assess — Datapoint Assessment
//!
//! The middle of the pipeline: turning retrieved chunks into verified,
//! evidence-gated assessments.
//!
//! - [`types`] — assessment statuses, persisted records, diagnostics.
//! - [`provider`] — the narrow extraction-provider contract, a deterministic
//!   zero-external-call fallback, and a schema-constrained HTTP provider.
//! - [`prompt`] — canonical prompt structure and prompt hashing.
//! - [`extraction`] — the per-datapoint adapter with evidence gating.
//! - [`verification`] — citation, numeric, unit, year, and baseline checks
//!   with the deterministic downgrade ladder.
//! - [`coverage`] — roll-up of datapoint verdicts to obligations and
//!   standard sections.
//!
//! The evidence-gating invariant is enforced twice — once at extraction
//! (empty citations cannot stay Present/Partial) and again at verification
//! (cited chunks must exist with non-empty text) — so no persisted
//! Present/Partial assessment can lack real evidence.

pub mod coverage;
pub mod extraction;
pub mod prompt;
pub mod provider;
pub mod types;
pub mod verification;

pub use coverage::{compute_coverage, CoverageLevel, CoverageMatrix, ObligationCoverage, SectionCoverage, DECLARED_SECTIONS};
pub use extraction::{apply_evidence_gate, build_query, run_extraction, ExtractionError, ExtractionOutcome};
pub use prompt::{ExtractionPrompt, PromptChunk, PROMPT_TEMPLATE_VERSION};
pub use provider::{
    DeterministicFallbackProvider, ExtractionProvider, HttpProviderConfig, HttpSchemaProvider,
    ProviderError, ProviderIdentity, ProviderRecord, ProviderStatus,
};
pub use types::{
    Assessment, AssessmentStatus, ExtractionDiagnostic, FailureReason, RetrievalTraceEntry,
    VerificationStatus,
};
pub use verification::{verify, VerificationInput, VerificationOutcome};
