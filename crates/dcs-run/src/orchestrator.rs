//! # Assessment Orchestrator
//!
//! Drives a run end to end:
//!
//! ```text
//! queued ─start→ running ─preflight_ok→ iterating
//!                   │                      │
//!                   │                      ├─ per datapoint: retrieve→extract→verify
//!                   │                      ├─ all persisted → coverage → manifest → completed
//!                   │                      └─ failure rate > θ → integrity_warning
//!                   └─preflight_fail→ failed(reason)
//! ```
//!
//! The cache lookup precedes all pipeline work: on a hit the stored outputs
//! come back verbatim with zero provider calls and zero new diagnostics.
//! Per-datapoint failures never abort the run — they surface as `Absent`
//! assessments with recorded reasons, and only the configured failure-rate
//! threshold can demote the terminal state to `integrity_warning`.
//!
//! Iteration follows the compiled plan's datapoint order exactly, and the
//! persisted assessments are re-sorted to that order before return, so a
//! parallel execution strategy could never change observable output.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use dcs_assess::{
    build_query, compute_coverage, run_extraction, verify, Assessment, AssessmentStatus,
    CoverageMatrix, ExtractionDiagnostic, ExtractionError, ExtractionProvider, ProviderError,
    RetrievalTraceEntry, VerificationInput, VerificationStatus,
};
use dcs_core::{CanonicalizationError, ChunkId, DocHash, TenantId};
use dcs_ingest::ChunkParams;
use dcs_regulatory::{
    compile_plan, Bundle, BundleError, BundleRef, CompileError, CompileRequest, CompiledPlan,
    CompilerMode,
};
use dcs_retrieval::{retrieve, IndexedChunk, RetrievalPolicy};

use crate::cache::{CachedRun, RunCache};
use crate::events::{EventLog, RunEvent};
use crate::fingerprint::{CompanyProfileSnapshot, RetrievalParams, RunFingerprint};
use crate::manifest::RunManifest;

/// Run lifecycle states. Terminal states are final; outputs are never
/// rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, not yet executing.
    Queued,
    /// Executing.
    Running,
    /// Terminal: all datapoints assessed, outputs written.
    Completed,
    /// Terminal: the run could not produce outputs.
    Failed,
    /// Terminal: outputs written but the diagnostic failure rate crossed
    /// the configured threshold.
    IntegrityWarning,
}

impl RunStatus {
    /// String form used in the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::IntegrityWarning => "integrity_warning",
        }
    }

    /// Whether the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::IntegrityWarning)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run-level configuration. Everything here participates in the fingerprint
/// except the timeout and threshold, which cannot influence byte output —
/// only whether the run reaches a terminal success state.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Retrieved chunks per datapoint.
    pub top_k: usize,
    /// Chunking parameters the index was built with.
    pub chunk_params: ChunkParams,
    /// Hybrid retrieval policy.
    pub retrieval_policy: RetrievalPolicy,
    /// Hard per-datapoint extraction timeout.
    pub datapoint_timeout: Duration,
    /// Diagnostic failure rate above which the run terminates as
    /// `integrity_warning`.
    pub failure_rate_threshold: f64,
    /// Code version (git SHA) recorded in the fingerprint.
    pub code_version: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            chunk_params: ChunkParams::default(),
            retrieval_policy: RetrievalPolicy::default(),
            datapoint_timeout: Duration::from_secs(60),
            failure_rate_threshold: 0.5,
            code_version: "unversioned".to_string(),
        }
    }
}

/// Everything a run needs, passed explicitly. No ambient state participates
/// in the fingerprint.
#[derive(Debug, Clone)]
pub struct RunInputs {
    /// Run identifier (observability only; not fingerprinted).
    pub run_id: Uuid,
    /// Owning tenant.
    pub tenant: TenantId,
    /// Company under assessment.
    pub company_id: Uuid,
    /// Profile snapshot.
    pub profile: CompanyProfileSnapshot,
    /// Materiality snapshot.
    pub materiality: BTreeMap<String, bool>,
    /// Bundles selected for this run.
    pub bundles: Vec<Bundle>,
    /// Compiler mode.
    pub compiler_mode: CompilerMode,
    /// Company-scoped chunk index.
    pub chunks: Vec<IndexedChunk>,
    /// Hashes of the company's linked documents.
    pub document_hashes: Vec<DocHash>,
    /// Run configuration.
    pub config: RunConfig,
}

/// Output of a successful (or integrity-warned) run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Run identifier.
    pub run_id: Uuid,
    /// Canonical run hash.
    pub run_hash: String,
    /// Terminal status: `Completed` or `IntegrityWarning`.
    pub status: RunStatus,
    /// Whether outputs came from the cache.
    pub cache_hit: bool,
    /// Compiled plan.
    pub plan: CompiledPlan,
    /// Assessments in plan order.
    pub assessments: Vec<Assessment>,
    /// Diagnostics in plan order.
    pub diagnostics: Vec<ExtractionDiagnostic>,
    /// Coverage matrix.
    pub coverage: CoverageMatrix,
    /// Reproducibility manifest.
    pub manifest: RunManifest,
    /// Event log in emission order.
    pub events: Vec<RunEvent>,
}

/// Run failures. Each maps to a single reason code surfaced by `/status`.
#[derive(Error, Debug)]
pub enum RunError {
    /// The compiled plan has zero applicable obligations.
    #[error("compiled plan is empty: {detail}")]
    EmptyPlan {
        /// Human-readable detail.
        detail: String,
        /// Events emitted before the failure.
        events: Vec<RunEvent>,
    },

    /// A plan exists but the company has no indexed chunks.
    #[error("no indexed chunks for company scope")]
    EmptyCorpus {
        /// Events emitted before the failure.
        events: Vec<RunEvent>,
    },

    /// The run was cancelled; already-completed assessments are carried.
    #[error("run cancelled")]
    Cancelled {
        /// Assessments persisted before cancellation.
        assessments: Vec<Assessment>,
        /// Diagnostics persisted before cancellation.
        diagnostics: Vec<ExtractionDiagnostic>,
        /// Events emitted before cancellation.
        events: Vec<RunEvent>,
    },

    /// Bundle or compiler failure other than an empty plan.
    #[error("plan compilation failed: {0}")]
    Compile(#[source] CompileError),

    /// Bundle checksum failure.
    #[error("bundle error: {0}")]
    Bundle(#[from] BundleError),

    /// Canonicalization failure while fingerprinting.
    #[error("canonicalization failed: {0}")]
    Canonicalization(#[from] CanonicalizationError),
}

impl RunError {
    /// Machine-readable reason code from the error taxonomy.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::EmptyPlan { .. } => "EMPTY_PLAN",
            Self::EmptyCorpus { .. } => "EMPTY_CORPUS",
            Self::Cancelled { .. } => "CANCELLED",
            Self::Compile(_) | Self::Bundle(_) => "VALIDATION",
            Self::Canonicalization(_) => "INTEGRITY",
        }
    }
}

/// Execute a run to a terminal state.
pub async fn execute_run(
    inputs: &RunInputs,
    provider: &dyn ExtractionProvider,
    cache: &RunCache,
    cancel: &AtomicBool,
) -> Result<RunOutput, RunError> {
    let mut events = EventLog::new();
    events.append(
        "run.execution.started",
        serde_json::json!({
            "tenant_id": inputs.tenant.as_str(),
            "company_id": inputs.company_id,
            "compiler_mode": inputs.compiler_mode.as_str(),
            "provider": provider.identity().name,
        }),
    );

    // ── Fingerprint + cache lookup, before any pipeline work ────────
    let mut bundle_refs: Vec<BundleRef> = inputs
        .bundles
        .iter()
        .map(|b| {
            Ok(BundleRef {
                bundle_id: b.bundle_id.clone(),
                version: b.version.clone(),
                checksum: dcs_regulatory::bundle_checksum(b)?.to_hex(),
            })
        })
        .collect::<Result<_, BundleError>>()?;
    bundle_refs.sort();

    let retrieval_params = RetrievalParams::new(
        inputs.config.top_k,
        inputs.config.retrieval_policy.clone(),
        inputs.config.chunk_params,
    );
    let mut document_hashes: Vec<String> = inputs
        .document_hashes
        .iter()
        .map(|h| h.as_str().to_string())
        .collect();
    document_hashes.sort();
    document_hashes.dedup();
    let fingerprint = RunFingerprint {
        document_hashes,
        company_profile: inputs.profile.clone(),
        materiality: inputs.materiality.clone(),
        bundle_refs,
        compiler_mode: inputs.compiler_mode.as_str().to_string(),
        retrieval_params: retrieval_params.clone(),
        provider_identity: provider.identity(),
        prompt_template_version: dcs_assess::PROMPT_TEMPLATE_VERSION.to_string(),
        code_version: inputs.config.code_version.clone(),
    };
    let run_hash = fingerprint.run_hash()?;

    if let Some(cached) = cache.get(&run_hash) {
        events.append(
            "run.cache.hit",
            serde_json::json!({"run_hash": run_hash, "assessment_count": cached.assessments.len()}),
        );
        tracing::info!(run_id = %inputs.run_id, run_hash = %run_hash, "run cache hit");
        return Ok(RunOutput {
            run_id: inputs.run_id,
            run_hash,
            status: RunStatus::Completed,
            cache_hit: true,
            plan: cached.plan,
            assessments: cached.assessments,
            diagnostics: cached.diagnostics,
            coverage: cached.coverage,
            manifest: cached.manifest,
            events: events.into_events(),
        });
    }

    // ── Preflight: compile the plan ─────────────────────────────────
    let context = inputs.profile.context();
    let plan = match compile_plan(&CompileRequest {
        company_id: inputs.company_id,
        context: &context,
        declared_regimes: &inputs.profile.regimes,
        bundles: &inputs.bundles,
        materiality: &inputs.materiality,
        mode: inputs.compiler_mode,
    }) {
        Ok(plan) => plan,
        Err(CompileError::EmptyPlan { regimes }) => {
            events.append(
                "run.preflight.failed",
                serde_json::json!({"reason": "EMPTY_PLAN", "regimes": regimes}),
            );
            return Err(RunError::EmptyPlan {
                detail: format!("no applicable obligations for regimes {regimes:?}"),
                events: events.into_events(),
            });
        }
        Err(other) => return Err(RunError::Compile(other)),
    };

    if inputs.chunks.is_empty() {
        events.append(
            "run.preflight.failed",
            serde_json::json!({"reason": "EMPTY_CORPUS"}),
        );
        return Err(RunError::EmptyCorpus {
            events: events.into_events(),
        });
    }

    events.append(
        "run.preflight.ok",
        serde_json::json!({
            "plan_hash": plan.plan_hash,
            "obligations": plan.obligations.len(),
            "datapoints": plan.datapoints().len(),
            "chunks": inputs.chunks.len(),
        }),
    );

    // ── Per-datapoint loop, in plan order ───────────────────────────
    let retrieval_params_json =
        serde_json::to_value(&retrieval_params).map_err(CanonicalizationError::from)?;

    let mut assessments: Vec<Assessment> = Vec::new();
    let mut diagnostics: Vec<ExtractionDiagnostic> = Vec::new();
    let mut failed_datapoints = 0usize;

    let datapoints: Vec<_> = plan.datapoints().into_iter().cloned().collect();
    for datapoint in &datapoints {
        if cancel.load(Ordering::SeqCst) {
            events.append(
                "run.cancelled",
                serde_json::json!({"completed_datapoints": assessments.len()}),
            );
            return Err(RunError::Cancelled {
                assessments,
                diagnostics,
                events: events.into_events(),
            });
        }

        let query = build_query(datapoint);
        let retrieved = retrieve(
            &inputs.chunks,
            &query,
            None,
            inputs.config.top_k,
            &inputs.config.retrieval_policy,
        );
        let retrieved_ids: Vec<ChunkId> =
            retrieved.iter().map(|r| r.chunk_id.clone()).collect();
        let candidates: Vec<RetrievalTraceEntry> = retrieved
            .iter()
            .enumerate()
            .map(|(idx, r)| RetrievalTraceEntry {
                rank: (idx + 1) as u32,
                chunk_id: r.chunk_id.clone(),
                doc_hash: r.doc_hash.clone(),
                page_number: r.page_number,
                start_offset: r.start_offset,
                end_offset: r.end_offset,
                lexical_score: r.lexical_score,
                vector_score: r.vector_score,
                combined_score: r.combined_score,
            })
            .collect();
        let chunk_texts: BTreeMap<String, String> = retrieved
            .iter()
            .map(|r| (r.chunk_id.as_str().to_string(), r.text.clone()))
            .collect();

        match run_extraction(
            provider,
            datapoint,
            &retrieved,
            inputs.config.datapoint_timeout,
        )
        .await
        {
            Ok(outcome) => {
                let verification = verify(&VerificationInput {
                    record: &outcome.record,
                    datapoint_type: datapoint.datapoint_type,
                    requires_baseline: datapoint.requires_baseline,
                    chunks: &chunk_texts,
                });

                let mut evidence: Vec<ChunkId> = outcome
                    .record
                    .evidence_chunk_ids
                    .iter()
                    .filter_map(|id| ChunkId::new(id.clone()).ok())
                    .collect();
                evidence.sort();
                // The evidence-gating invariant: Present/Partial citations
                // survived verification, so they exist with non-empty text.
                if !verification.status.requires_evidence() {
                    evidence.retain(|id| chunk_texts.contains_key(id.as_str()));
                }

                let verification_status = if outcome.gated {
                    VerificationStatus::EvidenceGated
                } else {
                    verification.verification_status
                };
                let failed = verification_status != VerificationStatus::Verified;
                if failed {
                    failed_datapoints += 1;
                }

                events.append(
                    "run.datapoint.assessed",
                    serde_json::json!({
                        "datapoint_key": datapoint.datapoint_key.as_str(),
                        "status": verification.status.as_str(),
                        "verification": verification_status,
                    }),
                );

                assessments.push(Assessment {
                    datapoint_key: datapoint.datapoint_key.clone(),
                    status: verification.status,
                    value: outcome.record.value.clone(),
                    unit: outcome.record.unit.clone(),
                    year: outcome.record.year,
                    rationale: verification.rationale.clone(),
                    evidence_chunk_ids: evidence,
                    prompt_hash: outcome.prompt_hash.clone(),
                    retrieval_params: retrieval_params_json.clone(),
                });
                diagnostics.push(ExtractionDiagnostic {
                    datapoint_key: datapoint.datapoint_key.clone(),
                    retrieved_chunk_ids: retrieved_ids,
                    candidates,
                    numeric_matches_found: verification.numeric_matches_found,
                    verification_status,
                    failure_reason_code: verification.failures.first().copied(),
                    failure_reasons: verification.failures,
                });
            }
            Err(ExtractionError::Canonicalization(e)) => {
                return Err(RunError::Canonicalization(e))
            }
            Err(error) => {
                failed_datapoints += 1;
                let (verification_status, reason_text) = match &error {
                    ExtractionError::Provider(ProviderError::Schema(msg)) => (
                        VerificationStatus::SchemaViolation,
                        format!("SCHEMA_VIOLATION: {msg}"),
                    ),
                    ExtractionError::Timeout(t) => (
                        VerificationStatus::ProviderFailure,
                        format!("TIMEOUT after {t:?}"),
                    ),
                    ExtractionError::Provider(other) => {
                        (VerificationStatus::ProviderFailure, format!("{other}"))
                    }
                    ExtractionError::Canonicalization(_) => unreachable!("handled above"),
                };

                tracing::warn!(
                    datapoint_key = %datapoint.datapoint_key,
                    reason = %reason_text,
                    "datapoint extraction failed; recording Absent"
                );
                events.append(
                    "run.datapoint.failed",
                    serde_json::json!({
                        "datapoint_key": datapoint.datapoint_key.as_str(),
                        "reason": reason_text,
                    }),
                );

                assessments.push(Assessment {
                    datapoint_key: datapoint.datapoint_key.clone(),
                    status: AssessmentStatus::Absent,
                    value: None,
                    unit: None,
                    year: None,
                    rationale: format!("Extraction failed: {reason_text}."),
                    evidence_chunk_ids: vec![],
                    prompt_hash: String::new(),
                    retrieval_params: retrieval_params_json.clone(),
                });
                diagnostics.push(ExtractionDiagnostic {
                    datapoint_key: datapoint.datapoint_key.clone(),
                    retrieved_chunk_ids: retrieved_ids,
                    candidates,
                    numeric_matches_found: 0,
                    verification_status,
                    failure_reason_code: None,
                    failure_reasons: vec![],
                });
            }
        }
    }

    // Outputs are merged back to plan order before persistence; with the
    // sequential loop this is already true, but the contract does not
    // depend on the execution strategy.
    let order: BTreeMap<&str, usize> = datapoints
        .iter()
        .enumerate()
        .map(|(idx, d)| (d.datapoint_key.as_str(), idx))
        .collect();
    assessments.sort_by_key(|a| order.get(a.datapoint_key.as_str()).copied());
    diagnostics.sort_by_key(|d| order.get(d.datapoint_key.as_str()).copied());

    // ── Aggregate, manifest, terminal state ─────────────────────────
    let coverage = compute_coverage(&plan, &assessments);
    let prompt_hashes: Vec<String> = assessments
        .iter()
        .map(|a| a.prompt_hash.clone())
        .filter(|h| !h.is_empty())
        .collect();
    let manifest = RunManifest::build(
        fingerprint,
        run_hash.clone(),
        plan.plan_hash.clone(),
        &prompt_hashes,
    )?;

    let failure_rate = if datapoints.is_empty() {
        0.0
    } else {
        failed_datapoints as f64 / datapoints.len() as f64
    };
    let status = if failure_rate > inputs.config.failure_rate_threshold {
        RunStatus::IntegrityWarning
    } else {
        RunStatus::Completed
    };

    events.append(
        "run.execution.completed",
        serde_json::json!({
            "status": status.as_str(),
            "assessment_count": assessments.len(),
            "failure_rate": failure_rate,
            "cache_hit": false,
        }),
    );

    if status == RunStatus::Completed {
        cache.store(CachedRun {
            run_hash: run_hash.clone(),
            plan: plan.clone(),
            assessments: assessments.clone(),
            diagnostics: diagnostics.clone(),
            coverage: coverage.clone(),
            manifest: manifest.clone(),
        });
    }

    Ok(RunOutput {
        run_id: inputs.run_id,
        run_hash,
        status,
        cache_hit: false,
        plan,
        assessments,
        diagnostics,
        coverage,
        manifest,
        events: events.into_events(),
    })
}
