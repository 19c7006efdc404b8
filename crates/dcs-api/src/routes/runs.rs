//! # Run Lifecycle
//!
//! ## Endpoints
//!
//! - `POST /v1/runs` — create a run against a company (status `queued`).
//! - `POST /v1/runs/:id/execute` — execute with a pinned bundle, provider,
//!   and compiler mode. Idempotent on run-hash match via the output cache.
//! - `POST /v1/runs/:id/cancel` — request cancellation of an in-flight run.
//! - `GET /v1/runs/:id/status` — terminal state plus a single reason code
//!   on failure.
//! - `GET /v1/runs/:id/diagnostics` — event log and per-datapoint
//!   diagnostics.
//! - `GET /v1/runs/:id/report` — deterministic HTML report (409 until
//!   completed).
//! - `GET /v1/runs/:id/evidence-pack` — byte-stable archive (409 until
//!   completed).
//! - `GET /v1/runs/:id/evidence-pack-preview` — archive entry listing.
//! - `GET /v1/runs/:id/regulatory-plan` — the compiled plan.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use dcs_assess::{
    DeterministicFallbackProvider, ExtractionDiagnostic, ExtractionProvider, HttpProviderConfig,
    HttpSchemaProvider,
};
use dcs_regulatory::CompilerMode;
use dcs_run::{
    build_evidence_pack, execute_run as run_pipeline, preview_evidence_pack, render_html_report,
    PackEntry, RunConfig, RunError, RunEvent, RunInputs, RunStatus,
};

use crate::auth::TenantContext;
use crate::error::AppError;
use crate::extractors::{extract_json, extract_validated_json, Validate};
use crate::state::{AppState, RunRecord};

/// Request to create a run.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRunRequest {
    /// Company to assess.
    pub company_id: Uuid,
    /// Materiality snapshot: topic → is material. Optional; topics absent
    /// from the map are treated as material.
    #[serde(default)]
    pub materiality: BTreeMap<String, bool>,
}

/// Request to execute a run.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ExecuteRunRequest {
    /// Bundle to assess against.
    pub bundle_id: String,
    /// Bundle version.
    pub bundle_version: String,
    /// Provider identifier: `deterministic-fallback` or `http-schema`.
    pub provider_id: String,
    /// Compiler mode: `registry` or `legacy`.
    pub compiler_mode: String,
}

impl Validate for ExecuteRunRequest {
    fn validate(&self) -> Result<(), String> {
        if self.bundle_id.trim().is_empty() {
            return Err("bundle_id must not be empty".to_string());
        }
        if self.bundle_version.trim().is_empty() {
            return Err("bundle_version must not be empty".to_string());
        }
        if !matches!(self.compiler_mode.as_str(), "registry" | "legacy") {
            return Err(format!("unknown compiler_mode: {}", self.compiler_mode));
        }
        Ok(())
    }
}

/// Run status response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RunStatusResponse {
    pub run_id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    /// Single reason code from the taxonomy, on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<String>,
    /// One-line failure explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

/// Diagnostics response.
#[derive(Debug, Serialize, ToSchema)]
pub struct DiagnosticsResponse {
    /// Event log in emission order.
    #[schema(value_type = Vec<Object>)]
    pub events: Vec<RunEvent>,
    /// Per-datapoint diagnostics, in plan order.
    #[schema(value_type = Vec<Object>)]
    pub diagnostics: Vec<ExtractionDiagnostic>,
}

/// Build the runs router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/runs", post(create_run))
        .route("/v1/runs/:id/execute", post(execute_run))
        .route("/v1/runs/:id/cancel", post(cancel_run))
        .route("/v1/runs/:id/status", get(get_status))
        .route("/v1/runs/:id/diagnostics", get(get_diagnostics))
        .route("/v1/runs/:id/report", get(get_report))
        .route("/v1/runs/:id/evidence-pack", get(get_evidence_pack))
        .route(
            "/v1/runs/:id/evidence-pack-preview",
            get(get_evidence_pack_preview),
        )
        .route("/v1/runs/:id/regulatory-plan", get(get_regulatory_plan))
}

/// POST /v1/runs — Create a run.
#[utoipa::path(
    post,
    path = "/v1/runs",
    request_body = CreateRunRequest,
    responses(
        (status = 201, description = "Run created", body = RunStatusResponse),
        (status = 404, description = "Company not found", body = crate::error::ErrorBody),
    ),
    tag = "runs"
)]
pub(crate) async fn create_run(
    State(state): State<AppState>,
    ctx: TenantContext,
    body: Result<Json<CreateRunRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RunStatusResponse>), AppError> {
    let req = extract_json(body)?;
    state
        .company_for_tenant(ctx.tenant.as_str(), &req.company_id)
        .ok_or_else(|| AppError::NotFound(format!("company {} not found", req.company_id)))?;

    let now = Utc::now();
    let id = Uuid::new_v4();
    let record = RunRecord {
        id,
        tenant_id: ctx.tenant.as_str().to_string(),
        company_id: req.company_id,
        status: RunStatus::Queued,
        compiler_mode: CompilerMode::Registry.as_str().to_string(),
        provider_id: None,
        bundle_id: None,
        bundle_version: None,
        run_hash: None,
        cache_hit: None,
        failure_code: None,
        failure_message: None,
        materiality: req.materiality,
        created_at: now,
        updated_at: now,
    };
    state.runs.insert(id, record);
    tracing::info!(run_id = %id, tenant = %ctx.tenant, "run created");

    Ok((
        StatusCode::CREATED,
        Json(RunStatusResponse {
            run_id: id,
            status: RunStatus::Queued.as_str().to_string(),
            run_hash: None,
            cache_hit: None,
            failure_code: None,
            failure_message: None,
        }),
    ))
}

fn resolve_provider(
    state: &AppState,
    provider_id: &str,
) -> Result<Arc<dyn ExtractionProvider>, AppError> {
    match provider_id {
        "deterministic-fallback" => Ok(Arc::new(DeterministicFallbackProvider)),
        "http-schema" => {
            let base_url = state.config.provider_base_url.clone().ok_or_else(|| {
                AppError::Dependency(
                    "http-schema provider requested but DCS_PROVIDER_BASE_URL is not configured"
                        .to_string(),
                )
            })?;
            let provider = HttpSchemaProvider::new(HttpProviderConfig {
                base_url,
                model: state.config.provider_model.clone(),
                ..HttpProviderConfig::default()
            })
            .map_err(|e| AppError::Dependency(e.to_string()))?;
            Ok(Arc::new(provider))
        }
        other => Err(AppError::Validation(format!("unknown provider_id: {other}"))),
    }
}

/// POST /v1/runs/:id/execute — Execute a run.
#[utoipa::path(
    post,
    path = "/v1/runs/{id}/execute",
    params(("id" = Uuid, Path, description = "Run ID")),
    request_body = ExecuteRunRequest,
    responses(
        (status = 202, description = "Execution started", body = RunStatusResponse),
        (status = 404, description = "Run or bundle not found", body = crate::error::ErrorBody),
        (status = 409, description = "Run already executing or terminal", body = crate::error::ErrorBody),
    ),
    tag = "runs"
)]
pub(crate) async fn execute_run(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    body: Result<Json<ExecuteRunRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RunStatusResponse>), AppError> {
    let req = extract_validated_json(body)?;

    let run = state
        .run_for_tenant(ctx.tenant.as_str(), &id)
        .ok_or_else(|| AppError::NotFound(format!("run {id} not found")))?;
    if run.status != RunStatus::Queued {
        return Err(AppError::Conflict(format!(
            "run {id} is {} and cannot be executed",
            run.status
        )));
    }

    let company = state
        .company_for_tenant(ctx.tenant.as_str(), &run.company_id)
        .ok_or_else(|| AppError::NotFound(format!("company {} not found", run.company_id)))?;

    let stored_bundle = state
        .registry
        .get(&req.bundle_id, &req.bundle_version)
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "bundle {}@{} not found",
                req.bundle_id, req.bundle_version
            ))
        })?;

    let provider = resolve_provider(&state, &req.provider_id)?;
    let compiler_mode = match req.compiler_mode.as_str() {
        "legacy" => CompilerMode::Legacy,
        _ => CompilerMode::Registry,
    };

    let doc_hashes = state
        .links
        .company_doc_hashes(ctx.tenant.as_str(), run.company_id);
    let chunks = state.chunk_index.chunks_for(&doc_hashes);

    let cancel = Arc::new(AtomicBool::new(false));
    state.cancellations.write().insert(id, Arc::clone(&cancel));

    state.runs.update(&id, |r| {
        r.status = RunStatus::Running;
        r.compiler_mode = compiler_mode.as_str().to_string();
        r.provider_id = Some(req.provider_id.clone());
        r.bundle_id = Some(req.bundle_id.clone());
        r.bundle_version = Some(req.bundle_version.clone());
        r.updated_at = Utc::now();
    });

    let tenant_id = dcs_core::TenantId::new(ctx.tenant.as_str())
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let inputs = RunInputs {
        run_id: id,
        tenant: tenant_id,
        company_id: run.company_id,
        profile: company.snapshot(),
        materiality: run.materiality.clone(),
        bundles: vec![stored_bundle.bundle],
        compiler_mode,
        chunks,
        document_hashes: doc_hashes,
        config: RunConfig {
            top_k: state.config.top_k,
            chunk_params: state.config.chunk_params,
            retrieval_policy: dcs_retrieval::RetrievalPolicy::default(),
            datapoint_timeout: state.config.datapoint_timeout,
            failure_rate_threshold: state.config.failure_rate_threshold,
            code_version: state.config.code_version.clone(),
        },
    };

    let task_state = state.clone();
    tokio::spawn(async move {
        let outcome = run_pipeline(&inputs, provider.as_ref(), &task_state.run_cache, &cancel).await;
        match outcome {
            Ok(output) => {
                task_state
                    .run_events
                    .write()
                    .insert(id, output.events.clone());
                task_state.runs.update(&id, |r| {
                    r.status = output.status;
                    r.run_hash = Some(output.run_hash.clone());
                    r.cache_hit = Some(output.cache_hit);
                    r.updated_at = Utc::now();
                });
                task_state.artifacts.write().insert(id, output);
            }
            Err(error) => {
                let code = error.reason_code().to_string();
                let message = error.to_string();
                let events = match error {
                    RunError::EmptyPlan { events, .. }
                    | RunError::EmptyCorpus { events }
                    | RunError::Cancelled { events, .. } => events,
                    _ => vec![],
                };
                task_state.run_events.write().insert(id, events);
                task_state.runs.update(&id, |r| {
                    r.status = RunStatus::Failed;
                    r.failure_code = Some(code.clone());
                    r.failure_message = Some(message.clone());
                    r.updated_at = Utc::now();
                });
                tracing::warn!(run_id = %id, code = %code, "run failed: {message}");
            }
        }
        task_state.cancellations.write().remove(&id);
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(RunStatusResponse {
            run_id: id,
            status: RunStatus::Running.as_str().to_string(),
            run_hash: None,
            cache_hit: None,
            failure_code: None,
            failure_message: None,
        }),
    ))
}

/// POST /v1/runs/:id/cancel — Request cancellation.
#[utoipa::path(
    post,
    path = "/v1/runs/{id}/cancel",
    params(("id" = Uuid, Path, description = "Run ID")),
    responses(
        (status = 202, description = "Cancellation requested", body = RunStatusResponse),
        (status = 404, description = "Run not found", body = crate::error::ErrorBody),
        (status = 409, description = "Run already terminal", body = crate::error::ErrorBody),
    ),
    tag = "runs"
)]
pub(crate) async fn cancel_run(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<RunStatusResponse>), AppError> {
    let run = state
        .run_for_tenant(ctx.tenant.as_str(), &id)
        .ok_or_else(|| AppError::NotFound(format!("run {id} not found")))?;
    if run.status.is_terminal() {
        return Err(AppError::Conflict(format!(
            "run {id} is already {}",
            run.status
        )));
    }
    if let Some(flag) = state.cancellations.read().get(&id) {
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(RunStatusResponse {
            run_id: id,
            status: run.status.as_str().to_string(),
            run_hash: run.run_hash,
            cache_hit: run.cache_hit,
            failure_code: None,
            failure_message: None,
        }),
    ))
}

/// GET /v1/runs/:id/status — Run status.
#[utoipa::path(
    get,
    path = "/v1/runs/{id}/status",
    params(("id" = Uuid, Path, description = "Run ID")),
    responses(
        (status = 200, description = "Run status", body = RunStatusResponse),
        (status = 404, description = "Run not found", body = crate::error::ErrorBody),
    ),
    tag = "runs"
)]
pub(crate) async fn get_status(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<Json<RunStatusResponse>, AppError> {
    let run = state
        .run_for_tenant(ctx.tenant.as_str(), &id)
        .ok_or_else(|| AppError::NotFound(format!("run {id} not found")))?;
    Ok(Json(RunStatusResponse {
        run_id: run.id,
        status: run.status.as_str().to_string(),
        run_hash: run.run_hash,
        cache_hit: run.cache_hit,
        failure_code: run.failure_code,
        failure_message: run.failure_message,
    }))
}

/// GET /v1/runs/:id/diagnostics — Event log and per-datapoint diagnostics.
#[utoipa::path(
    get,
    path = "/v1/runs/{id}/diagnostics",
    params(("id" = Uuid, Path, description = "Run ID")),
    responses(
        (status = 200, description = "Diagnostics", body = DiagnosticsResponse),
        (status = 404, description = "Run not found", body = crate::error::ErrorBody),
    ),
    tag = "runs"
)]
pub(crate) async fn get_diagnostics(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<Json<DiagnosticsResponse>, AppError> {
    state
        .run_for_tenant(ctx.tenant.as_str(), &id)
        .ok_or_else(|| AppError::NotFound(format!("run {id} not found")))?;

    let events = state
        .run_events
        .read()
        .get(&id)
        .cloned()
        .unwrap_or_default();
    let diagnostics = state
        .artifacts
        .read()
        .get(&id)
        .map(|o| o.diagnostics.clone())
        .unwrap_or_default();
    Ok(Json(DiagnosticsResponse {
        events,
        diagnostics,
    }))
}

fn completed_artifacts(
    state: &AppState,
    tenant: &str,
    id: &Uuid,
) -> Result<dcs_run::RunOutput, AppError> {
    let run = state
        .run_for_tenant(tenant, id)
        .ok_or_else(|| AppError::NotFound(format!("run {id} not found")))?;
    if run.status != RunStatus::Completed {
        return Err(AppError::Conflict(format!(
            "run {id} is {}; exports require a completed run",
            run.status
        )));
    }
    state
        .artifacts
        .read()
        .get(id)
        .cloned()
        .ok_or_else(|| AppError::Internal(format!("artifacts missing for completed run {id}")))
}

/// GET /v1/runs/:id/report — Deterministic HTML report.
#[utoipa::path(
    get,
    path = "/v1/runs/{id}/report",
    params(("id" = Uuid, Path, description = "Run ID")),
    responses(
        (status = 200, description = "HTML report", content_type = "text/html"),
        (status = 404, description = "Run not found", body = crate::error::ErrorBody),
        (status = 409, description = "Run not completed", body = crate::error::ErrorBody),
    ),
    tag = "runs"
)]
pub(crate) async fn get_report(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<Html<String>, AppError> {
    let output = completed_artifacts(&state, ctx.tenant.as_str(), &id)?;
    Ok(Html(render_html_report(
        id,
        &output.assessments,
        &output.coverage,
        None,
    )))
}

/// GET /v1/runs/:id/evidence-pack — Byte-stable archive.
#[utoipa::path(
    get,
    path = "/v1/runs/{id}/evidence-pack",
    params(("id" = Uuid, Path, description = "Run ID")),
    responses(
        (status = 200, description = "Evidence archive", content_type = "application/zip"),
        (status = 404, description = "Run not found", body = crate::error::ErrorBody),
        (status = 409, description = "Run not completed", body = crate::error::ErrorBody),
    ),
    tag = "runs"
)]
pub(crate) async fn get_evidence_pack(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let output = completed_artifacts(&state, ctx.tenant.as_str(), &id)?;
    let doc_hashes = state
        .links
        .company_doc_hashes(ctx.tenant.as_str(), output.plan.company_id);
    let chunks = state.chunk_index.chunks_for(&doc_hashes);
    let archive = build_evidence_pack(&state.document_store, &output, &chunks)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"evidence-{id}.zip\""),
            ),
        ],
        archive,
    )
        .into_response())
}

/// GET /v1/runs/:id/evidence-pack-preview — Archive entry listing.
#[utoipa::path(
    get,
    path = "/v1/runs/{id}/evidence-pack-preview",
    params(("id" = Uuid, Path, description = "Run ID")),
    responses(
        (status = 200, description = "Archive entries"),
        (status = 404, description = "Run not found", body = crate::error::ErrorBody),
        (status = 409, description = "Run not completed", body = crate::error::ErrorBody),
    ),
    tag = "runs"
)]
pub(crate) async fn get_evidence_pack_preview(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<PackEntry>>, AppError> {
    let output = completed_artifacts(&state, ctx.tenant.as_str(), &id)?;
    let doc_hashes = state
        .links
        .company_doc_hashes(ctx.tenant.as_str(), output.plan.company_id);
    let chunks = state.chunk_index.chunks_for(&doc_hashes);
    let entries = preview_evidence_pack(&state.document_store, &output, &chunks)?;
    Ok(Json(entries))
}

/// GET /v1/runs/:id/regulatory-plan — The compiled plan.
#[utoipa::path(
    get,
    path = "/v1/runs/{id}/regulatory-plan",
    params(("id" = Uuid, Path, description = "Run ID")),
    responses(
        (status = 200, description = "Compiled plan"),
        (status = 404, description = "Run not found", body = crate::error::ErrorBody),
        (status = 409, description = "Run has no compiled plan", body = crate::error::ErrorBody),
    ),
    tag = "runs"
)]
pub(crate) async fn get_regulatory_plan(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<Json<dcs_regulatory::CompiledPlan>, AppError> {
    state
        .run_for_tenant(ctx.tenant.as_str(), &id)
        .ok_or_else(|| AppError::NotFound(format!("run {id} not found")))?;
    state
        .artifacts
        .read()
        .get(&id)
        .map(|o| Json(o.plan.clone()))
        .ok_or_else(|| {
            AppError::Conflict(format!("run {id} has no compiled plan yet"))
        })
}
