//! # Document Ingestion
//!
//! ## Endpoints
//!
//! - `POST /v1/documents/upload` — multipart upload
//!   `(company_id, title, file)`; content-addressed with a duplicate flag.
//! - `POST /v1/documents/auto-discover` — web discovery via the configured
//!   search client; PDF-only, rejected candidates carry reason codes.
//!
//! Both paths converge on the same deterministic ingestion chain:
//! store bytes → extract pages → chunk → index → link to the company.

use axum::extract::{Multipart, State};
use axum::extract::rejection::JsonRejection;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use dcs_core::DocHash;
use dcs_ingest::{chunk_pages, extract_pages};
use dcs_retrieval::IndexedChunk;

use crate::auth::TenantContext;
use crate::discovery::{filter_pdf_candidates, validate_download, RejectionReason};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::state::{AppState, DocumentRecord};

/// Content types accepted for manual uploads.
const ALLOWED_UPLOAD_TYPES: &[&str] = &["application/pdf", "text/plain"];

/// Response for a document ingestion.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    /// Document record id.
    pub document_id: Uuid,
    /// Content hash of the bytes.
    pub doc_hash: String,
    /// Whether identical bytes were already ingested for this tenant.
    pub duplicate: bool,
    /// Extracted page count.
    pub pages: usize,
    /// Indexed chunk count.
    pub chunks: usize,
}

/// Request for document auto-discovery.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AutoDiscoverRequest {
    /// Company to link discovered documents to.
    pub company_id: Uuid,
    /// Maximum number of documents to ingest.
    pub max_documents: usize,
}

impl Validate for AutoDiscoverRequest {
    fn validate(&self) -> Result<(), String> {
        if self.max_documents == 0 || self.max_documents > 20 {
            return Err("max_documents must be between 1 and 20".to_string());
        }
        Ok(())
    }
}

/// One rejected discovery candidate.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RejectedCandidate {
    /// Candidate URL.
    pub url: String,
    /// Machine-readable rejection reason.
    pub reason: RejectionReason,
}

/// Response for auto-discovery.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AutoDiscoverResponse {
    /// Ingested documents.
    pub ingested: Vec<UploadResponse>,
    /// Rejected candidates with reason codes.
    pub rejected: Vec<RejectedCandidate>,
}

/// Build the documents router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/documents/upload", post(upload_document))
        .route("/v1/documents/auto-discover", post(auto_discover))
}

/// Shared deterministic ingestion chain. Idempotent by content hash.
pub(crate) fn ingest_document_bytes(
    state: &AppState,
    tenant: &str,
    company_id: Uuid,
    title: &str,
    content_type: &str,
    bytes: &[u8],
) -> Result<UploadResponse, AppError> {
    if bytes.is_empty() {
        return Err(AppError::Validation("document is empty".to_string()));
    }
    if bytes.len() > state.config.max_document_bytes {
        return Err(AppError::Validation(format!(
            "document exceeds size limit of {} bytes",
            state.config.max_document_bytes
        )));
    }

    let (doc_hash, _already_stored) = state.document_store.put(bytes)?;

    // Dedup is per tenant: identical bytes under the same tenant reuse the
    // metadata record; the link is extended to the requesting company.
    if let Some(existing) = state
        .documents
        .find(|d| d.tenant_id == tenant && d.doc_hash == doc_hash.as_str())
    {
        state.links.link(tenant, company_id, &doc_hash);
        return Ok(UploadResponse {
            document_id: existing.id,
            doc_hash: doc_hash.as_str().to_string(),
            duplicate: true,
            pages: existing.page_count,
            chunks: existing.chunk_count,
        });
    }

    let pages = extract_pages(bytes, content_type)?;
    let parser_version = pages
        .first()
        .map(|p| p.parser_version.clone())
        .unwrap_or_default();
    let chunks = chunk_pages(&doc_hash, &pages, &state.config.chunk_params)?;
    let indexed: Vec<IndexedChunk> = chunks
        .iter()
        .map(|c| IndexedChunk {
            chunk_id: c.chunk_id.clone(),
            doc_hash: c.doc_hash.clone(),
            page_number: c.page_number,
            start_offset: c.start_offset,
            end_offset: c.end_offset,
            text: c.text.clone(),
            embedding: None,
        })
        .collect();
    let chunk_count = indexed.len();
    state.chunk_index.insert_document(&doc_hash, indexed);

    let id = Uuid::new_v4();
    let record = DocumentRecord {
        id,
        tenant_id: tenant.to_string(),
        title: title.to_string(),
        doc_hash: doc_hash.as_str().to_string(),
        size: bytes.len(),
        content_type: content_type.to_string(),
        parser_version,
        page_count: pages.len(),
        chunk_count,
        created_at: Utc::now(),
    };
    state.documents.insert(id, record);
    state.links.link(tenant, company_id, &doc_hash);

    tracing::info!(
        doc_hash = %doc_hash,
        pages = pages.len(),
        chunks = chunk_count,
        "document ingested"
    );

    Ok(UploadResponse {
        document_id: id,
        doc_hash: doc_hash.as_str().to_string(),
        duplicate: false,
        pages: pages.len(),
        chunks: chunk_count,
    })
}

fn infer_content_type(declared: Option<&str>, filename: Option<&str>) -> String {
    if let Some(ct) = declared {
        let ct = ct.split(';').next().unwrap_or("").trim();
        if !ct.is_empty() && ct != "application/octet-stream" {
            return ct.to_lowercase();
        }
    }
    match filename
        .and_then(|f| f.rsplit('.').next())
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("pdf") => "application/pdf".to_string(),
        Some("txt") => "text/plain".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

/// POST /v1/documents/upload — Multipart document upload.
#[utoipa::path(
    post,
    path = "/v1/documents/upload",
    responses(
        (status = 201, description = "Document ingested", body = UploadResponse),
        (status = 404, description = "Company not found", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "documents"
)]
pub(crate) async fn upload_document(
    State(state): State<AppState>,
    ctx: TenantContext,
    mut multipart: Multipart,
) -> Result<(axum::http::StatusCode, Json<UploadResponse>), AppError> {
    let mut company_id: Option<Uuid> = None;
    let mut title: Option<String> = None;
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut content_type: Option<String> = None;
    let mut filename: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("company_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                company_id = Some(
                    text.parse()
                        .map_err(|e| AppError::Validation(format!("invalid company_id: {e}")))?,
                );
            }
            Some("title") => {
                title = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?,
                );
            }
            Some("file") => {
                content_type = field.content_type().map(str::to_string);
                filename = field.file_name().map(str::to_string);
                file_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let company_id =
        company_id.ok_or_else(|| AppError::Validation("company_id is required".to_string()))?;
    let title = title.ok_or_else(|| AppError::Validation("title is required".to_string()))?;
    let bytes = file_bytes.ok_or_else(|| AppError::Validation("file is required".to_string()))?;
    if title.trim().is_empty() {
        return Err(AppError::Validation("title must not be empty".to_string()));
    }

    state
        .company_for_tenant(ctx.tenant.as_str(), &company_id)
        .ok_or_else(|| AppError::NotFound(format!("company {company_id} not found")))?;

    let content_type = infer_content_type(content_type.as_deref(), filename.as_deref());
    if !ALLOWED_UPLOAD_TYPES.contains(&content_type.as_str()) {
        return Err(AppError::Validation(format!(
            "content type {content_type} is not accepted; allowed: {ALLOWED_UPLOAD_TYPES:?}"
        )));
    }

    let response = ingest_document_bytes(
        &state,
        ctx.tenant.as_str(),
        company_id,
        &title,
        &content_type,
        &bytes,
    )?;
    Ok((axum::http::StatusCode::CREATED, Json(response)))
}

/// POST /v1/documents/auto-discover — Discover and ingest documents.
#[utoipa::path(
    post,
    path = "/v1/documents/auto-discover",
    request_body = AutoDiscoverRequest,
    responses(
        (status = 200, description = "Discovery results", body = AutoDiscoverResponse),
        (status = 404, description = "Company not found", body = crate::error::ErrorBody),
        (status = 503, description = "Search client not configured", body = crate::error::ErrorBody),
    ),
    tag = "documents"
)]
pub(crate) async fn auto_discover(
    State(state): State<AppState>,
    ctx: TenantContext,
    body: Result<Json<AutoDiscoverRequest>, JsonRejection>,
) -> Result<Json<AutoDiscoverResponse>, AppError> {
    let req = extract_validated_json(body)?;

    let company = state
        .company_for_tenant(ctx.tenant.as_str(), &req.company_id)
        .ok_or_else(|| AppError::NotFound(format!("company {} not found", req.company_id)))?;

    let Some(search_client) = state.search_client.clone() else {
        return Err(AppError::Dependency(
            "document auto-discovery requires a configured search client".to_string(),
        ));
    };

    let candidates = search_client
        .search(&company.name, company.reporting_year, req.max_documents * 2)
        .await
        .map_err(|e| AppError::Dependency(e.to_string()))?;

    let (kept, pre_rejected) = filter_pdf_candidates(candidates);
    let mut rejected: Vec<RejectedCandidate> = pre_rejected
        .into_iter()
        .map(|(c, reason)| RejectedCandidate {
            url: c.url,
            reason,
        })
        .collect();

    let mut ingested = Vec::new();
    for candidate in kept {
        if ingested.len() >= req.max_documents {
            break;
        }
        let downloaded = match search_client.download(&candidate).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(url = %candidate.url, error = %e, "discovery download failed");
                rejected.push(RejectedCandidate {
                    url: candidate.url.clone(),
                    reason: RejectionReason::DownloadFailed,
                });
                continue;
            }
        };
        if let Err(reason) =
            validate_download(&downloaded.content, state.config.max_document_bytes)
        {
            rejected.push(RejectedCandidate {
                url: candidate.url.clone(),
                reason,
            });
            continue;
        }
        // Auto-discovery ingests PDFs only; the content sniff above already
        // guarantees a %PDF- payload.
        let doc_hash = DocHash::from_bytes(&downloaded.content);
        if state
            .links
            .is_linked(ctx.tenant.as_str(), req.company_id, &doc_hash)
        {
            rejected.push(RejectedCandidate {
                url: candidate.url.clone(),
                reason: RejectionReason::Duplicate,
            });
            continue;
        }
        match ingest_document_bytes(
            &state,
            ctx.tenant.as_str(),
            req.company_id,
            &downloaded.title,
            "application/pdf",
            &downloaded.content,
        ) {
            Ok(response) => ingested.push(response),
            Err(e) => {
                tracing::warn!(url = %candidate.url, error = %e, "discovery ingestion failed");
                rejected.push(RejectedCandidate {
                    url: candidate.url.clone(),
                    reason: RejectionReason::Empty,
                });
            }
        }
    }

    Ok(Json(AutoDiscoverResponse { ingested, rejected }))
}
