//! # OpenAPI Document
//!
//! Auto-generated OpenAPI 3.1 specification via utoipa derive macros,
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

/// The API documentation tree.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Disclosure Compliance Stack API",
        description = "Datapoint-level compliance assessment of company \
                       disclosures against versioned regulatory bundles.",
        version = "0.3.0",
    ),
    paths(
        crate::routes::companies::create_company,
        crate::routes::companies::get_company,
        crate::routes::documents::upload_document,
        crate::routes::documents::auto_discover,
        crate::routes::runs::create_run,
        crate::routes::runs::execute_run,
        crate::routes::runs::cancel_run,
        crate::routes::runs::get_status,
        crate::routes::runs::get_diagnostics,
        crate::routes::runs::get_report,
        crate::routes::runs::get_evidence_pack,
        crate::routes::runs::get_evidence_pack_preview,
        crate::routes::runs::get_regulatory_plan,
    ),
    components(schemas(
        crate::error::ErrorBody,
        crate::error::ErrorDetail,
        crate::state::CompanyRecord,
        crate::state::DocumentRecord,
        crate::routes::companies::CreateCompanyRequest,
        crate::routes::documents::UploadResponse,
        crate::routes::documents::AutoDiscoverRequest,
        crate::routes::documents::AutoDiscoverResponse,
        crate::routes::documents::RejectedCandidate,
        crate::routes::runs::CreateRunRequest,
        crate::routes::runs::ExecuteRunRequest,
        crate::routes::runs::RunStatusResponse,
        crate::routes::runs::DiagnosticsResponse,
        crate::discovery::SearchCandidate,
        crate::discovery::RejectionReason,
    )),
    tags(
        (name = "companies", description = "Company profiles"),
        (name = "documents", description = "Document ingestion and discovery"),
        (name = "runs", description = "Compliance run lifecycle"),
    )
)]
pub struct ApiDoc;

/// Router serving the OpenAPI document.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(serve_openapi))
}

async fn serve_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
