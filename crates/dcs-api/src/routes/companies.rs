//! # Company Profiles
//!
//! ## Endpoints
//!
//! - `POST /v1/companies` — create a profile
//! - `GET /v1/companies/:id` — fetch a profile (tenant-scoped)

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::TenantContext;
use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::state::{AppState, CompanyRecord};

/// Request to create a company profile. Fields mirror the applicability
/// evaluator's whitelisted context.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCompanyRequest {
    /// Company display name.
    pub name: String,
    /// Headcount.
    pub employees: Option<i64>,
    /// Annual turnover.
    pub turnover: Option<f64>,
    /// Listed on a regulated market.
    pub listed_status: Option<bool>,
    /// Reporting year to assess.
    pub reporting_year: Option<i64>,
    /// Reporting period start (ISO date).
    pub reporting_year_start: Option<String>,
    /// Reporting period end (ISO date).
    pub reporting_year_end: Option<String>,
    /// Jurisdiction codes the company operates in.
    #[serde(default)]
    pub jurisdictions: Vec<String>,
    /// Regimes the company declares itself in scope for.
    #[serde(default)]
    pub regimes: Vec<String>,
}

impl Validate for CreateCompanyRequest {
    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if let Some(employees) = self.employees {
            if employees < 0 {
                return Err("employees must not be negative".to_string());
            }
        }
        if let Some(turnover) = self.turnover {
            if turnover < 0.0 {
                return Err("turnover must not be negative".to_string());
            }
        }
        if let Some(year) = self.reporting_year {
            if !(1900..=2200).contains(&year) {
                return Err(format!("reporting_year out of range: {year}"));
            }
        }
        Ok(())
    }
}

/// Build the companies router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/companies", post(create_company))
        .route("/v1/companies/:id", get(get_company))
}

/// POST /v1/companies — Create a company profile.
#[utoipa::path(
    post,
    path = "/v1/companies",
    request_body = CreateCompanyRequest,
    responses(
        (status = 201, description = "Company created", body = CompanyRecord),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "companies"
)]
pub(crate) async fn create_company(
    State(state): State<AppState>,
    ctx: TenantContext,
    body: Result<Json<CreateCompanyRequest>, JsonRejection>,
) -> Result<(axum::http::StatusCode, Json<CompanyRecord>), AppError> {
    let req = extract_validated_json(body)?;
    let now = Utc::now();
    let id = Uuid::new_v4();

    let record = CompanyRecord {
        id,
        tenant_id: ctx.tenant.as_str().to_string(),
        name: req.name,
        employees: req.employees,
        turnover: req.turnover,
        listed_status: req.listed_status,
        reporting_year: req.reporting_year,
        reporting_year_start: req.reporting_year_start,
        reporting_year_end: req.reporting_year_end,
        jurisdictions: req.jurisdictions,
        regimes: req.regimes,
        created_at: now,
        updated_at: now,
    };

    state.companies.insert(id, record.clone());
    tracing::info!(company_id = %id, tenant = %ctx.tenant, "company created");
    Ok((axum::http::StatusCode::CREATED, Json(record)))
}

/// GET /v1/companies/:id — Fetch a company profile.
#[utoipa::path(
    get,
    path = "/v1/companies/{id}",
    params(("id" = Uuid, Path, description = "Company ID")),
    responses(
        (status = 200, description = "Company found", body = CompanyRecord),
        (status = 404, description = "Company not found", body = crate::error::ErrorBody),
    ),
    tag = "companies"
)]
pub(crate) async fn get_company(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<Json<CompanyRecord>, AppError> {
    state
        .company_for_tenant(ctx.tenant.as_str(), &id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("company {id} not found")))
}
