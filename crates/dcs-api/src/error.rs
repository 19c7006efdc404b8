//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`. Maps
//! domain errors from the pipeline crates onto the HTTP edge with the
//! machine-readable codes of the error taxonomy. Internal error details are
//! never exposed in responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses use this format across the API surface.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g. "NOT_FOUND", "VALIDATION").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional context, present only for client errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`].
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found — also the cross-tenant answer (404, never a leak).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request validation failed (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Request body could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or malformed credentials (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Credentials present but wrong (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Lifecycle/readiness conflict (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Checksum/hash mismatch or orphan citation (500, incident-logged).
    #[error("integrity failure: {0}")]
    Integrity(String),

    /// A dependency (storage, provider, search client) is unavailable (503).
    #[error("dependency unavailable: {0}")]
    Dependency(String),

    /// The provider returned a malformed response (502).
    #[error("provider schema violation: {0}")]
    ProviderSchema(String),

    /// An external call exceeded its deadline (504).
    #[error("timeout: {0}")]
    Timeout(String),

    /// Internal error (500). Message logged, never returned.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status and machine-readable code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "AUTHZ"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "AUTHZ"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Integrity(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTEGRITY"),
            Self::Dependency(_) => (StatusCode::SERVICE_UNAVAILABLE, "DEPENDENCY"),
            Self::ProviderSchema(_) => (StatusCode::BAD_GATEWAY, "PROVIDER_SCHEMA"),
            Self::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Never expose internal or integrity details to clients.
        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            Self::Integrity(_) => "An integrity failure occurred".to_string(),
            other => other.to_string(),
        };

        if matches!(&self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal server error");
        }
        if matches!(&self, Self::Integrity(_)) {
            // Integrity failures are incidents, not routine errors.
            tracing::error!(error = %self, "integrity incident");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<dcs_core::ValidationError> for AppError {
    fn from(err: dcs_core::ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<dcs_ingest::StoreError> for AppError {
    fn from(err: dcs_ingest::StoreError) -> Self {
        match &err {
            dcs_ingest::StoreError::NotFound(_) => Self::NotFound(err.to_string()),
            dcs_ingest::StoreError::IntegrityMismatch { .. } => Self::Integrity(err.to_string()),
            dcs_ingest::StoreError::Unavailable(_) => Self::Dependency(err.to_string()),
        }
    }
}

impl From<dcs_ingest::ExtractError> for AppError {
    fn from(err: dcs_ingest::ExtractError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<dcs_ingest::chunk::ChunkError> for AppError {
    fn from(err: dcs_ingest::chunk::ChunkError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<dcs_regulatory::BundleError> for AppError {
    fn from(err: dcs_regulatory::BundleError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<dcs_run::EvidenceError> for AppError {
    fn from(err: dcs_run::EvidenceError) -> Self {
        match err {
            e @ dcs_run::EvidenceError::Integrity { .. } => Self::Integrity(e.to_string()),
            dcs_run::EvidenceError::Store(inner) => Self::from(inner),
            other => Self::Internal(other.to_string()),
        }
    }
}
