//! # Tenant Authentication Middleware
//!
//! Every `/v1` call is tenant-scoped via explicit headers:
//!
//! ```text
//! X-Tenant-ID: <tenant>
//! X-API-Key:   <key>
//! ```
//!
//! Missing headers are 401; a wrong key for a known tenant is 403. When no
//! API keys are configured (development mode) the key check is skipped but
//! the tenant header is still required — nothing in the system operates
//! without a tenant scope.
//!
//! Key comparison is constant-time so timing cannot reveal key length or
//! prefix. Cross-tenant *reads* are not this middleware's concern: handlers
//! answer 404 for resources outside the caller's tenant, never 403, so the
//! existence of another tenant's resources cannot be probed.

use std::collections::HashMap;

use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use subtle::ConstantTimeEq;

use dcs_core::TenantId;

use crate::error::{AppError, ErrorBody, ErrorDetail};

/// Header carrying the tenant identifier.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Auth configuration injected into request extensions.
///
/// Custom `Debug` redacts key material to prevent credential leakage.
#[derive(Clone, Default)]
pub struct AuthConfig {
    /// Tenant → API key. Empty map disables the key check (dev mode).
    pub api_keys: HashMap<String, String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("tenants", &self.api_keys.keys().collect::<Vec<_>>())
            .field("api_keys", &"[REDACTED]")
            .finish()
    }
}

/// Tenant context of the authenticated caller, injected into request
/// extensions and extracted by handlers via `FromRequestParts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    /// The caller's tenant.
    pub tenant: TenantId,
}

#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for TenantContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantContext>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("no tenant context in request".into()))
    }
}

/// Constant-time comparison of API keys.
fn constant_time_key_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        // Dummy comparison keeps timing flat regardless of length match.
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

/// Validate tenant headers and inject [`TenantContext`].
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let config = request
        .extensions()
        .get::<AuthConfig>()
        .cloned()
        .unwrap_or_default();

    let tenant_header = request
        .headers()
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let Some(tenant_raw) = tenant_header else {
        return error_response(StatusCode::UNAUTHORIZED, "missing X-Tenant-ID header");
    };
    let tenant = match TenantId::new(tenant_raw) {
        Ok(t) => t,
        Err(e) => {
            return error_response(StatusCode::UNAUTHORIZED, &format!("invalid tenant: {e}"))
        }
    };

    if !config.api_keys.is_empty() {
        let provided = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        let Some(provided) = provided else {
            return error_response(StatusCode::UNAUTHORIZED, "missing X-API-Key header");
        };
        let valid = config
            .api_keys
            .get(tenant.as_str())
            .map(|expected| constant_time_key_eq(provided, expected))
            .unwrap_or(false);
        if !valid {
            tracing::warn!(tenant = %tenant, "authentication failed: invalid API key");
            return error_response(StatusCode::FORBIDDEN, "invalid API key for tenant");
        }
    }

    request.extensions_mut().insert(TenantContext { tenant });
    next.run(request).await
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            code: "AUTHZ".to_string(),
            message: message.to_string(),
            details: None,
        },
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use axum::middleware::from_fn;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    async fn whoami(ctx: TenantContext) -> String {
        ctx.tenant.to_string()
    }

    fn test_app(api_keys: HashMap<String, String>) -> Router {
        Router::new()
            .route("/whoami", get(whoami))
            .layer(from_fn(auth_middleware))
            .layer(axum::Extension(AuthConfig { api_keys }))
    }

    fn keys(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(t, k)| (t.to_string(), k.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn valid_tenant_and_key_accepted() {
        let app = test_app(keys(&[("acme", "secret-1")]));
        let request = HttpRequest::builder()
            .uri("/whoami")
            .header("X-Tenant-ID", "acme")
            .header("X-API-Key", "secret-1")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_tenant_header_is_401() {
        let app = test_app(keys(&[("acme", "secret-1")]));
        let request = HttpRequest::builder()
            .uri("/whoami")
            .header("X-API-Key", "secret-1")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_api_key_is_401() {
        let app = test_app(keys(&[("acme", "secret-1")]));
        let request = HttpRequest::builder()
            .uri("/whoami")
            .header("X-Tenant-ID", "acme")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_api_key_is_403() {
        let app = test_app(keys(&[("acme", "secret-1")]));
        let request = HttpRequest::builder()
            .uri("/whoami")
            .header("X-Tenant-ID", "acme")
            .header("X-API-Key", "wrong")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unknown_tenant_is_403() {
        let app = test_app(keys(&[("acme", "secret-1")]));
        let request = HttpRequest::builder()
            .uri("/whoami")
            .header("X-Tenant-ID", "intruder")
            .header("X-API-Key", "secret-1")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn dev_mode_requires_tenant_but_no_key() {
        let app = test_app(HashMap::new());
        let request = HttpRequest::builder()
            .uri("/whoami")
            .header("X-Tenant-ID", "acme")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = HttpRequest::builder().uri("/whoami").body(Body::empty()).unwrap();
        let app = test_app(HashMap::new());
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_key_eq("secret", "secret"));
        assert!(!constant_time_key_eq("secre", "secret"));
        assert!(!constant_time_key_eq("", "secret"));
    }

    #[test]
    fn auth_config_debug_redacts_keys() {
        let config = AuthConfig {
            api_keys: keys(&[("acme", "super-secret")]),
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("REDACTED"));
    }
}
