//! # dcs-api — Axum API for the Disclosure Compliance Stack
//!
//! The HTTP surface over the deterministic compliance pipeline: company
//! profiles, document ingestion, and the run lifecycle from creation through
//! evidence export.
//!
//! ## API Surface
//!
//! | Prefix                  | Module                 | Domain                |
//! |-------------------------|------------------------|-----------------------|
//! | `/v1/companies/*`       | [`routes::companies`]  | Company profiles      |
//! | `/v1/documents/*`       | [`routes::documents`]  | Ingestion + discovery |
//! | `/v1/runs/*`            | [`routes::runs`]       | Run lifecycle         |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → AuthMiddleware → Handler
//! ```
//!
//! Health probes (`/health/*`) and the OpenAPI document stay outside the
//! auth middleware so they remain reachable without credentials.

pub mod auth;
pub mod discovery;
pub mod error;
pub mod extractors;
pub mod openapi;
pub mod routes;
pub mod state;

use axum::middleware::from_fn;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;
use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
pub fn app(state: AppState) -> Router {
    let auth_config = AuthConfig {
        api_keys: state.config.api_keys.clone(),
    };

    // Authenticated API routes.
    let api = Router::new()
        .merge(routes::companies::router())
        .merge(routes::documents::router())
        .merge(routes::runs::router())
        .layer(from_fn(auth::auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(axum::Extension(auth_config))
        .with_state(state.clone());

    // Unauthenticated health probes and API documentation.
    let open = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness))
        .merge(openapi::router())
        .with_state(state);

    Router::new().merge(open).merge(api)
}

/// Liveness probe — 200 whenever the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe — 200 when the application can serve requests.
async fn readiness() -> &'static str {
    "ready"
}
