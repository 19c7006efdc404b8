//! # dcs-api — Binary Entry Point
//!
//! Starts the Axum HTTP server. Binds to a configurable port (default
//! 8080), optionally syncing regulatory bundles from `DCS_BUNDLES_PATH` at
//! startup so a fresh deployment serves a populated registry.

use dcs_api::state::{AppConfig, AppState};
use dcs_regulatory::SyncMode;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env();
    let port = config.port;
    tracing::info!(?config, "starting dcs-api");

    let mut state = AppState::with_config(config).map_err(|e| {
        tracing::error!("document store initialization failed: {e}");
        e
    })?;

    // Attach the web-search client when discovery is configured.
    if let (Ok(base_url), Ok(api_key)) = (
        std::env::var("DCS_SEARCH_URL"),
        std::env::var("DCS_SEARCH_API_KEY"),
    ) {
        let search_config = dcs_api::discovery::HttpSearchConfig {
            base_url,
            api_key,
            timeout: std::time::Duration::from_secs(30),
            max_document_bytes: state.config.max_document_bytes,
        };
        match dcs_api::discovery::HttpSearchClient::new(search_config) {
            Ok(client) => {
                tracing::info!("document auto-discovery enabled");
                state.search_client = Some(std::sync::Arc::new(client));
            }
            Err(e) => tracing::error!("search client initialization failed: {e}"),
        }
    } else {
        tracing::info!("document auto-discovery disabled (DCS_SEARCH_URL not set)");
    }

    // Sync bundles from the filesystem, if configured.
    if let Ok(path) = std::env::var("DCS_BUNDLES_PATH") {
        let root = std::path::PathBuf::from(&path);
        match dcs_regulatory::loader::load_bundle_dir(&root) {
            Ok(loaded) => {
                let bundles = loaded.into_iter().map(|(b, _)| b).collect();
                match state.registry.import(bundles, SyncMode::Sync) {
                    Ok(report) => tracing::info!(
                        synced = report.synced.len(),
                        "bundle registry synced from {path}"
                    ),
                    Err(e) => tracing::error!("bundle sync failed: {e}"),
                }
            }
            Err(e) => tracing::error!("bundle load failed from {path}: {e}"),
        }
    }

    let app = dcs_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("dcs-api listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
