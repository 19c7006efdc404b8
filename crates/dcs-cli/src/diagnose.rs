//! # Diagnose Subcommand
//!
//! Prints the per-stage event record of a run: status, failure reason,
//! event log, and per-datapoint diagnostic summary, fetched from the API.

use anyhow::Result;
use clap::Args;
use serde::Deserialize;
use uuid::Uuid;

use crate::{EXIT_DEPENDENCY, EXIT_INTEGRITY, EXIT_OK, EXIT_USER_ERROR};

/// Arguments for `dcs run diagnose`.
#[derive(Args, Debug)]
pub struct DiagnoseArgs {
    /// Run to diagnose.
    #[arg(long)]
    pub run_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    run_id: Uuid,
    status: String,
    #[serde(default)]
    run_hash: Option<String>,
    #[serde(default)]
    cache_hit: Option<bool>,
    #[serde(default)]
    failure_code: Option<String>,
    #[serde(default)]
    failure_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiagnosticsResponse {
    #[serde(default)]
    events: Vec<EventRow>,
    #[serde(default)]
    diagnostics: Vec<DiagnosticRow>,
}

#[derive(Debug, Deserialize)]
struct EventRow {
    sequence: u64,
    event_type: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct DiagnosticRow {
    datapoint_key: String,
    verification_status: String,
    #[serde(default)]
    failure_reason_code: Option<String>,
    #[serde(default)]
    retrieved_chunk_ids: Vec<String>,
    #[serde(default)]
    numeric_matches_found: u32,
}

/// Execute `dcs run diagnose`. Returns the process exit code.
pub async fn run_diagnose(args: &DiagnoseArgs) -> Result<u8> {
    let base_url =
        std::env::var("DCS_API_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
    let base_url = base_url.trim_end_matches('/').to_string();
    let tenant = std::env::var("DCS_TENANT_ID").unwrap_or_else(|_| "default".to_string());
    let api_key = std::env::var("DCS_API_KEY").ok();

    let client = reqwest::Client::new();
    let get = |path: String| {
        let mut request = client
            .get(format!("{base_url}{path}"))
            .header("X-Tenant-ID", tenant.clone());
        if let Some(key) = &api_key {
            request = request.header("X-API-Key", key.clone());
        }
        request
    };

    let status_response = match get(format!("/v1/runs/{}/status", args.run_id)).send().await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("ERROR: API unavailable: {e}");
            return Ok(EXIT_DEPENDENCY);
        }
    };
    if status_response.status() == reqwest::StatusCode::NOT_FOUND {
        eprintln!("ERROR: run {} not found", args.run_id);
        return Ok(EXIT_USER_ERROR);
    }
    if !status_response.status().is_success() {
        eprintln!("ERROR: status request failed: {}", status_response.status());
        return Ok(EXIT_DEPENDENCY);
    }
    let status: StatusResponse = status_response.json().await?;

    println!("== Run ==");
    println!("run_id={} status={}", status.run_id, status.status);
    if let Some(hash) = &status.run_hash {
        println!("run_hash={hash}");
    }
    if let Some(hit) = status.cache_hit {
        println!("cache_hit={hit}");
    }
    if let Some(code) = &status.failure_code {
        println!(
            "failure={code} {}",
            status.failure_message.as_deref().unwrap_or("")
        );
    }

    let diagnostics_response = match get(format!("/v1/runs/{}/diagnostics", args.run_id))
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            eprintln!("ERROR: API unavailable: {e}");
            return Ok(EXIT_DEPENDENCY);
        }
    };
    let diagnostics: DiagnosticsResponse = diagnostics_response.json().await?;

    println!("\n== Events ==");
    if diagnostics.events.is_empty() {
        println!("(none)");
    }
    for event in &diagnostics.events {
        println!(
            "- [{}] {} payload={}",
            event.sequence, event.event_type, event.payload
        );
    }

    println!("\n== Datapoints ==");
    println!("datapoint_count={}", diagnostics.diagnostics.len());
    for row in &diagnostics.diagnostics {
        println!(
            "- {} verification={} failure={} retrieved={} numeric_matches={}",
            row.datapoint_key,
            row.verification_status,
            row.failure_reason_code.as_deref().unwrap_or("-"),
            row.retrieved_chunk_ids.len(),
            row.numeric_matches_found,
        );
    }

    if status.failure_code.as_deref() == Some("INTEGRITY") {
        return Ok(EXIT_INTEGRITY);
    }
    Ok(EXIT_OK)
}
