//! # Bundles Subcommand
//!
//! Registry operations over a local snapshot file
//! (`<state_dir>/registry.json`):
//!
//! - `dcs bundles sync --path <dir> --mode {merge|sync}` — idempotent import
//!   of `<bundle_id>@<version>.json` files; `sync` deactivates bundles
//!   absent from the path.
//! - `dcs bundles list` — summary rows with checksums.
//! - `dcs bundles compile-preview --company <id> --year <y>` — compile a
//!   plan against a company profile fetched from the API (or an inline
//!   `--context-json`) without touching any run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dcs_regulatory::{
    compile_plan, loader, BundleRegistry, CompanyContext, CompileError, CompileRequest,
    CompilerMode, SyncMode,
};

use crate::{EXIT_DEPENDENCY, EXIT_INTEGRITY, EXIT_OK, EXIT_USER_ERROR};

/// Bundle registry subcommands.
#[derive(Subcommand, Debug)]
pub enum BundlesCommand {
    /// Import bundle files into the local registry snapshot.
    Sync(SyncArgs),
    /// List registry entries.
    List,
    /// Compile a plan preview for a company and year.
    CompilePreview(CompilePreviewArgs),
}

/// Arguments for `bundles sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Directory containing `<bundle_id>@<version>.json` files.
    #[arg(long)]
    pub path: PathBuf,

    /// Import mode.
    #[arg(long, value_enum, default_value_t = SyncModeArg::Sync)]
    pub mode: SyncModeArg,
}

/// CLI mirror of [`SyncMode`].
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum SyncModeArg {
    /// Upsert only.
    Merge,
    /// Upsert and deactivate bundles absent from the path.
    Sync,
}

impl From<SyncModeArg> for SyncMode {
    fn from(value: SyncModeArg) -> Self {
        match value {
            SyncModeArg::Merge => SyncMode::Merge,
            SyncModeArg::Sync => SyncMode::Sync,
        }
    }
}

/// Arguments for `bundles compile-preview`.
#[derive(Args, Debug)]
pub struct CompilePreviewArgs {
    /// Company id to fetch from the API.
    #[arg(long, conflicts_with = "context_json")]
    pub company: Option<Uuid>,

    /// Reporting year override.
    #[arg(long)]
    pub year: Option<i64>,

    /// Inline company context JSON instead of an API lookup.
    #[arg(long)]
    pub context_json: Option<String>,

    /// Restrict the preview to one bundle id.
    #[arg(long)]
    pub bundle_id: Option<String>,

    /// Bundle version (requires --bundle-id).
    #[arg(long, requires = "bundle_id")]
    pub bundle_version: Option<String>,
}

// ── Registry snapshot file ──────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, Default)]
struct RegistryFile {
    bundles: Vec<RegistryFileEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFileEntry {
    bundle_id: String,
    version: String,
    checksum: String,
    active: bool,
    payload: dcs_regulatory::Bundle,
}

fn registry_path(state_dir: &Path) -> PathBuf {
    state_dir.join("registry.json")
}

fn load_registry(state_dir: &Path) -> Result<BundleRegistry> {
    let registry = BundleRegistry::new();
    let path = registry_path(state_dir);
    if !path.exists() {
        return Ok(registry);
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("cannot read registry snapshot {}", path.display()))?;
    let file: RegistryFile = serde_json::from_str(&raw)
        .with_context(|| format!("corrupt registry snapshot {}", path.display()))?;
    let mut inactive = Vec::new();
    for entry in file.bundles {
        if !entry.active {
            inactive.push((entry.bundle_id.clone(), entry.version.clone()));
        }
        let (checksum, _) = registry
            .upsert(entry.payload)
            .with_context(|| format!("invalid bundle {}@{}", entry.bundle_id, entry.version))?;
        if checksum.to_hex() != entry.checksum {
            anyhow::bail!(
                "checksum mismatch for {}@{}: snapshot says {}, payload hashes to {}",
                entry.bundle_id,
                entry.version,
                entry.checksum,
                checksum.to_hex()
            );
        }
    }
    // Re-apply inactive flags: upsert activates by design, the snapshot is
    // authoritative about deactivation.
    if !inactive.is_empty() {
        let active: Vec<_> = registry
            .list()
            .into_iter()
            .filter(|row| {
                !inactive
                    .iter()
                    .any(|(id, v)| id == &row.bundle_id && v == &row.version)
            })
            .collect();
        let bundles = active
            .iter()
            .filter_map(|row| registry.get(&row.bundle_id, &row.version))
            .map(|stored| stored.bundle)
            .collect();
        registry.import(bundles, SyncMode::Sync)?;
    }
    Ok(registry)
}

fn save_registry(state_dir: &Path, registry: &BundleRegistry) -> Result<()> {
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("cannot create state dir {}", state_dir.display()))?;
    let entries = registry
        .list()
        .into_iter()
        .filter_map(|row| {
            registry
                .get(&row.bundle_id, &row.version)
                .map(|stored| RegistryFileEntry {
                    bundle_id: row.bundle_id,
                    version: row.version,
                    checksum: row.checksum,
                    active: row.active,
                    payload: stored.bundle,
                })
        })
        .collect();
    let file = RegistryFile { bundles: entries };
    let path = registry_path(state_dir);
    std::fs::write(&path, serde_json::to_string_pretty(&file)?)
        .with_context(|| format!("cannot write registry snapshot {}", path.display()))?;
    Ok(())
}

// ── Command dispatch ────────────────────────────────────────────────────────

/// Execute a bundles subcommand. Returns the process exit code.
pub async fn run_bundles(command: &BundlesCommand, state_dir: &Path) -> Result<u8> {
    match command {
        BundlesCommand::Sync(args) => sync(args, state_dir),
        BundlesCommand::List => list(state_dir),
        BundlesCommand::CompilePreview(args) => compile_preview(args, state_dir).await,
    }
}

fn sync(args: &SyncArgs, state_dir: &Path) -> Result<u8> {
    if !args.path.is_dir() {
        eprintln!("ERROR: path does not exist: {}", args.path.display());
        return Ok(EXIT_USER_ERROR);
    }

    let loaded = match loader::load_bundle_dir(&args.path) {
        Ok(loaded) => loaded,
        Err(loader::LoaderError::Io { path, source }) => {
            eprintln!("ERROR: cannot read {}: {source}", path.display());
            return Ok(EXIT_DEPENDENCY);
        }
        Err(e) => {
            eprintln!("ERROR: {e}");
            return Ok(EXIT_USER_ERROR);
        }
    };

    let registry = load_registry(state_dir)?;
    let bundles = loaded.into_iter().map(|(b, _)| b).collect();
    let report = registry.import(bundles, SyncMode::from(args.mode))?;
    save_registry(state_dir, &registry)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "mode": match args.mode { SyncModeArg::Merge => "merge", SyncModeArg::Sync => "sync" },
            "synced": report.synced,
            "deactivated": report.deactivated,
        }))?
    );
    Ok(EXIT_OK)
}

fn list(state_dir: &Path) -> Result<u8> {
    let registry = match load_registry(state_dir) {
        Ok(r) => r,
        Err(e) if e.to_string().contains("checksum mismatch") => {
            eprintln!("ERROR: {e}");
            return Ok(EXIT_INTEGRITY);
        }
        Err(e) => return Err(e),
    };
    let rows = registry.list();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(EXIT_OK)
}

async fn compile_preview(args: &CompilePreviewArgs, state_dir: &Path) -> Result<u8> {
    let registry = load_registry(state_dir)?;

    let bundles: Vec<dcs_regulatory::Bundle> = match (&args.bundle_id, &args.bundle_version) {
        (Some(id), Some(version)) => match registry.get(id, version) {
            Some(stored) => vec![stored.bundle],
            None => {
                eprintln!("ERROR: bundle {id}@{version} not found in registry snapshot");
                return Ok(EXIT_USER_ERROR);
            }
        },
        (Some(id), None) => {
            let matching: Vec<_> = registry
                .active_bundles()
                .into_iter()
                .filter(|b| &b.bundle_id == id)
                .collect();
            if matching.is_empty() {
                eprintln!("ERROR: no active bundle with id {id}");
                return Ok(EXIT_USER_ERROR);
            }
            matching
        }
        _ => registry.active_bundles(),
    };
    if bundles.is_empty() {
        eprintln!("ERROR: registry snapshot is empty; run `dcs bundles sync` first");
        return Ok(EXIT_USER_ERROR);
    }

    let (mut context, regimes, company_id) = match (&args.context_json, &args.company) {
        (Some(raw), _) => parse_context_json(raw)?,
        (None, Some(company)) => match fetch_company_context(*company).await {
            Ok(parts) => parts,
            Err(FetchError::NotFound) => {
                eprintln!("ERROR: company {company} not found");
                return Ok(EXIT_USER_ERROR);
            }
            Err(FetchError::Unavailable(detail)) => {
                eprintln!("ERROR: API unavailable: {detail}");
                return Ok(EXIT_DEPENDENCY);
            }
        },
        (None, None) => {
            eprintln!("ERROR: either --company or --context-json is required");
            return Ok(EXIT_USER_ERROR);
        }
    };
    if let Some(year) = args.year {
        context.reporting_year = Some(year);
    }

    let materiality = BTreeMap::new();
    let request = CompileRequest {
        company_id: company_id.unwrap_or_else(Uuid::nil),
        context: &context,
        declared_regimes: &regimes,
        bundles: &bundles,
        materiality: &materiality,
        mode: CompilerMode::Registry,
    };
    match compile_plan(&request) {
        Ok(plan) => {
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(EXIT_OK)
        }
        Err(CompileError::EmptyPlan { regimes }) => {
            eprintln!("ERROR: EMPTY_PLAN — no applicable obligations for regimes {regimes:?}");
            Ok(EXIT_USER_ERROR)
        }
        Err(e) => {
            eprintln!("ERROR: {e}");
            Ok(EXIT_USER_ERROR)
        }
    }
}

fn parse_context_json(raw: &str) -> Result<(CompanyContext, Vec<String>, Option<Uuid>)> {
    #[derive(Deserialize)]
    struct InlineContext {
        #[serde(default)]
        company: CompanyContext,
        #[serde(default)]
        regimes: Vec<String>,
    }
    let parsed: InlineContext =
        serde_json::from_str(raw).context("context JSON must decode to an object")?;
    Ok((parsed.company, parsed.regimes, None))
}

enum FetchError {
    NotFound,
    Unavailable(String),
}

async fn fetch_company_context(
    company_id: Uuid,
) -> Result<(CompanyContext, Vec<String>, Option<Uuid>), FetchError> {
    let base_url =
        std::env::var("DCS_API_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
    let tenant = std::env::var("DCS_TENANT_ID").unwrap_or_else(|_| "default".to_string());

    let client = reqwest::Client::new();
    let mut request = client
        .get(format!(
            "{}/v1/companies/{company_id}",
            base_url.trim_end_matches('/')
        ))
        .header("X-Tenant-ID", tenant);
    if let Ok(key) = std::env::var("DCS_API_KEY") {
        request = request.header("X-API-Key", key);
    }

    let response = request
        .send()
        .await
        .map_err(|e| FetchError::Unavailable(e.to_string()))?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(FetchError::NotFound);
    }
    if !response.status().is_success() {
        return Err(FetchError::Unavailable(format!(
            "status {}",
            response.status()
        )));
    }

    #[derive(Deserialize)]
    struct CompanyResponse {
        id: Uuid,
        employees: Option<i64>,
        turnover: Option<f64>,
        listed_status: Option<bool>,
        reporting_year: Option<i64>,
        reporting_year_start: Option<String>,
        reporting_year_end: Option<String>,
        #[serde(default)]
        jurisdictions: Vec<String>,
        #[serde(default)]
        regimes: Vec<String>,
    }
    let company: CompanyResponse = response
        .json()
        .await
        .map_err(|e| FetchError::Unavailable(e.to_string()))?;

    Ok((
        CompanyContext {
            employees: company.employees,
            turnover: company.turnover,
            listed_status: company.listed_status,
            reporting_year: company.reporting_year,
            reporting_year_start: company.reporting_year_start,
            reporting_year_end: company.reporting_year_end,
            jurisdictions: company.jurisdictions,
        },
        company.regimes,
        Some(company.id),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bundle_json() -> String {
        serde_json::json!({
            "regime": "CSRD",
            "bundle_id": "esrs_mini",
            "version": "2026.01",
            "jurisdiction": "EU",
            "obligations": [{
                "obligation_code": "ESRS-E1",
                "title": "Climate change",
                "standard_reference": "ESRS E1",
                "section": "E1",
                "datapoints": [{"datapoint_key": "ESRS-E1-1", "title": "Transition plan"}]
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn sync_then_list_round_trips() {
        let bundles_dir = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();
        std::fs::write(
            bundles_dir.path().join("esrs_mini@2026.01.json"),
            bundle_json(),
        )
        .unwrap();

        let code = run_bundles(
            &BundlesCommand::Sync(SyncArgs {
                path: bundles_dir.path().to_path_buf(),
                mode: SyncModeArg::Sync,
            }),
            state_dir.path(),
        )
        .await
        .unwrap();
        assert_eq!(code, EXIT_OK);

        let registry = load_registry(state_dir.path()).unwrap();
        assert!(registry.get("esrs_mini", "2026.01").is_some());
    }

    #[tokio::test]
    async fn sync_missing_path_is_user_error() {
        let state_dir = TempDir::new().unwrap();
        let code = run_bundles(
            &BundlesCommand::Sync(SyncArgs {
                path: PathBuf::from("/does/not/exist"),
                mode: SyncModeArg::Merge,
            }),
            state_dir.path(),
        )
        .await
        .unwrap();
        assert_eq!(code, EXIT_USER_ERROR);
    }

    #[tokio::test]
    async fn resync_is_idempotent() {
        let bundles_dir = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();
        std::fs::write(
            bundles_dir.path().join("esrs_mini@2026.01.json"),
            bundle_json(),
        )
        .unwrap();
        let sync_args = || {
            BundlesCommand::Sync(SyncArgs {
                path: bundles_dir.path().to_path_buf(),
                mode: SyncModeArg::Sync,
            })
        };
        run_bundles(&sync_args(), state_dir.path()).await.unwrap();
        let first = std::fs::read_to_string(registry_path(state_dir.path())).unwrap();
        run_bundles(&sync_args(), state_dir.path()).await.unwrap();
        let second = std::fs::read_to_string(registry_path(state_dir.path())).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn compile_preview_with_inline_context() {
        let bundles_dir = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();
        std::fs::write(
            bundles_dir.path().join("esrs_mini@2026.01.json"),
            bundle_json(),
        )
        .unwrap();
        run_bundles(
            &BundlesCommand::Sync(SyncArgs {
                path: bundles_dir.path().to_path_buf(),
                mode: SyncModeArg::Sync,
            }),
            state_dir.path(),
        )
        .await
        .unwrap();

        let context = serde_json::json!({
            "company": {
                "employees": 750,
                "turnover": 45000000.0,
                "listed_status": true,
                "reporting_year": 2026,
                "jurisdictions": ["EU"]
            },
            "regimes": ["CSRD"]
        });
        let code = run_bundles(
            &BundlesCommand::CompilePreview(CompilePreviewArgs {
                company: None,
                year: None,
                context_json: Some(context.to_string()),
                bundle_id: None,
                bundle_version: None,
            }),
            state_dir.path(),
        )
        .await
        .unwrap();
        assert_eq!(code, EXIT_OK);
    }

    #[tokio::test]
    async fn compile_preview_without_registry_is_user_error() {
        let state_dir = TempDir::new().unwrap();
        let code = run_bundles(
            &BundlesCommand::CompilePreview(CompilePreviewArgs {
                company: None,
                year: Some(2026),
                context_json: Some("{}".to_string()),
                bundle_id: None,
                bundle_version: None,
            }),
            state_dir.path(),
        )
        .await
        .unwrap();
        assert_eq!(code, EXIT_USER_ERROR);
    }
}
