//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers via
//! the `State` extractor.
//!
//! ## Architecture
//!
//! In-memory stores hold the serving-layer records (companies, document
//! metadata, runs); document bytes live in the content-addressed
//! [`DocumentStore`]; run outputs, events, and the run-hash cache are held
//! in dedicated maps. All locks are `parking_lot` and are never held across
//! an `.await` point.
//!
//! Every record carries its `tenant_id`; handlers filter by the caller's
//! tenant and answer 404 for anything outside it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use dcs_core::DocHash;
use dcs_ingest::{ChunkParams, DocumentStore};
use dcs_regulatory::BundleRegistry;
use dcs_retrieval::IndexedChunk;
use dcs_run::{CompanyProfileSnapshot, RunCache, RunEvent, RunOutput, RunStatus};

use crate::discovery::SearchClient;

// ── Generic In-Memory Store ─────────────────────────────────────────────────

/// Thread-safe, cloneable in-memory key-value store.
///
/// All operations are synchronous (`parking_lot::RwLock`, not `tokio::sync`)
/// because the lock is never held across an `.await` point, and the lock is
/// non-poisonable.
#[derive(Debug)]
pub struct Store<T: Clone + Send + Sync> {
    data: Arc<RwLock<HashMap<Uuid, T>>>,
}

impl<T: Clone + Send + Sync> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: Clone + Send + Sync> Store<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a record, returning the previous value if the key existed.
    pub fn insert(&self, id: Uuid, value: T) -> Option<T> {
        self.data.write().insert(id, value)
    }

    /// Retrieve a record by ID.
    pub fn get(&self, id: &Uuid) -> Option<T> {
        self.data.read().get(id).cloned()
    }

    /// List all records.
    pub fn list(&self) -> Vec<T> {
        self.data.read().values().cloned().collect()
    }

    /// Update a record in place. Returns the updated record, or `None`.
    pub fn update(&self, id: &Uuid, f: impl FnOnce(&mut T)) -> Option<T> {
        let mut guard = self.data.write();
        if let Some(entry) = guard.get_mut(id) {
            f(entry);
            Some(entry.clone())
        } else {
            None
        }
    }

    /// Find the first record matching a predicate.
    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        self.data.read().values().find(|v| predicate(v)).cloned()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Records ─────────────────────────────────────────────────────────────────

/// Company profile record.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CompanyRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub employees: Option<i64>,
    pub turnover: Option<f64>,
    pub listed_status: Option<bool>,
    pub reporting_year: Option<i64>,
    pub reporting_year_start: Option<String>,
    pub reporting_year_end: Option<String>,
    /// Jurisdiction codes the company operates in.
    pub jurisdictions: Vec<String>,
    /// Regimes the company declares itself in scope for.
    pub regimes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CompanyRecord {
    /// Snapshot used for run fingerprinting. Lists are sorted so profile
    /// field order can never move a run hash.
    pub fn snapshot(&self) -> CompanyProfileSnapshot {
        let mut jurisdictions = self.jurisdictions.clone();
        jurisdictions.sort();
        let mut regimes = self.regimes.clone();
        regimes.sort();
        CompanyProfileSnapshot {
            name: self.name.clone(),
            employees: self.employees,
            turnover: self.turnover,
            listed_status: self.listed_status,
            reporting_year: self.reporting_year,
            reporting_year_start: self.reporting_year_start.clone(),
            reporting_year_end: self.reporting_year_end.clone(),
            jurisdictions,
            regimes,
        }
    }
}

/// Document metadata record (bytes live in the content-addressed store).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub title: String,
    /// Content hash; the document's identity.
    pub doc_hash: String,
    pub size: usize,
    pub content_type: String,
    /// Parser version of the last successful extraction.
    pub parser_version: String,
    pub page_count: usize,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Run record.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RunRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub company_id: Uuid,
    #[schema(value_type = String)]
    pub status: RunStatus,
    pub compiler_mode: String,
    pub provider_id: Option<String>,
    pub bundle_id: Option<String>,
    pub bundle_version: Option<String>,
    pub run_hash: Option<String>,
    pub cache_hit: Option<bool>,
    /// Single reason code from the taxonomy, on failure.
    pub failure_code: Option<String>,
    /// One-line failure explanation.
    pub failure_message: Option<String>,
    /// Materiality snapshot captured at run creation.
    pub materiality: BTreeMap<String, bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Company-document links ──────────────────────────────────────────────────

/// The `(tenant, company, doc_hash)` relation granting retrieval access.
///
/// A document may be linked to multiple companies; retrieval is always
/// company-scoped through this set, never tenant-wide.
#[derive(Debug, Clone, Default)]
pub struct LinkSet {
    links: Arc<RwLock<BTreeSet<(String, Uuid, String)>>>,
}

impl LinkSet {
    /// Create an empty link set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Link a document to a company. Idempotent.
    pub fn link(&self, tenant: &str, company_id: Uuid, doc_hash: &DocHash) {
        self.links.write().insert((
            tenant.to_string(),
            company_id,
            doc_hash.as_str().to_string(),
        ));
    }

    /// Whether a link exists.
    pub fn is_linked(&self, tenant: &str, company_id: Uuid, doc_hash: &DocHash) -> bool {
        self.links.read().contains(&(
            tenant.to_string(),
            company_id,
            doc_hash.as_str().to_string(),
        ))
    }

    /// Sorted document hashes linked to a company.
    pub fn company_doc_hashes(&self, tenant: &str, company_id: Uuid) -> Vec<DocHash> {
        self.links
            .read()
            .iter()
            .filter(|(t, c, _)| t == tenant && *c == company_id)
            .filter_map(|(_, _, h)| DocHash::new(h.clone()).ok())
            .collect()
    }
}

// ── Chunk index ─────────────────────────────────────────────────────────────

/// In-memory retrieval index: chunks per document, in
/// `(page, start_offset)` order.
#[derive(Debug, Clone, Default)]
pub struct ChunkIndex {
    chunks: Arc<RwLock<HashMap<String, Vec<IndexedChunk>>>>,
}

impl ChunkIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a document's chunks. Idempotent for identical
    /// bytes and parameters because chunk ids are content-derived.
    pub fn insert_document(&self, doc_hash: &DocHash, chunks: Vec<IndexedChunk>) {
        self.chunks
            .write()
            .insert(doc_hash.as_str().to_string(), chunks);
    }

    /// Chunks for a set of documents, ordered by
    /// `(doc_hash, page, start_offset)`.
    pub fn chunks_for(&self, doc_hashes: &[DocHash]) -> Vec<IndexedChunk> {
        let guard = self.chunks.read();
        let mut sorted_hashes: Vec<&DocHash> = doc_hashes.iter().collect();
        sorted_hashes.sort();
        let mut out = Vec::new();
        for hash in sorted_hashes {
            if let Some(chunks) = guard.get(hash.as_str()) {
                out.extend(chunks.iter().cloned());
            }
        }
        out
    }

    /// Chunk count for one document.
    pub fn count_for(&self, doc_hash: &DocHash) -> usize {
        self.chunks
            .read()
            .get(doc_hash.as_str())
            .map(Vec::len)
            .unwrap_or(0)
    }
}

// ── Configuration ───────────────────────────────────────────────────────────

/// Application configuration.
///
/// Custom `Debug` redacts API keys.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Tenant → API key map. Empty disables the key check.
    pub api_keys: HashMap<String, String>,
    /// Root directory of the content-addressed document store.
    pub storage_root: PathBuf,
    /// Chunking parameters.
    pub chunk_params: ChunkParams,
    /// Retrieved chunks per datapoint.
    pub top_k: usize,
    /// Diagnostic failure rate above which a run is `integrity_warning`.
    pub failure_rate_threshold: f64,
    /// Hard per-datapoint extraction timeout.
    pub datapoint_timeout: Duration,
    /// Maximum accepted document size in bytes.
    pub max_document_bytes: usize,
    /// Code version (git SHA) recorded in fingerprints.
    pub code_version: String,
    /// Base URL of the external extraction provider, if configured.
    pub provider_base_url: Option<String>,
    /// Model requested from the external provider.
    pub provider_model: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("tenants", &self.api_keys.keys().collect::<Vec<_>>())
            .field("api_keys", &"[REDACTED]")
            .field("storage_root", &self.storage_root)
            .field("chunk_params", &self.chunk_params)
            .field("top_k", &self.top_k)
            .field("failure_rate_threshold", &self.failure_rate_threshold)
            .field("datapoint_timeout", &self.datapoint_timeout)
            .field("max_document_bytes", &self.max_document_bytes)
            .field("code_version", &self.code_version)
            .field("provider_base_url", &self.provider_base_url)
            .field("provider_model", &self.provider_model)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            api_keys: HashMap::new(),
            storage_root: std::env::temp_dir().join("dcs-documents"),
            chunk_params: ChunkParams::default(),
            top_k: 5,
            failure_rate_threshold: 0.5,
            datapoint_timeout: Duration::from_secs(60),
            max_document_bytes: 50 * 1024 * 1024,
            code_version: "unversioned".to_string(),
            provider_base_url: None,
            provider_model: "schema-extractor-v1".to_string(),
        }
    }
}

impl AppConfig {
    /// Build configuration from environment variables.
    ///
    /// `DCS_API_KEYS` holds `tenant:key` pairs separated by commas.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                config.port = port;
            }
        }
        if let Ok(raw) = std::env::var("DCS_API_KEYS") {
            for pair in raw.split(',') {
                if let Some((tenant, key)) = pair.split_once(':') {
                    if !tenant.trim().is_empty() && !key.trim().is_empty() {
                        config
                            .api_keys
                            .insert(tenant.trim().to_string(), key.trim().to_string());
                    }
                }
            }
        }
        if let Ok(root) = std::env::var("DCS_STORAGE_ROOT") {
            config.storage_root = PathBuf::from(root);
        }
        if let Ok(sha) = std::env::var("DCS_CODE_VERSION") {
            config.code_version = sha;
        }
        if let Ok(url) = std::env::var("DCS_PROVIDER_BASE_URL") {
            config.provider_base_url = Some(url);
        }
        if let Ok(model) = std::env::var("DCS_PROVIDER_MODEL") {
            config.provider_model = model;
        }
        config
    }
}

// ── Application State ───────────────────────────────────────────────────────

/// Shared application state accessible to all route handlers.
/// Clone-friendly via `Arc` internals.
#[derive(Clone)]
pub struct AppState {
    /// Company profiles.
    pub companies: Store<CompanyRecord>,
    /// Document metadata.
    pub documents: Store<DocumentRecord>,
    /// Company-document links.
    pub links: LinkSet,
    /// Content-addressed document bytes.
    pub document_store: DocumentStore,
    /// Retrieval index.
    pub chunk_index: ChunkIndex,
    /// Runs.
    pub runs: Store<RunRecord>,
    /// Full outputs of terminal runs, keyed by run id.
    pub artifacts: Arc<RwLock<HashMap<Uuid, RunOutput>>>,
    /// Event logs, keyed by run id (present for failed runs too).
    pub run_events: Arc<RwLock<HashMap<Uuid, Vec<RunEvent>>>>,
    /// Cancellation flags for in-flight runs.
    pub cancellations: Arc<RwLock<HashMap<Uuid, Arc<AtomicBool>>>>,
    /// Bundle registry.
    pub registry: BundleRegistry,
    /// Run-hash output cache.
    pub run_cache: RunCache,
    /// Optional web-search client for document auto-discovery.
    pub search_client: Option<Arc<dyn SearchClient>>,
    /// Configuration.
    pub config: AppConfig,
}

impl AppState {
    /// Create application state with the given configuration.
    pub fn with_config(config: AppConfig) -> Result<Self, std::io::Error> {
        let document_store = DocumentStore::open(&config.storage_root)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        Ok(Self {
            companies: Store::new(),
            documents: Store::new(),
            links: LinkSet::new(),
            document_store,
            chunk_index: ChunkIndex::new(),
            runs: Store::new(),
            artifacts: Arc::new(RwLock::new(HashMap::new())),
            run_events: Arc::new(RwLock::new(HashMap::new())),
            cancellations: Arc::new(RwLock::new(HashMap::new())),
            registry: BundleRegistry::new(),
            run_cache: RunCache::new(),
            search_client: None,
            config,
        })
    }

    /// Fetch a company, scoped to the caller's tenant. Cross-tenant lookups
    /// answer `None`, which handlers surface as 404.
    pub fn company_for_tenant(&self, tenant: &str, id: &Uuid) -> Option<CompanyRecord> {
        self.companies
            .get(id)
            .filter(|c| c.tenant_id == tenant)
    }

    /// Fetch a run, scoped to the caller's tenant.
    pub fn run_for_tenant(&self, tenant: &str, id: &Uuid) -> Option<RunRecord> {
        self.runs.get(id).filter(|r| r.tenant_id == tenant)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("companies", &self.companies.len())
            .field("documents", &self.documents.len())
            .field("runs", &self.runs.len())
            .field("config", &self.config)
            .finish()
    }
}
