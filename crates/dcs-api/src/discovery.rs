//! # Document Auto-Discovery
//!
//! Optional web discovery of ESG reporting documents. The external search
//! service is a black box behind the [`SearchClient`] trait: it returns
//! `(url, title, score)` candidates and downloads them. Everything
//! decision-shaped — PDF-only filtering, size limits, rejection reasons —
//! lives here and is deterministic.
//!
//! Auto-discovery is never on the scoring path: it only feeds the same
//! ingestion pipeline manual uploads use.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// One search candidate from the external client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SearchCandidate {
    /// Candidate title.
    pub title: String,
    /// Candidate URL.
    pub url: String,
    /// Relevance score reported by the search service.
    pub score: f64,
}

/// A downloaded discovery document.
#[derive(Debug, Clone)]
pub struct DownloadedDocument {
    /// Raw bytes.
    pub content: Vec<u8>,
    /// Filename derived from the URL.
    pub filename: String,
    /// Candidate title.
    pub title: String,
    /// Source URL.
    pub source_url: String,
}

/// Discovery failures.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The search service is unreachable or answered with an error.
    #[error("search client failure: {0}")]
    Client(String),

    /// A download failed.
    #[error("download failed for {url}: {reason}")]
    Download {
        /// Candidate URL.
        url: String,
        /// Failure detail.
        reason: String,
    },
}

/// Why a candidate was rejected instead of ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    /// The URL does not point to a PDF.
    NotPdf,
    /// The download failed.
    DownloadFailed,
    /// The payload exceeded the configured size limit.
    TooLarge,
    /// The payload was empty or not a PDF on inspection.
    Empty,
    /// The document is already linked to the company.
    Duplicate,
}

/// The external web-search contract.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Search for reporting documents of a company.
    async fn search(
        &self,
        company_name: &str,
        reporting_year: Option<i64>,
        max_results: usize,
    ) -> Result<Vec<SearchCandidate>, DiscoveryError>;

    /// Download one candidate.
    async fn download(
        &self,
        candidate: &SearchCandidate,
    ) -> Result<DownloadedDocument, DiscoveryError>;
}

/// Deterministic search query for a company's reporting documents.
pub fn build_search_query(company_name: &str, reporting_year: Option<i64>) -> String {
    let year = reporting_year
        .map(|y| y.to_string())
        .unwrap_or_else(|| "latest".to_string());
    format!(
        "{company_name} sustainability report {year} pdf esg annual report non-financial statement"
    )
}

/// Keep only `.pdf` candidates and order them deterministically
/// (descending score, then URL).
pub fn filter_pdf_candidates(
    candidates: Vec<SearchCandidate>,
) -> (Vec<SearchCandidate>, Vec<(SearchCandidate, RejectionReason)>) {
    let mut kept = Vec::new();
    let mut rejected = Vec::new();
    for candidate in candidates {
        let is_http = candidate.url.starts_with("http://") || candidate.url.starts_with("https://");
        let path = candidate.url.split(['?', '#']).next().unwrap_or("");
        if is_http && path.to_lowercase().ends_with(".pdf") {
            kept.push(candidate);
        } else {
            rejected.push((candidate, RejectionReason::NotPdf));
        }
    }
    kept.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.url.cmp(&b.url))
    });
    (kept, rejected)
}

/// Validate downloaded content before it may enter ingestion.
pub fn validate_download(content: &[u8], max_bytes: usize) -> Result<(), RejectionReason> {
    if content.is_empty() {
        return Err(RejectionReason::Empty);
    }
    if content.len() > max_bytes {
        return Err(RejectionReason::TooLarge);
    }
    if !content.starts_with(b"%PDF-") {
        return Err(RejectionReason::Empty);
    }
    Ok(())
}

/// Derive a filename from a candidate URL.
pub fn filename_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or("");
    let basename = path.rsplit('/').next().unwrap_or("").trim();
    if basename.is_empty() {
        "discovered-document.pdf".to_string()
    } else {
        basename.to_string()
    }
}

// ── HTTP search client ──────────────────────────────────────────────────────

/// Configuration for the HTTP search client.
#[derive(Clone)]
pub struct HttpSearchConfig {
    /// Search endpoint URL.
    pub base_url: String,
    /// API key for the search service.
    pub api_key: String,
    /// Per-call timeout.
    pub timeout: std::time::Duration,
    /// Maximum document size accepted for download.
    pub max_document_bytes: usize,
}

impl std::fmt::Debug for HttpSearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSearchConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .field("max_document_bytes", &self.max_document_bytes)
            .finish()
    }
}

/// Search client speaking a JSON POST contract:
/// `{api_key, query, max_results}` → `{results: [{title, url, score}]}`.
#[derive(Debug)]
pub struct HttpSearchClient {
    client: reqwest::Client,
    config: HttpSearchConfig,
}

impl HttpSearchClient {
    /// Build a client from configuration.
    pub fn new(config: HttpSearchConfig) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DiscoveryError::Client(e.to_string()))?;
        Ok(Self { client, config })
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResponseItem>,
}

#[derive(Debug, Deserialize)]
struct SearchResponseItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    score: f64,
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn search(
        &self,
        company_name: &str,
        reporting_year: Option<i64>,
        max_results: usize,
    ) -> Result<Vec<SearchCandidate>, DiscoveryError> {
        let query = build_search_query(company_name, reporting_year);
        let response = self
            .client
            .post(&self.config.base_url)
            .json(&serde_json::json!({
                "api_key": self.config.api_key,
                "query": query,
                "max_results": max_results,
            }))
            .send()
            .await
            .map_err(|e| DiscoveryError::Client(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Client(format!(
                "search service returned {}",
                response.status()
            )));
        }
        let payload: SearchResponse = response
            .json()
            .await
            .map_err(|e| DiscoveryError::Client(e.to_string()))?;
        Ok(payload
            .results
            .into_iter()
            .map(|item| SearchCandidate {
                title: if item.title.trim().is_empty() {
                    "Discovered ESG Document".to_string()
                } else {
                    item.title.trim().to_string()
                },
                url: item.url.trim().to_string(),
                score: item.score,
            })
            .collect())
    }

    async fn download(
        &self,
        candidate: &SearchCandidate,
    ) -> Result<DownloadedDocument, DiscoveryError> {
        let response = self
            .client
            .get(&candidate.url)
            .send()
            .await
            .map_err(|e| DiscoveryError::Download {
                url: candidate.url.clone(),
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Download {
                url: candidate.url.clone(),
                reason: format!("status {}", response.status()),
            });
        }
        let content = response
            .bytes()
            .await
            .map_err(|e| DiscoveryError::Download {
                url: candidate.url.clone(),
                reason: e.to_string(),
            })?
            .to_vec();
        Ok(DownloadedDocument {
            filename: filename_from_url(&candidate.url),
            title: candidate.title.clone(),
            source_url: candidate.url.clone(),
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(url: &str, score: f64) -> SearchCandidate {
        SearchCandidate {
            title: "t".to_string(),
            url: url.to_string(),
            score,
        }
    }

    #[test]
    fn query_includes_company_and_year() {
        let query = build_search_query("Acme Renewables", Some(2026));
        assert!(query.contains("Acme Renewables"));
        assert!(query.contains("2026"));
        assert!(build_search_query("Acme", None).contains("latest"));
    }

    #[test]
    fn non_pdf_candidates_rejected() {
        let (kept, rejected) = filter_pdf_candidates(vec![
            candidate("https://acme.example/report.pdf", 0.9),
            candidate("https://acme.example/report.html", 0.95),
            candidate("ftp://acme.example/report.pdf", 0.8),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].url, "https://acme.example/report.pdf");
        assert_eq!(rejected.len(), 2);
        assert!(rejected
            .iter()
            .all(|(_, reason)| *reason == RejectionReason::NotPdf));
    }

    #[test]
    fn candidates_ordered_by_score_then_url() {
        let (kept, _) = filter_pdf_candidates(vec![
            candidate("https://b.example/r.pdf", 0.5),
            candidate("https://a.example/r.pdf", 0.5),
            candidate("https://c.example/r.pdf", 0.9),
        ]);
        let urls: Vec<&str> = kept.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://c.example/r.pdf",
                "https://a.example/r.pdf",
                "https://b.example/r.pdf",
            ]
        );
    }

    #[test]
    fn query_strings_do_not_defeat_pdf_check() {
        let (kept, _) =
            filter_pdf_candidates(vec![candidate("https://x.example/r.pdf?dl=1", 0.5)]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn download_validation() {
        assert_eq!(validate_download(b"", 100), Err(RejectionReason::Empty));
        assert_eq!(
            validate_download(b"%PDF-1.7 content", 4),
            Err(RejectionReason::TooLarge)
        );
        assert_eq!(
            validate_download(b"<html>not a pdf</html>", 100),
            Err(RejectionReason::Empty)
        );
        assert!(validate_download(b"%PDF-1.7 content", 100).is_ok());
    }

    #[test]
    fn filename_derivation() {
        assert_eq!(
            filename_from_url("https://x.example/a/b/annual-2026.pdf"),
            "annual-2026.pdf"
        );
        assert_eq!(
            filename_from_url("https://x.example/a/b/annual.pdf?v=2"),
            "annual.pdf"
        );
        assert_eq!(filename_from_url("https://x.example/"), "discovered-document.pdf");
    }
}
