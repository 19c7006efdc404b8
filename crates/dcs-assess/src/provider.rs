//! # Extraction Provider Contract
//!
//! The provider is a black box with a single operation:
//! `extract(prompt, schema) → structured record`. Two implementations ship:
//!
//! - [`DeterministicFallbackProvider`] — never calls out; emits `Absent`
//!   with a fixed rationale. Used when no external provider is configured
//!   and by the regression harness.
//! - [`HttpSchemaProvider`] — calls an external schema-constrained endpoint
//!   at temperature zero. Retries are bounded and transport-only: a
//!   semantically valid (or invalid) response is never retried.
//!
//! Unknown response fields are ignored; missing required fields fail with a
//! schema violation. Responses are never "fixed up".

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::prompt::{ExtractionPrompt, PROMPT_TEMPLATE_VERSION};

/// Rationale emitted by the deterministic fallback provider.
pub const FALLBACK_RATIONALE: &str = "Deterministic local execution fallback.";

/// Identity of a provider. A first-class input to the run fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    /// Provider name, e.g. `deterministic-fallback`.
    pub name: String,
    /// Model identifier.
    pub model: String,
    /// Prompt template fingerprint.
    pub prompt_template_version: String,
}

/// Status vocabulary a provider may emit.
///
/// Deliberately narrower than the assessment status set: `Needs-Review` is
/// verifier-injected and a provider emitting it fails schema validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderStatus {
    /// Disclosure found with evidence.
    Present,
    /// Disclosure partially found with evidence.
    Partial,
    /// Disclosure not found.
    Absent,
    /// Datapoint not applicable.
    #[serde(rename = "NA")]
    NotApplicable,
}

/// The schema-constrained record a provider returns.
///
/// Extra fields in the provider response are ignored; missing required
/// fields (`status`, `rationale`) fail deserialization and surface as
/// [`ProviderError::Schema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    /// Extraction status.
    pub status: ProviderStatus,
    /// Extracted value, for metric datapoints.
    #[serde(default)]
    pub value: Option<String>,
    /// Extracted unit.
    #[serde(default)]
    pub unit: Option<String>,
    /// Extracted year.
    #[serde(default)]
    pub year: Option<i32>,
    /// Baseline year, when the datapoint requires a baseline.
    #[serde(default)]
    pub baseline_year: Option<i32>,
    /// Baseline value, when the datapoint requires a baseline.
    #[serde(default)]
    pub baseline_value: Option<String>,
    /// Evidence citations as raw chunk-id strings. Validated during
    /// verification, not parsing — an orphan citation is data, not a
    /// transport error.
    #[serde(default)]
    pub evidence_chunk_ids: Vec<String>,
    /// Rationale for the verdict.
    pub rationale: String,
}

/// Provider failures.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The response violated the output schema. Never retried.
    #[error("provider response violates schema: {0}")]
    Schema(String),

    /// Transport failure after exhausting the retry budget.
    #[error("provider transport failure: {0}")]
    Transport(String),

    /// The provider answered with a non-success HTTP status.
    #[error("provider returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Provider configuration is unusable.
    #[error("provider configuration error: {0}")]
    Config(String),
}

/// The single integration point with text-generation backends.
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    /// Provider identity for fingerprinting.
    fn identity(&self) -> ProviderIdentity;

    /// Extract a structured record for the prompt.
    async fn extract(&self, prompt: &ExtractionPrompt) -> Result<ProviderRecord, ProviderError>;
}

// ── Deterministic fallback ──────────────────────────────────────────────────

/// Zero-external-call provider: every datapoint is `Absent` with a fixed
/// rationale. Keeps the pipeline runnable (and byte-reproducible) with no
/// external dependency at all.
#[derive(Debug, Clone, Default)]
pub struct DeterministicFallbackProvider;

impl DeterministicFallbackProvider {
    /// Provider name used in identities and the API.
    pub const NAME: &'static str = "deterministic-fallback";
}

#[async_trait]
impl ExtractionProvider for DeterministicFallbackProvider {
    fn identity(&self) -> ProviderIdentity {
        ProviderIdentity {
            name: Self::NAME.to_string(),
            model: "deterministic-local-v1".to_string(),
            prompt_template_version: PROMPT_TEMPLATE_VERSION.to_string(),
        }
    }

    async fn extract(&self, _prompt: &ExtractionPrompt) -> Result<ProviderRecord, ProviderError> {
        Ok(ProviderRecord {
            status: ProviderStatus::Absent,
            value: None,
            unit: None,
            year: None,
            baseline_year: None,
            baseline_value: None,
            evidence_chunk_ids: vec![],
            rationale: FALLBACK_RATIONALE.to_string(),
        })
    }
}

// ── HTTP schema-constrained provider ────────────────────────────────────────

/// Configuration for the HTTP provider.
#[derive(Clone)]
pub struct HttpProviderConfig {
    /// Base URL of the extraction endpoint.
    pub base_url: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Model identifier sent with every request.
    pub model: String,
    /// Per-call timeout.
    pub timeout: Duration,
    /// Retry attempts on transport errors, after the initial request.
    pub max_retries: u32,
}

impl std::fmt::Debug for HttpProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8089".to_string(),
            api_key: None,
            model: "schema-extractor-v1".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// Schema-constrained provider speaking the `extract` HTTP contract.
///
/// Request body: `{model, prompt, temperature: 0, schema}` posted to
/// `<base_url>/v1/extract`. The response body must be the record JSON.
#[derive(Debug, Clone)]
pub struct HttpSchemaProvider {
    client: reqwest::Client,
    config: HttpProviderConfig,
}

/// Base delay between retries (doubles each attempt).
const BASE_RETRY_DELAY_MS: u64 = 200;

impl HttpSchemaProvider {
    /// Build a provider from configuration.
    pub fn new(config: HttpProviderConfig) -> Result<Self, ProviderError> {
        if config.base_url.trim().is_empty() {
            return Err(ProviderError::Config("base_url must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Config(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// JSON schema of the provider output. Sent with every request so the
    /// backend can constrain decoding.
    pub fn output_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["status", "rationale"],
            "properties": {
                "status": {"enum": ["Present", "Partial", "Absent", "NA"]},
                "value": {"type": ["string", "null"]},
                "unit": {"type": ["string", "null"]},
                "year": {"type": ["integer", "null"]},
                "baseline_year": {"type": ["integer", "null"]},
                "baseline_value": {"type": ["string", "null"]},
                "evidence_chunk_ids": {"type": "array", "items": {"type": "string"}},
                "rationale": {"type": "string", "minLength": 1}
            }
        })
    }

    /// Send with bounded exponential-backoff retry on transport errors only.
    async fn send_with_retry(
        &self,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/extract", self.config.base_url.trim_end_matches('/'));
        for attempt in 0..self.config.max_retries {
            match self.dispatch(&url, body).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    let delay = Duration::from_millis(BASE_RETRY_DELAY_MS * 2u64.pow(attempt));
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        "provider transport failure, retrying in {delay:?}: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
        // Final attempt, no more retries.
        self.dispatch(&url, body)
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))
    }

    async fn dispatch(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut request = self.client.post(url).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        request.send().await
    }
}

#[async_trait]
impl ExtractionProvider for HttpSchemaProvider {
    fn identity(&self) -> ProviderIdentity {
        ProviderIdentity {
            name: "http-schema".to_string(),
            model: self.config.model.clone(),
            prompt_template_version: PROMPT_TEMPLATE_VERSION.to_string(),
        }
    }

    async fn extract(&self, prompt: &ExtractionPrompt) -> Result<ProviderRecord, ProviderError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "input": prompt.render_text(),
            "temperature": 0,
            "schema": Self::output_schema(),
        });

        let response = self.send_with_retry(&body).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Schema(format!("response is not JSON: {e}")))?;
        serde_json::from_value::<ProviderRecord>(payload)
            .map_err(|e| ProviderError::Schema(e.to_string()))
    }
}

/// Cap an error body at 512 characters so provider failures cannot flood
/// logs. Character-based, so multi-byte UTF-8 never splits.
fn truncate_body(body: &str) -> String {
    body.chars().take(512).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcs_core::{DatapointKey, ObligationCode};
    use dcs_regulatory::{CompiledDatapoint, DatapointType};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prompt() -> ExtractionPrompt {
        let dp = CompiledDatapoint {
            datapoint_key: DatapointKey::new("ESRS-E1-1").unwrap(),
            obligation_code: ObligationCode::new("ESRS-E1").unwrap(),
            title: "Transition plan".to_string(),
            disclosure_reference: "ESRS E1-1".to_string(),
            datapoint_type: DatapointType::Narrative,
            requires_baseline: false,
            mandatory: true,
        };
        ExtractionPrompt::build(&dp, &[])
    }

    #[tokio::test]
    async fn fallback_provider_is_absent_with_fixed_rationale() {
        let provider = DeterministicFallbackProvider;
        let record = provider.extract(&prompt()).await.unwrap();
        assert_eq!(record.status, ProviderStatus::Absent);
        assert!(record.evidence_chunk_ids.is_empty());
        assert_eq!(record.rationale, FALLBACK_RATIONALE);
    }

    #[tokio::test]
    async fn fallback_identity_is_stable() {
        let identity = DeterministicFallbackProvider.identity();
        assert_eq!(identity.name, "deterministic-fallback");
        assert_eq!(identity.model, "deterministic-local-v1");
        assert_eq!(identity.prompt_template_version, PROMPT_TEMPLATE_VERSION);
    }

    #[tokio::test]
    async fn http_provider_parses_conformant_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/extract"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "Present",
                "value": "100",
                "unit": "tCO2e",
                "year": 2026,
                "evidence_chunk_ids": ["abc123"],
                "rationale": "found in chunk",
                "vendor_extra_field": {"ignored": true}
            })))
            .mount(&server)
            .await;

        let provider = HttpSchemaProvider::new(HttpProviderConfig {
            base_url: server.uri(),
            ..HttpProviderConfig::default()
        })
        .unwrap();

        let record = provider.extract(&prompt()).await.unwrap();
        assert_eq!(record.status, ProviderStatus::Present);
        assert_eq!(record.value.as_deref(), Some("100"));
        assert_eq!(record.evidence_chunk_ids, vec!["abc123".to_string()]);
    }

    #[tokio::test]
    async fn http_provider_rejects_missing_required_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/extract"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"value": "100"})),
            )
            .mount(&server)
            .await;

        let provider = HttpSchemaProvider::new(HttpProviderConfig {
            base_url: server.uri(),
            ..HttpProviderConfig::default()
        })
        .unwrap();

        match provider.extract(&prompt()).await {
            Err(ProviderError::Schema(_)) => {}
            other => panic!("expected Schema error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_provider_rejects_needs_review_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/extract"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "Needs-Review",
                "rationale": "provider should not emit this"
            })))
            .mount(&server)
            .await;

        let provider = HttpSchemaProvider::new(HttpProviderConfig {
            base_url: server.uri(),
            ..HttpProviderConfig::default()
        })
        .unwrap();

        assert!(matches!(
            provider.extract(&prompt()).await,
            Err(ProviderError::Schema(_))
        ));
    }

    #[tokio::test]
    async fn http_provider_surfaces_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/extract"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider = HttpSchemaProvider::new(HttpProviderConfig {
            base_url: server.uri(),
            ..HttpProviderConfig::default()
        })
        .unwrap();

        match provider.extract(&prompt()).await {
            Err(ProviderError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "overloaded");
            }
            other => panic!("expected Status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_failure_exhausts_retry_budget() {
        // Closed port: connection refused on every attempt.
        let provider = HttpSchemaProvider::new(HttpProviderConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout: Duration::from_millis(200),
            max_retries: 1,
            ..HttpProviderConfig::default()
        })
        .unwrap();

        assert!(matches!(
            provider.extract(&prompt()).await,
            Err(ProviderError::Transport(_))
        ));
    }

    #[test]
    fn error_body_truncation_respects_char_boundaries() {
        // Multi-byte characters straddling the cap must not split.
        let long = "é".repeat(600);
        let truncated = truncate_body(&long);
        assert_eq!(truncated.chars().count(), 512);
        assert_eq!(truncated, "é".repeat(512));
        assert_eq!(truncate_body("short"), "short");
    }

    #[tokio::test]
    async fn error_status_with_multibyte_body_does_not_panic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/extract"))
            .respond_with(ResponseTemplate::new(500).set_body_string("ü".repeat(600)))
            .mount(&server)
            .await;

        let provider = HttpSchemaProvider::new(HttpProviderConfig {
            base_url: server.uri(),
            ..HttpProviderConfig::default()
        })
        .unwrap();

        match provider.extract(&prompt()).await {
            Err(ProviderError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body.chars().count(), 512);
            }
            other => panic!("expected Status error, got {other:?}"),
        }
    }

    #[test]
    fn config_debug_redacts_api_key() {
        let config = HttpProviderConfig {
            api_key: Some("secret-key".to_string()),
            ..HttpProviderConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("REDACTED"));
    }
}
