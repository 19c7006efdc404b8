//! # Bundle Schema & Canonical Checksums
//!
//! Payload types for regulatory bundles plus the validation rules that
//! reject a bundle before it can reach the registry:
//!
//! - missing required fields (`regime`, `bundle_id`, `version`,
//!   `jurisdiction`, `obligations`),
//! - unknown enum values (handled at parse time by serde),
//! - applicability / phase-in expressions referencing non-whitelisted names,
//! - overlay operations targeting obligations that exist nowhere in the
//!   bundle.
//!
//! The checksum is SHA-256 over the canonical byte form of the payload, so
//! identical bytes across re-syncs always produce identical checksums.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dcs_core::{
    sha256_digest, CanonicalBytes, CanonicalizationError, ContentDigest, DatapointKey,
    ObligationCode,
};

use crate::eval;

/// A versioned regulatory bundle for one regime and jurisdiction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    /// Regulatory regime this bundle belongs to, e.g. `CSRD`.
    pub regime: String,
    /// Stable bundle identifier, e.g. `esrs_mini`.
    pub bundle_id: String,
    /// Bundle version, e.g. `2026.01`.
    pub version: String,
    /// Jurisdiction code, e.g. `EU`. `GLOBAL` applies everywhere.
    pub jurisdiction: String,
    /// Source record identifiers from the curation pipeline.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_record_ids: Vec<String>,
    /// Declared obligations.
    pub obligations: Vec<Obligation>,
    /// Applicability rules bound to obligations by code. Combined (AND)
    /// with any inline obligation applicability at compile time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applicability_rules: Vec<ApplicabilityRule>,
    /// Jurisdiction-scoped overlay operations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overlays: Vec<Overlay>,
}

/// A top-level applicability rule targeting one obligation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicabilityRule {
    /// Obligation the rule gates.
    pub obligation_code: ObligationCode,
    /// Expression over the whitelisted company context.
    pub expression: String,
}

/// A grouped set of datapoints; the unit of coverage reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obligation {
    /// Obligation code, e.g. `ESRS-E1`.
    pub obligation_code: ObligationCode,
    /// Human-readable title.
    pub title: String,
    /// Reference into the underlying standard, e.g. `ESRS E1 §44`.
    pub standard_reference: String,
    /// Standard/topic section used for coverage grouping, e.g. `E1`.
    #[serde(default = "default_section")]
    pub section: String,
    /// Materiality topic, if the obligation is gated on materiality.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Applicability expression over the company context; absent means
    /// always applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applicability: Option<String>,
    /// Datapoints evaluated under this obligation.
    #[serde(default)]
    pub datapoints: Vec<Datapoint>,
}

fn default_section() -> String {
    "Cross-cutting".to_string()
}

/// Whether a datapoint is narrative prose or a quantitative metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatapointType {
    /// Narrative disclosure; verified for citations only.
    Narrative,
    /// Quantitative metric; value, unit, and year are verified.
    Metric,
}

/// A single disclosure datapoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    /// Datapoint key, e.g. `ESRS-E1-6`.
    pub datapoint_key: DatapointKey,
    /// Human-readable title; used to build the retrieval query.
    pub title: String,
    /// Disclosure reference; appended to the retrieval query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disclosure_reference: Option<String>,
    /// Narrative or metric.
    #[serde(default = "default_datapoint_type")]
    pub datapoint_type: DatapointType,
    /// Metric datapoints may require a baseline year + value.
    #[serde(default)]
    pub requires_baseline: bool,
    /// Whether the datapoint counts toward obligation coverage.
    #[serde(default = "default_true")]
    pub mandatory: bool,
    /// Phase-in expression; when it evaluates false for the reporting year
    /// the datapoint is out of scope with reason `PHASE_IN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_in: Option<String>,
}

fn default_datapoint_type() -> DatapointType {
    DatapointType::Narrative
}

fn default_true() -> bool {
    true
}

/// Overlay operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayOp {
    /// Insert a new obligation.
    Add,
    /// Replace named fields on an existing obligation.
    Modify,
    /// Exclude an obligation with a recorded reason.
    Disable,
}

/// A jurisdiction-scoped modification applied on top of declared obligations.
///
/// Overlays are composed at compile time through an apply-list keyed by
/// `obligation_code`; the loaded bundle itself is never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overlay {
    /// Jurisdiction this overlay belongs to; drives apply ordering.
    pub jurisdiction: String,
    /// Operation kind.
    pub op: OverlayOp,
    /// Target obligation code.
    pub obligation_code: ObligationCode,
    /// Full obligation payload, required for `add`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obligation: Option<Obligation>,
    /// Replacement title, for `modify`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Replacement standard reference, for `modify`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_reference: Option<String>,
    /// Reason recorded when disabling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Reference to a bundle at an exact version and checksum. The unit the run
/// fingerprint pins.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BundleRef {
    /// Bundle identifier.
    pub bundle_id: String,
    /// Bundle version.
    pub version: String,
    /// Canonical payload checksum.
    pub checksum: String,
}

/// Bundle validation and parsing failures.
#[derive(Error, Debug)]
pub enum BundleError {
    /// A required field is empty.
    #[error("bundle field must not be empty: {0}")]
    EmptyField(&'static str),

    /// The payload did not parse against the schema.
    #[error("bundle payload does not match schema: {0}")]
    Schema(#[from] serde_json::Error),

    /// Two obligations share a code.
    #[error("duplicate obligation code: {0}")]
    DuplicateObligation(ObligationCode),

    /// Two datapoints share a key.
    #[error("duplicate datapoint key: {0}")]
    DuplicateDatapoint(DatapointKey),

    /// An applicability or phase-in expression failed static validation.
    #[error("invalid expression for {owner}: {source}")]
    InvalidExpression {
        /// Obligation code or datapoint key that owns the expression.
        owner: String,
        /// Underlying evaluator error.
        source: eval::EvalError,
    },

    /// An `add` overlay has no obligation payload.
    #[error("add overlay for {0} is missing its obligation payload")]
    AddOverlayMissingPayload(ObligationCode),

    /// A `modify`/`disable` overlay targets an obligation that exists
    /// nowhere in the bundle.
    #[error("overlay targets unknown obligation: {0}")]
    UnknownOverlayTarget(ObligationCode),

    /// An applicability rule targets an obligation that exists nowhere in
    /// the bundle.
    #[error("applicability rule targets unknown obligation: {0}")]
    UnknownRuleTarget(ObligationCode),

    /// Canonicalization failed while computing the checksum.
    #[error("checksum computation failed: {0}")]
    Checksum(#[from] CanonicalizationError),
}

/// Compute the canonical checksum of a bundle payload.
pub fn bundle_checksum(bundle: &Bundle) -> Result<ContentDigest, BundleError> {
    let canonical = CanonicalBytes::new(bundle)?;
    Ok(sha256_digest(&canonical))
}

/// Validate a parsed bundle against the schema rules.
pub fn validate_bundle(bundle: &Bundle) -> Result<(), BundleError> {
    if bundle.regime.trim().is_empty() {
        return Err(BundleError::EmptyField("regime"));
    }
    if bundle.bundle_id.trim().is_empty() {
        return Err(BundleError::EmptyField("bundle_id"));
    }
    if bundle.version.trim().is_empty() {
        return Err(BundleError::EmptyField("version"));
    }
    if bundle.jurisdiction.trim().is_empty() {
        return Err(BundleError::EmptyField("jurisdiction"));
    }

    let mut obligation_codes = std::collections::BTreeSet::new();
    let mut datapoint_keys = std::collections::BTreeSet::new();

    for obligation in &bundle.obligations {
        validate_obligation(obligation, &mut obligation_codes, &mut datapoint_keys)?;
    }

    for overlay in &bundle.overlays {
        match overlay.op {
            OverlayOp::Add => {
                let payload = overlay.obligation.as_ref().ok_or_else(|| {
                    BundleError::AddOverlayMissingPayload(overlay.obligation_code.clone())
                })?;
                validate_obligation(payload, &mut obligation_codes, &mut datapoint_keys)?;
            }
            OverlayOp::Modify | OverlayOp::Disable => {
                if !obligation_codes.contains(&overlay.obligation_code) {
                    return Err(BundleError::UnknownOverlayTarget(
                        overlay.obligation_code.clone(),
                    ));
                }
            }
        }
    }

    for rule in &bundle.applicability_rules {
        if !obligation_codes.contains(&rule.obligation_code) {
            return Err(BundleError::UnknownRuleTarget(rule.obligation_code.clone()));
        }
        eval::validate(&rule.expression).map_err(|source| BundleError::InvalidExpression {
            owner: rule.obligation_code.to_string(),
            source,
        })?;
    }

    Ok(())
}

fn validate_obligation(
    obligation: &Obligation,
    obligation_codes: &mut std::collections::BTreeSet<ObligationCode>,
    datapoint_keys: &mut std::collections::BTreeSet<DatapointKey>,
) -> Result<(), BundleError> {
    if obligation.title.trim().is_empty() {
        return Err(BundleError::EmptyField("obligation.title"));
    }
    if obligation.standard_reference.trim().is_empty() {
        return Err(BundleError::EmptyField("obligation.standard_reference"));
    }
    if !obligation_codes.insert(obligation.obligation_code.clone()) {
        return Err(BundleError::DuplicateObligation(
            obligation.obligation_code.clone(),
        ));
    }
    if let Some(expr) = &obligation.applicability {
        eval::validate(expr).map_err(|source| BundleError::InvalidExpression {
            owner: obligation.obligation_code.to_string(),
            source,
        })?;
    }
    for datapoint in &obligation.datapoints {
        if datapoint.title.trim().is_empty() {
            return Err(BundleError::EmptyField("datapoint.title"));
        }
        if !datapoint_keys.insert(datapoint.datapoint_key.clone()) {
            return Err(BundleError::DuplicateDatapoint(
                datapoint.datapoint_key.clone(),
            ));
        }
        if let Some(expr) = &datapoint.phase_in {
            eval::validate(expr).map_err(|source| BundleError::InvalidExpression {
                owner: datapoint.datapoint_key.to_string(),
                source,
            })?;
        }
    }
    Ok(())
}

/// Parse and validate a bundle from a JSON payload.
pub fn parse_bundle(payload: &str) -> Result<Bundle, BundleError> {
    let bundle: Bundle = serde_json::from_str(payload)?;
    validate_bundle(&bundle)?;
    Ok(bundle)
}
