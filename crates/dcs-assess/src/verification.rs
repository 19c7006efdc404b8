//! # Verification / Downgrade Engine
//!
//! Every Present/Partial candidate passes through here before persistence.
//! Checks run in a fixed order and every decision is recorded — downgrades
//! are never hidden.
//!
//! 1. **Citation existence** — every cited chunk must exist in the retrieved
//!    set with non-empty text. Any citation failure drops the status
//!    straight to `Absent`; the evidence-gating invariant admits no partial
//!    credit for phantom evidence.
//! 2. **Metric checks** — metric datapoints must carry value, unit, and
//!    year. The numeric value must appear in cited evidence under the
//!    tolerant match (digit-sequence equality ignoring thousand separators;
//!    percent⇔fraction equivalence handled explicitly). The unit must be in
//!    the controlled vocabulary. The year must appear in cited evidence.
//! 3. **Baseline checks** — `requires_baseline` demands both baseline year
//!    and value. A present-but-unevidenced baseline value is flagged
//!    `Needs-Review` rather than downgraded: the citation is real, the
//!    number is not independently confirmable.
//!
//! Each failed check is one strike on the downgrade ladder:
//! `Present → Partial → Absent`.

use std::collections::BTreeMap;

use crate::provider::{ProviderRecord, ProviderStatus};
use crate::types::{AssessmentStatus, FailureReason, VerificationStatus};
use dcs_regulatory::DatapointType;

/// Input to verification for one datapoint.
#[derive(Debug)]
pub struct VerificationInput<'a> {
    /// The (possibly gated) provider record.
    pub record: &'a ProviderRecord,
    /// Narrative or metric.
    pub datapoint_type: DatapointType,
    /// Whether a baseline is required.
    pub requires_baseline: bool,
    /// Retrieved chunks by id — the universe a citation may refer to.
    pub chunks: &'a BTreeMap<String, String>,
}

/// Outcome of verification.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationOutcome {
    /// Final status after any downgrade.
    pub status: AssessmentStatus,
    /// Rationale with downgrade detail appended.
    pub rationale: String,
    /// Every failure, in check order.
    pub failures: Vec<FailureReason>,
    /// Count of numeric tokens confirmed in cited evidence.
    pub numeric_matches_found: u32,
    /// How verification concluded.
    pub verification_status: VerificationStatus,
}

fn provider_status_to_assessment(status: ProviderStatus) -> AssessmentStatus {
    match status {
        ProviderStatus::Present => AssessmentStatus::Present,
        ProviderStatus::Partial => AssessmentStatus::Partial,
        ProviderStatus::Absent => AssessmentStatus::Absent,
        ProviderStatus::NotApplicable => AssessmentStatus::NotApplicable,
    }
}

/// One step down the ladder.
fn downgrade(status: AssessmentStatus) -> AssessmentStatus {
    match status {
        AssessmentStatus::Present => AssessmentStatus::Partial,
        AssessmentStatus::Partial => AssessmentStatus::Absent,
        other => other,
    }
}

/// Verify a candidate record against its cited evidence.
pub fn verify(input: &VerificationInput<'_>) -> VerificationOutcome {
    let record = input.record;
    let status = provider_status_to_assessment(record.status);

    if !status.requires_evidence() {
        return VerificationOutcome {
            status,
            rationale: record.rationale.clone(),
            failures: vec![],
            numeric_matches_found: 0,
            verification_status: VerificationStatus::Verified,
        };
    }

    let mut failures: Vec<FailureReason> = Vec::new();
    let mut details: Vec<String> = Vec::new();

    // ── Citation existence ──────────────────────────────────────────
    let mut citation_failure = false;
    for cited in &record.evidence_chunk_ids {
        match input.chunks.get(cited) {
            None => {
                citation_failure = true;
                failures.push(FailureReason::ChunkNotFound);
                details.push(format!("cited chunk not found: {cited}"));
            }
            Some(text) if text.is_empty() => {
                citation_failure = true;
                failures.push(FailureReason::EmptyChunk);
                details.push(format!("cited chunk has empty text: {cited}"));
            }
            Some(_) => {}
        }
    }

    if citation_failure {
        details.sort();
        return VerificationOutcome {
            status: AssessmentStatus::Absent,
            rationale: downgraded_rationale(&record.rationale, &details),
            failures,
            numeric_matches_found: 0,
            verification_status: VerificationStatus::Downgraded,
        };
    }

    // Text of all validly cited chunks, the match universe for numerics.
    let cited_text: String = record
        .evidence_chunk_ids
        .iter()
        .filter_map(|id| input.chunks.get(id).map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    let cited_numbers = extract_numbers(&cited_text);

    let mut numeric_matches_found = 0u32;
    let mut needs_review_detail: Option<String> = None;

    // ── Metric checks ───────────────────────────────────────────────
    if input.datapoint_type == DatapointType::Metric {
        match &record.value {
            None => {
                failures.push(FailureReason::NumericMismatch);
                details.push("metric value missing".to_string());
            }
            Some(value) => {
                let unit = record.unit.as_deref().and_then(normalize_unit);
                for token in extract_numbers(value) {
                    if number_matches(&token, unit, &cited_numbers) {
                        numeric_matches_found += 1;
                    } else {
                        failures.push(FailureReason::NumericMismatch);
                        details.push(format!("numeric value not found in evidence: {token}"));
                    }
                }
            }
        }

        match record.unit.as_deref() {
            None => {
                failures.push(FailureReason::UnitMismatch);
                details.push("metric unit missing".to_string());
            }
            Some(unit) if normalize_unit(unit).is_none() => {
                failures.push(FailureReason::UnitMismatch);
                details.push(format!("unit not in controlled vocabulary: {unit}"));
            }
            Some(_) => {}
        }

        match record.year {
            None => {
                failures.push(FailureReason::YearMissing);
                details.push("metric year missing".to_string());
            }
            Some(year) => {
                if !cited_text.contains(&year.to_string()) {
                    failures.push(FailureReason::YearMissing);
                    details.push(format!("year not found in evidence: {year}"));
                }
            }
        }
    }

    // ── Baseline checks ─────────────────────────────────────────────
    if input.requires_baseline {
        match (&record.baseline_year, &record.baseline_value) {
            (Some(_), Some(baseline_value)) => {
                let matched = extract_numbers(baseline_value)
                    .iter()
                    .all(|token| number_matches(token, None, &cited_numbers));
                if matched {
                    numeric_matches_found += 1;
                } else {
                    // Evidence is real but the baseline number is not
                    // independently confirmable: flag for review instead of
                    // downgrading.
                    needs_review_detail = Some(format!(
                        "baseline value not found in cited evidence: {baseline_value}"
                    ));
                }
            }
            _ => {
                failures.push(FailureReason::BaselineMissing);
                details.push("baseline year and value are required".to_string());
            }
        }
    }

    if failures.is_empty() {
        if let Some(detail) = needs_review_detail {
            return VerificationOutcome {
                status: AssessmentStatus::NeedsReview,
                rationale: format!("{} Flagged for review: {detail}.", record.rationale),
                failures: vec![],
                numeric_matches_found,
                verification_status: VerificationStatus::Downgraded,
            };
        }
        return VerificationOutcome {
            status,
            rationale: record.rationale.clone(),
            failures: vec![],
            numeric_matches_found,
            verification_status: VerificationStatus::Verified,
        };
    }

    // One strike per failed check, floor at Absent.
    let mut final_status = status;
    for _ in 0..failures.len() {
        final_status = downgrade(final_status);
    }
    details.sort();

    VerificationOutcome {
        status: final_status,
        rationale: downgraded_rationale(&record.rationale, &details),
        failures,
        numeric_matches_found,
        verification_status: VerificationStatus::Downgraded,
    }
}

fn downgraded_rationale(rationale: &str, details: &[String]) -> String {
    format!("{rationale} Verification downgraded: {}.", details.join("; "))
}

// ── Numeric matching ────────────────────────────────────────────────────────

/// Extract normalized numeric tokens from text.
///
/// A token is a run of digits with optional thousand separators and one
/// decimal point, optionally signed. Thousand separators are stripped before
/// normalization, per the documented tolerance.
fn extract_numbers(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i].is_ascii_digit()
            || (chars[i] == '-'
                && chars.get(i + 1).map(|c| c.is_ascii_digit()) == Some(true)
                && (i == 0 || !chars[i - 1].is_ascii_digit()))
        {
            let start = i;
            if chars[i] == '-' {
                i += 1;
            }
            let mut saw_decimal = false;
            while i < chars.len() {
                if chars[i].is_ascii_digit() {
                    i += 1;
                } else if chars[i] == ','
                    && chars.get(i + 1).map(|c| c.is_ascii_digit()) == Some(true)
                {
                    i += 1;
                } else if chars[i] == '.'
                    && !saw_decimal
                    && chars.get(i + 1).map(|c| c.is_ascii_digit()) == Some(true)
                {
                    saw_decimal = true;
                    i += 1;
                } else {
                    break;
                }
            }
            let raw: String = chars[start..i].iter().collect();
            if let Some(normalized) = normalize_number(&raw) {
                tokens.push(normalized);
            }
        } else {
            i += 1;
        }
    }
    tokens
}

/// Normalize a numeric token: strip thousand separators, canonicalize via
/// shortest round-trip formatting.
fn normalize_number(raw: &str) -> Option<String> {
    let stripped = raw.replace(',', "");
    let value: f64 = stripped.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(format_number(value))
}

fn format_number(value: f64) -> String {
    // Shortest round-trip representation; integers print without a
    // fractional part.
    format!("{value}")
}

/// Whether a normalized value token matches cited evidence, including the
/// explicit percent⇔fraction equivalence.
fn number_matches(token: &str, unit: Option<NormalizedUnit>, cited: &[String]) -> bool {
    if cited.iter().any(|c| c == token) {
        return true;
    }
    let value: f64 = match token.parse() {
        Ok(v) => v,
        Err(_) => return false,
    };
    match unit {
        Some(NormalizedUnit::Percent) => {
            let fraction = format_number(value / 100.0);
            cited.iter().any(|c| c == &fraction)
        }
        Some(NormalizedUnit::Fraction) => {
            let percent = format_number(value * 100.0);
            cited.iter().any(|c| c == &percent)
        }
        _ => false,
    }
}

// ── Unit vocabulary ─────────────────────────────────────────────────────────

/// The controlled unit vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizedUnit {
    /// Percentage points.
    Percent,
    /// Dimensionless fraction.
    Fraction,
    /// ISO currency.
    Currency(&'static str),
    /// Tonnes of CO2-equivalent, with SI-prefixed variants.
    TonnesCo2e,
    /// Kilotonnes of CO2-equivalent.
    KilotonnesCo2e,
    /// Megatonnes of CO2-equivalent.
    MegatonnesCo2e,
    /// Kilowatt hours.
    KilowattHours,
    /// Megawatt hours.
    MegawattHours,
    /// Gigawatt hours.
    GigawattHours,
    /// Kilograms.
    Kilograms,
    /// Tonnes.
    Tonnes,
}

/// Normalize a declared unit against the vocabulary. `None` means the unit
/// is outside the vocabulary and fails verification with `UNIT_MISMATCH`.
pub fn normalize_unit(unit: &str) -> Option<NormalizedUnit> {
    match unit.trim().to_lowercase().as_str() {
        "%" | "percent" | "pct" => Some(NormalizedUnit::Percent),
        "fraction" | "ratio" => Some(NormalizedUnit::Fraction),
        "eur" | "€" => Some(NormalizedUnit::Currency("EUR")),
        "usd" | "$" => Some(NormalizedUnit::Currency("USD")),
        "gbp" | "£" => Some(NormalizedUnit::Currency("GBP")),
        "tco2e" | "t co2e" | "tonnes co2e" => Some(NormalizedUnit::TonnesCo2e),
        "ktco2e" | "kt co2e" => Some(NormalizedUnit::KilotonnesCo2e),
        "mtco2e" | "mt co2e" => Some(NormalizedUnit::MegatonnesCo2e),
        "kwh" => Some(NormalizedUnit::KilowattHours),
        "mwh" => Some(NormalizedUnit::MegawattHours),
        "gwh" => Some(NormalizedUnit::GigawattHours),
        "kg" => Some(NormalizedUnit::Kilograms),
        "t" | "tonne" | "tonnes" => Some(NormalizedUnit::Tonnes),
        _ => None,
    }
}
