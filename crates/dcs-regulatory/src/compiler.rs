//! # Regulatory Compiler — Bundles to a Deterministic Compiled Plan
//!
//! Resolves `(company profile, reporting year, selected bundles)` into an
//! ordered plan of applicable obligations and datapoints:
//!
//! 1. Select bundles whose `(regime, jurisdiction)` applies to the company's
//!    declared lists.
//! 2. Apply jurisdiction overlays in `(jurisdiction code, bundle, op index)`
//!    order through an apply-list keyed by obligation code. Bundles stay
//!    immutable; the plan is composed fresh.
//! 3. Evaluate obligation applicability; retain applicable obligations and
//!    record excluded ones with a reason.
//! 4. Evaluate datapoint phase-in rules for the reporting year and the
//!    materiality snapshot; out-of-scope datapoints are excluded with
//!    `PHASE_IN` / `NOT_MATERIAL`.
//! 5. Order obligations lexicographically by code, datapoints by obligation
//!    order then key, and compute the plan hash over the canonical plan.
//!
//! Guardrail: a company in scope for a declared regime whose plan compiles
//! to zero applicable obligations fails with `EMPTY_PLAN` rather than
//! silently producing a vacuous pass.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use dcs_core::{
    sha256_digest, CanonicalBytes, CanonicalizationError, DatapointKey, ObligationCode,
};

use crate::eval::{self, CompanyContext, EvalError};
use crate::schema::{Bundle, BundleError, BundleRef, DatapointType, Obligation, OverlayOp};

/// Which compilation strategy a run uses. Part of the run fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilerMode {
    /// Registry-backed compilation from versioned bundles.
    Registry,
    /// Frozen pre-registry behavior kept for reproducing historical runs.
    Legacy,
}

impl CompilerMode {
    /// String form used in fingerprints and the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Legacy => "legacy",
        }
    }
}

impl std::fmt::Display for CompilerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an obligation or datapoint was excluded from the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    /// Obligation code or datapoint key.
    pub code: String,
    /// Whether the exclusion is an obligation or a datapoint.
    pub kind: ExclusionKind,
    /// Machine-readable reason (`NOT_APPLICABLE`, `PHASE_IN`,
    /// `OVERLAY_DISABLED`, `NOT_MATERIAL`, `RULE_ERROR`).
    pub reason: String,
    /// Human-readable detail.
    pub detail: String,
}

/// Kind of an excluded entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionKind {
    /// A whole obligation.
    Obligation,
    /// A single datapoint.
    Datapoint,
}

/// A datapoint retained in the compiled plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledDatapoint {
    /// Datapoint key.
    pub datapoint_key: DatapointKey,
    /// Owning obligation code.
    pub obligation_code: ObligationCode,
    /// Title used for the retrieval query.
    pub title: String,
    /// Disclosure reference used for the retrieval query.
    pub disclosure_reference: String,
    /// Narrative or metric.
    pub datapoint_type: DatapointType,
    /// Whether a baseline is required for verification.
    pub requires_baseline: bool,
    /// Whether the datapoint counts toward coverage.
    pub mandatory: bool,
}

/// An obligation retained in the compiled plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledObligation {
    /// Obligation code.
    pub obligation_code: ObligationCode,
    /// Title.
    pub title: String,
    /// Standard reference.
    pub standard_reference: String,
    /// Coverage section, e.g. `E1`.
    pub section: String,
    /// Materiality topic, if any.
    pub topic: Option<String>,
    /// Datapoints in key order.
    pub datapoints: Vec<CompiledDatapoint>,
}

/// The ordered, applicability-filtered plan for one `(company, year)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledPlan {
    /// Company the plan was compiled for.
    pub company_id: Uuid,
    /// Reporting year.
    pub reporting_year: i64,
    /// Regimes covered by the selected bundles, sorted.
    pub regimes: Vec<String>,
    /// Phase-in cohort derived from the company profile.
    pub cohort: String,
    /// Datapoint keys deferred by phase-in for this year, sorted.
    pub phase_in_deferred: Vec<DatapointKey>,
    /// Bundles the plan was compiled from, pinned by checksum.
    pub bundle_refs: Vec<BundleRef>,
    /// Applicable obligations, ordered by code.
    pub obligations: Vec<CompiledObligation>,
    /// Recorded exclusions.
    pub excluded: Vec<Exclusion>,
    /// SHA-256 over the canonical plan (computed with this field empty).
    pub plan_hash: String,
}

impl CompiledPlan {
    /// Flattened datapoint list in plan order: obligation order first, then
    /// datapoint key. This is the iteration order of the assessment loop.
    pub fn datapoints(&self) -> Vec<&CompiledDatapoint> {
        self.obligations
            .iter()
            .flat_map(|o| o.datapoints.iter())
            .collect()
    }
}

/// Input to plan compilation. Everything influencing the plan arrives
/// explicitly — no ambient state.
#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    /// Company the plan is for.
    pub company_id: Uuid,
    /// Evaluation context built from the company profile.
    pub context: &'a CompanyContext,
    /// Regimes the company has declared itself in scope for.
    pub declared_regimes: &'a [String],
    /// Candidate bundles (the active registry set).
    pub bundles: &'a [Bundle],
    /// Materiality snapshot: topic → is material.
    pub materiality: &'a BTreeMap<String, bool>,
    /// Compiler mode (recorded in the plan's fingerprint inputs).
    pub mode: CompilerMode,
}

/// Compilation failures.
#[derive(Error, Debug)]
pub enum CompileError {
    /// The company is in scope for a declared regime but no obligation
    /// survived applicability filtering.
    #[error("compiled plan is empty for regimes {regimes:?}")]
    EmptyPlan {
        /// Regimes that were declared and matched bundles.
        regimes: Vec<String>,
    },

    /// The company profile lacks a reporting year.
    #[error("company context has no reporting year")]
    MissingReportingYear,

    /// An overlay referenced an obligation that no selected bundle declares.
    #[error("overlay targets unknown obligation: {0}")]
    UnknownOverlayTarget(ObligationCode),

    /// Two overlays tried to add the same obligation code.
    #[error("overlay add conflicts with existing obligation: {0}")]
    OverlayConflict(ObligationCode),

    /// A bundle failed validation.
    #[error("bundle validation failed: {0}")]
    Bundle(#[from] BundleError),

    /// Plan hashing failed.
    #[error("plan hash computation failed: {0}")]
    Canonicalization(#[from] CanonicalizationError),
}

/// Internal draft obligation as composed by the overlay apply-list.
#[derive(Debug, Clone)]
struct ObligationDraft {
    obligation: Obligation,
    disabled: Option<String>,
}

/// Compile a deterministic plan from the request.
pub fn compile_plan(request: &CompileRequest<'_>) -> Result<CompiledPlan, CompileError> {
    let reporting_year = request
        .context
        .reporting_year
        .ok_or(CompileError::MissingReportingYear)?;

    // 1. Bundle selection: regime declared on the profile, jurisdiction on
    //    the profile's list (or GLOBAL).
    let selected: Vec<&Bundle> = request
        .bundles
        .iter()
        .filter(|b| {
            request.declared_regimes.contains(&b.regime)
                && (b.jurisdiction == "GLOBAL"
                    || request.context.jurisdictions.contains(&b.jurisdiction))
        })
        .collect();

    let mut regimes: Vec<String> = selected.iter().map(|b| b.regime.clone()).collect();
    regimes.sort_unstable();
    regimes.dedup();

    if selected.is_empty() {
        return Err(CompileError::EmptyPlan {
            regimes: request.declared_regimes.to_vec(),
        });
    }

    let mut bundle_refs: Vec<BundleRef> = selected
        .iter()
        .map(|b| {
            Ok(BundleRef {
                bundle_id: b.bundle_id.clone(),
                version: b.version.clone(),
                checksum: crate::schema::bundle_checksum(b)?.to_hex(),
            })
        })
        .collect::<Result<_, BundleError>>()?;
    bundle_refs.sort();

    // 2. Apply-list composition: declared obligations first, then overlays
    //    in (jurisdiction, bundle_id, op index) order.
    let mut drafts: BTreeMap<ObligationCode, ObligationDraft> = BTreeMap::new();
    for bundle in &selected {
        for obligation in &bundle.obligations {
            drafts.insert(
                obligation.obligation_code.clone(),
                ObligationDraft {
                    obligation: obligation.clone(),
                    disabled: None,
                },
            );
        }
    }

    let mut overlays: Vec<(&str, &str, usize, &crate::schema::Overlay)> = Vec::new();
    for bundle in &selected {
        for (idx, overlay) in bundle.overlays.iter().enumerate() {
            overlays.push((
                overlay.jurisdiction.as_str(),
                bundle.bundle_id.as_str(),
                idx,
                overlay,
            ));
        }
    }
    overlays.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));

    for (_, _, _, overlay) in overlays {
        match overlay.op {
            OverlayOp::Add => {
                // Validated at bundle load; defensive here for cross-bundle
                // composition.
                let payload = overlay.obligation.clone().ok_or_else(|| {
                    CompileError::Bundle(BundleError::AddOverlayMissingPayload(
                        overlay.obligation_code.clone(),
                    ))
                })?;
                if drafts.contains_key(&overlay.obligation_code) {
                    return Err(CompileError::OverlayConflict(
                        overlay.obligation_code.clone(),
                    ));
                }
                drafts.insert(
                    overlay.obligation_code.clone(),
                    ObligationDraft {
                        obligation: payload,
                        disabled: None,
                    },
                );
            }
            OverlayOp::Modify => {
                let draft = drafts.get_mut(&overlay.obligation_code).ok_or_else(|| {
                    CompileError::UnknownOverlayTarget(overlay.obligation_code.clone())
                })?;
                if let Some(title) = &overlay.title {
                    draft.obligation.title = title.clone();
                }
                if let Some(reference) = &overlay.standard_reference {
                    draft.obligation.standard_reference = reference.clone();
                }
            }
            OverlayOp::Disable => {
                let draft = drafts.get_mut(&overlay.obligation_code).ok_or_else(|| {
                    CompileError::UnknownOverlayTarget(overlay.obligation_code.clone())
                })?;
                draft.disabled = Some(
                    overlay
                        .reason
                        .clone()
                        .unwrap_or_else(|| "disabled by overlay".to_string()),
                );
            }
        }
    }

    // Top-level applicability rules attach to their obligation by code and
    // combine (AND) with any inline expression.
    let mut rules_by_code: BTreeMap<ObligationCode, Vec<&str>> = BTreeMap::new();
    for bundle in &selected {
        for rule in &bundle.applicability_rules {
            rules_by_code
                .entry(rule.obligation_code.clone())
                .or_default()
                .push(rule.expression.as_str());
        }
    }

    // 3/4. Applicability, phase-in, materiality. BTreeMap iteration gives
    //      the lexicographic obligation order directly.
    let mut obligations = Vec::new();
    let mut excluded = Vec::new();
    let mut phase_in_deferred: Vec<DatapointKey> = Vec::new();

    'obligations: for (code, draft) in drafts {
        if let Some(reason) = draft.disabled {
            excluded.push(Exclusion {
                code: code.to_string(),
                kind: ExclusionKind::Obligation,
                reason: "OVERLAY_DISABLED".to_string(),
                detail: reason,
            });
            continue;
        }

        let mut expressions: Vec<&str> = Vec::new();
        if let Some(expr) = &draft.obligation.applicability {
            expressions.push(expr.as_str());
        }
        if let Some(rules) = rules_by_code.get(&code) {
            expressions.extend(rules.iter().copied());
        }
        for expr in expressions {
            match eval::evaluate(expr, request.context) {
                Ok(true) => {}
                Ok(false) => {
                    excluded.push(Exclusion {
                        code: code.to_string(),
                        kind: ExclusionKind::Obligation,
                        reason: "NOT_APPLICABLE".to_string(),
                        detail: format!("applicability rule evaluated false: {expr}"),
                    });
                    continue 'obligations;
                }
                Err(err) => {
                    // Unknown or missing symbols make the rule non-applicable
                    // with an explicit reason, never a silent pass.
                    excluded.push(Exclusion {
                        code: code.to_string(),
                        kind: ExclusionKind::Obligation,
                        reason: "RULE_ERROR".to_string(),
                        detail: rule_error_detail(expr, &err),
                    });
                    continue 'obligations;
                }
            }
        }

        let mut datapoints = Vec::new();
        let mut sorted_dps = draft.obligation.datapoints.clone();
        sorted_dps.sort_by(|a, b| a.datapoint_key.cmp(&b.datapoint_key));

        for dp in sorted_dps {
            if let Some(topic) = &draft.obligation.topic {
                if request.materiality.get(topic) == Some(&false) {
                    excluded.push(Exclusion {
                        code: dp.datapoint_key.to_string(),
                        kind: ExclusionKind::Datapoint,
                        reason: "NOT_MATERIAL".to_string(),
                        detail: format!("topic {topic} assessed as not material"),
                    });
                    continue;
                }
            }
            if let Some(expr) = &dp.phase_in {
                match eval::evaluate(expr, request.context) {
                    Ok(true) => {}
                    Ok(false) => {
                        phase_in_deferred.push(dp.datapoint_key.clone());
                        excluded.push(Exclusion {
                            code: dp.datapoint_key.to_string(),
                            kind: ExclusionKind::Datapoint,
                            reason: "PHASE_IN".to_string(),
                            detail: format!(
                                "phase-in rule excludes reporting year {reporting_year}: {expr}"
                            ),
                        });
                        continue;
                    }
                    Err(err) => {
                        excluded.push(Exclusion {
                            code: dp.datapoint_key.to_string(),
                            kind: ExclusionKind::Datapoint,
                            reason: "RULE_ERROR".to_string(),
                            detail: rule_error_detail(expr, &err),
                        });
                        continue;
                    }
                }
            }
            datapoints.push(CompiledDatapoint {
                datapoint_key: dp.datapoint_key,
                obligation_code: code.clone(),
                title: dp.title,
                disclosure_reference: dp.disclosure_reference.unwrap_or_default(),
                datapoint_type: dp.datapoint_type,
                requires_baseline: dp.requires_baseline,
                mandatory: dp.mandatory,
            });
        }

        obligations.push(CompiledObligation {
            obligation_code: code,
            title: draft.obligation.title,
            standard_reference: draft.obligation.standard_reference,
            section: draft.obligation.section,
            topic: draft.obligation.topic,
            datapoints,
        });
    }

    if obligations.is_empty() {
        return Err(CompileError::EmptyPlan { regimes });
    }

    phase_in_deferred.sort();

    let mut plan = CompiledPlan {
        company_id: request.company_id,
        reporting_year,
        regimes,
        cohort: derive_cohort(request.context),
        phase_in_deferred,
        bundle_refs,
        obligations,
        excluded,
        plan_hash: String::new(),
    };
    let canonical = CanonicalBytes::new(&plan)?;
    plan.plan_hash = sha256_digest(&canonical).to_hex();

    tracing::debug!(
        company_id = %plan.company_id,
        obligations = plan.obligations.len(),
        excluded = plan.excluded.len(),
        plan_hash = %plan.plan_hash,
        "compiled regulatory plan"
    );

    Ok(plan)
}

fn rule_error_detail(expr: &str, err: &EvalError) -> String {
    match err {
        EvalError::UnknownSymbol(name) => format!("UNKNOWN_SYMBOL {name} in rule: {expr}"),
        other => format!("{other} in rule: {expr}"),
    }
}

/// Phase-in cohort derived from company size and listing, largest first.
fn derive_cohort(context: &CompanyContext) -> String {
    let employees = context.employees.unwrap_or(0);
    let listed = context.listed_status.unwrap_or(false);
    if listed && employees >= 500 {
        "wave-1".to_string()
    } else if employees >= 250 {
        "wave-2".to_string()
    } else {
        "wave-3".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Datapoint, Overlay};

    fn context() -> CompanyContext {
        CompanyContext {
            employees: Some(750),
            turnover: Some(45_000_000.0),
            listed_status: Some(true),
            reporting_year: Some(2026),
            reporting_year_start: Some("2026-01-01".to_string()),
            reporting_year_end: Some("2026-12-31".to_string()),
            jurisdictions: vec!["EU".to_string()],
        }
    }

    fn datapoint(key: &str, title: &str) -> Datapoint {
        Datapoint {
            datapoint_key: DatapointKey::new(key).unwrap(),
            title: title.to_string(),
            disclosure_reference: Some(format!("{key} ref")),
            datapoint_type: DatapointType::Narrative,
            requires_baseline: false,
            mandatory: true,
            phase_in: None,
        }
    }

    fn obligation(code: &str, section: &str, datapoints: Vec<Datapoint>) -> Obligation {
        Obligation {
            obligation_code: ObligationCode::new(code).unwrap(),
            title: format!("{code} title"),
            standard_reference: format!("{code} std"),
            section: section.to_string(),
            topic: None,
            applicability: None,
            datapoints,
        }
    }

    fn bundle(obligations: Vec<Obligation>, overlays: Vec<Overlay>) -> Bundle {
        Bundle {
            regime: "CSRD".to_string(),
            bundle_id: "esrs_mini".to_string(),
            version: "2026.01".to_string(),
            jurisdiction: "EU".to_string(),
            source_record_ids: vec![],
            obligations,
            applicability_rules: vec![],
            overlays,
        }
    }

    fn request<'a>(
        bundles: &'a [Bundle],
        ctx: &'a CompanyContext,
        regimes: &'a [String],
        materiality: &'a BTreeMap<String, bool>,
    ) -> CompileRequest<'a> {
        CompileRequest {
            company_id: Uuid::nil(),
            context: ctx,
            declared_regimes: regimes,
            bundles,
            materiality,
            mode: CompilerMode::Registry,
        }
    }

    #[test]
    fn plan_orders_obligations_and_datapoints() {
        let bundles = vec![bundle(
            vec![
                obligation("ESRS-S1", "S1", vec![datapoint("ESRS-S1-9", "z"), datapoint("ESRS-S1-1", "a")]),
                obligation("ESRS-E1", "E1", vec![datapoint("ESRS-E1-6", "b")]),
            ],
            vec![],
        )];
        let ctx = context();
        let regimes = vec!["CSRD".to_string()];
        let materiality = BTreeMap::new();
        let plan = compile_plan(&request(&bundles, &ctx, &regimes, &materiality)).unwrap();

        let codes: Vec<&str> = plan
            .obligations
            .iter()
            .map(|o| o.obligation_code.as_str())
            .collect();
        assert_eq!(codes, vec!["ESRS-E1", "ESRS-S1"]);
        let keys: Vec<&str> = plan.datapoints().iter().map(|d| d.datapoint_key.as_str()).collect();
        assert_eq!(keys, vec!["ESRS-E1-6", "ESRS-S1-1", "ESRS-S1-9"]);
    }

    #[test]
    fn plan_hash_invariant_under_obligation_permutation() {
        let ob_a = obligation("ESRS-E1", "E1", vec![datapoint("ESRS-E1-1", "a")]);
        let ob_b = obligation("ESRS-S1", "S1", vec![datapoint("ESRS-S1-1", "b")]);
        let forward = vec![bundle(vec![ob_a.clone(), ob_b.clone()], vec![])];
        let reversed = vec![bundle(vec![ob_b, ob_a], vec![])];

        let ctx = context();
        let regimes = vec!["CSRD".to_string()];
        let materiality = BTreeMap::new();
        let p1 = compile_plan(&request(&forward, &ctx, &regimes, &materiality)).unwrap();
        let p2 = compile_plan(&request(&reversed, &ctx, &regimes, &materiality)).unwrap();
        assert_eq!(p1.plan_hash, p2.plan_hash);
    }

    #[test]
    fn plan_hash_changes_with_applicability_rule() {
        let mut ob = obligation("ESRS-E1", "E1", vec![datapoint("ESRS-E1-1", "a")]);
        let baseline = vec![bundle(vec![ob.clone()], vec![])];
        ob.applicability = Some("company.employees > 1".to_string());
        let with_rule = vec![bundle(vec![ob], vec![])];

        let ctx = context();
        let regimes = vec!["CSRD".to_string()];
        let materiality = BTreeMap::new();
        let p1 = compile_plan(&request(&baseline, &ctx, &regimes, &materiality)).unwrap();
        let p2 = compile_plan(&request(&with_rule, &ctx, &regimes, &materiality)).unwrap();
        assert_ne!(p1.plan_hash, p2.plan_hash);
    }

    #[test]
    fn inapplicable_obligation_recorded_with_reason() {
        let mut ob = obligation("ESRS-E1", "E1", vec![datapoint("ESRS-E1-1", "a")]);
        ob.applicability = Some("company.employees > 100000".to_string());
        let keep = obligation("ESRS-G1", "G1", vec![datapoint("ESRS-G1-1", "g")]);
        let bundles = vec![bundle(vec![ob, keep], vec![])];

        let ctx = context();
        let regimes = vec!["CSRD".to_string()];
        let materiality = BTreeMap::new();
        let plan = compile_plan(&request(&bundles, &ctx, &regimes, &materiality)).unwrap();
        assert_eq!(plan.obligations.len(), 1);
        let exclusion = plan
            .excluded
            .iter()
            .find(|e| e.code == "ESRS-E1")
            .expect("exclusion recorded");
        assert_eq!(exclusion.reason, "NOT_APPLICABLE");
    }

    #[test]
    fn phase_in_defers_datapoints() {
        let mut dp = datapoint("ESRS-E1-9", "deferred");
        dp.phase_in = Some("company.reporting_year >= 2028".to_string());
        let bundles = vec![bundle(
            vec![obligation(
                "ESRS-E1",
                "E1",
                vec![datapoint("ESRS-E1-1", "now"), dp],
            )],
            vec![],
        )];

        let ctx = context();
        let regimes = vec!["CSRD".to_string()];
        let materiality = BTreeMap::new();
        let plan = compile_plan(&request(&bundles, &ctx, &regimes, &materiality)).unwrap();
        let keys: Vec<&str> = plan.datapoints().iter().map(|d| d.datapoint_key.as_str()).collect();
        assert_eq!(keys, vec!["ESRS-E1-1"]);
        assert_eq!(plan.phase_in_deferred.len(), 1);
        assert_eq!(plan.phase_in_deferred[0].as_str(), "ESRS-E1-9");
        assert!(plan
            .excluded
            .iter()
            .any(|e| e.code == "ESRS-E1-9" && e.reason == "PHASE_IN"));
    }

    #[test]
    fn empty_plan_is_a_failure_not_a_pass() {
        let mut ob = obligation("ESRS-E1", "E1", vec![datapoint("ESRS-E1-1", "a")]);
        ob.applicability = Some("company.employees > 100000".to_string());
        let bundles = vec![bundle(vec![ob], vec![])];

        let ctx = context();
        let regimes = vec!["CSRD".to_string()];
        let materiality = BTreeMap::new();
        match compile_plan(&request(&bundles, &ctx, &regimes, &materiality)) {
            Err(CompileError::EmptyPlan { regimes }) => {
                assert_eq!(regimes, vec!["CSRD".to_string()]);
            }
            other => panic!("expected EmptyPlan, got {other:?}"),
        }
    }

    #[test]
    fn undeclared_regime_selects_nothing() {
        let bundles = vec![bundle(
            vec![obligation("ESRS-E1", "E1", vec![datapoint("ESRS-E1-1", "a")])],
            vec![],
        )];
        let ctx = context();
        let regimes = vec!["TCFD".to_string()];
        let materiality = BTreeMap::new();
        assert!(matches!(
            compile_plan(&request(&bundles, &ctx, &regimes, &materiality)),
            Err(CompileError::EmptyPlan { .. })
        ));
    }

    #[test]
    fn overlay_disable_excludes_with_reason() {
        let bundles = vec![bundle(
            vec![
                obligation("ESRS-E1", "E1", vec![datapoint("ESRS-E1-1", "a")]),
                obligation("ESRS-E4", "E4", vec![datapoint("ESRS-E4-1", "b")]),
            ],
            vec![Overlay {
                jurisdiction: "EU".to_string(),
                op: OverlayOp::Disable,
                obligation_code: ObligationCode::new("ESRS-E4").unwrap(),
                obligation: None,
                title: None,
                standard_reference: None,
                reason: Some("deferred by delegated act".to_string()),
            }],
        )];
        let ctx = context();
        let regimes = vec!["CSRD".to_string()];
        let materiality = BTreeMap::new();
        let plan = compile_plan(&request(&bundles, &ctx, &regimes, &materiality)).unwrap();
        assert_eq!(plan.obligations.len(), 1);
        let exclusion = plan.excluded.iter().find(|e| e.code == "ESRS-E4").unwrap();
        assert_eq!(exclusion.reason, "OVERLAY_DISABLED");
        assert_eq!(exclusion.detail, "deferred by delegated act");
    }

    #[test]
    fn overlay_add_and_modify_compose_in_order() {
        let added = obligation("ZZ-LOCAL-1", "Cross-cutting", vec![datapoint("ZZ-LOCAL-1-1", "x")]);
        let bundles = vec![bundle(
            vec![obligation("ESRS-E1", "E1", vec![datapoint("ESRS-E1-1", "a")])],
            vec![
                Overlay {
                    jurisdiction: "EU".to_string(),
                    op: OverlayOp::Add,
                    obligation_code: added.obligation_code.clone(),
                    obligation: Some(added),
                    title: None,
                    standard_reference: None,
                    reason: None,
                },
                Overlay {
                    jurisdiction: "EU".to_string(),
                    op: OverlayOp::Modify,
                    obligation_code: ObligationCode::new("ZZ-LOCAL-1").unwrap(),
                    obligation: None,
                    title: Some("Local transposition".to_string()),
                    standard_reference: None,
                    reason: None,
                },
            ],
        )];
        let ctx = context();
        let regimes = vec!["CSRD".to_string()];
        let materiality = BTreeMap::new();
        let plan = compile_plan(&request(&bundles, &ctx, &regimes, &materiality)).unwrap();
        let local = plan
            .obligations
            .iter()
            .find(|o| o.obligation_code.as_str() == "ZZ-LOCAL-1")
            .unwrap();
        assert_eq!(local.title, "Local transposition");
    }

    #[test]
    fn non_material_topic_excludes_datapoints() {
        let mut ob = obligation("ESRS-E4", "E4", vec![datapoint("ESRS-E4-1", "bio")]);
        ob.topic = Some("biodiversity".to_string());
        let keep = obligation("ESRS-E1", "E1", vec![datapoint("ESRS-E1-1", "climate")]);
        let bundles = vec![bundle(vec![ob, keep], vec![])];

        let ctx = context();
        let regimes = vec!["CSRD".to_string()];
        let mut materiality = BTreeMap::new();
        materiality.insert("biodiversity".to_string(), false);
        let plan = compile_plan(&request(&bundles, &ctx, &regimes, &materiality)).unwrap();
        assert!(plan
            .excluded
            .iter()
            .any(|e| e.code == "ESRS-E4-1" && e.reason == "NOT_MATERIAL"));
        // The obligation itself remains, with no datapoints (NA in coverage).
        let e4 = plan
            .obligations
            .iter()
            .find(|o| o.obligation_code.as_str() == "ESRS-E4")
            .unwrap();
        assert!(e4.datapoints.is_empty());
    }

    #[test]
    fn rule_error_is_recorded_not_silent() {
        let mut ob = obligation("ESRS-E1", "E1", vec![datapoint("ESRS-E1-1", "a")]);
        // Validated bundles cannot carry unknown symbols, so simulate a
        // missing context value instead.
        ob.applicability = Some("company.turnover > 1000".to_string());
        let keep = obligation("ESRS-G1", "G1", vec![datapoint("ESRS-G1-1", "g")]);
        let bundles = vec![bundle(vec![ob, keep], vec![])];

        let mut ctx = context();
        ctx.turnover = None;
        let regimes = vec!["CSRD".to_string()];
        let materiality = BTreeMap::new();
        let plan = compile_plan(&request(&bundles, &ctx, &regimes, &materiality)).unwrap();
        let exclusion = plan.excluded.iter().find(|e| e.code == "ESRS-E1").unwrap();
        assert_eq!(exclusion.reason, "RULE_ERROR");
        assert!(exclusion.detail.contains("company.turnover"));
    }

    #[test]
    fn top_level_applicability_rules_gate_obligations() {
        let mut b = bundle(
            vec![
                obligation("ESRS-E1", "E1", vec![datapoint("ESRS-E1-1", "a")]),
                obligation("ESRS-G1", "G1", vec![datapoint("ESRS-G1-1", "g")]),
            ],
            vec![],
        );
        b.applicability_rules.push(crate::schema::ApplicabilityRule {
            obligation_code: ObligationCode::new("ESRS-E1").unwrap(),
            expression: "company.employees > 100000".to_string(),
        });
        let bundles = vec![b];

        let ctx = context();
        let regimes = vec!["CSRD".to_string()];
        let materiality = BTreeMap::new();
        let plan = compile_plan(&request(&bundles, &ctx, &regimes, &materiality)).unwrap();
        assert_eq!(plan.obligations.len(), 1);
        assert_eq!(plan.obligations[0].obligation_code.as_str(), "ESRS-G1");
        assert!(plan
            .excluded
            .iter()
            .any(|e| e.code == "ESRS-E1" && e.reason == "NOT_APPLICABLE"));
    }

    #[test]
    fn cohort_derivation() {
        assert_eq!(derive_cohort(&context()), "wave-1");
        let mut small = context();
        small.employees = Some(100);
        small.listed_status = Some(false);
        assert_eq!(derive_cohort(&small), "wave-3");
        let mut mid = context();
        mid.employees = Some(300);
        mid.listed_status = Some(false);
        assert_eq!(derive_cohort(&mid), "wave-2");
    }
}
