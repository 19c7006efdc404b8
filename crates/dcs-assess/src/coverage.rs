//! # Coverage Matrix Aggregator
//!
//! Rolls datapoint verdicts up to obligations and standard sections.
//!
//! Per obligation, over its *mandatory, applicable* datapoints (NA verdicts
//! are not applicable):
//!
//! - `Full`    — every one is Present (and there is at least one).
//! - `Absent`  — none is Present.
//! - `Partial` — at least one Present but not all.
//! - `NA`      — no applicable mandatory datapoints at all.
//!
//! The rendered matrix carries **every declared section even when empty** —
//! empty sections are explicitly marked, never omitted, so the output
//! structure is stable across runs and companies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dcs_core::ObligationCode;
use dcs_regulatory::CompiledPlan;

use crate::types::{Assessment, AssessmentStatus};

/// Sections every matrix renders, in render order.
pub const DECLARED_SECTIONS: &[&str] = &[
    "Cross-cutting",
    "E1",
    "E2",
    "E3",
    "E4",
    "E5",
    "S1",
    "S2",
    "S3",
    "S4",
    "G1",
];

/// Coverage level of one obligation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoverageLevel {
    /// All mandatory datapoints Present.
    Full,
    /// At least one Present, but not all.
    Partial,
    /// None Present.
    Absent,
    /// No applicable mandatory datapoints.
    #[serde(rename = "NA")]
    NotApplicable,
}

impl CoverageLevel {
    /// String form used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "Full",
            Self::Partial => "Partial",
            Self::Absent => "Absent",
            Self::NotApplicable => "NA",
        }
    }
}

/// Coverage of one obligation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObligationCoverage {
    /// Obligation code.
    pub obligation_code: ObligationCode,
    /// Section the obligation renders under.
    pub section: String,
    /// Roll-up level.
    pub level: CoverageLevel,
    /// Count of mandatory datapoints in the plan.
    pub total_mandatory: usize,
    /// Present count.
    pub present: usize,
    /// Partial count.
    pub partial: usize,
    /// Absent count.
    pub absent: usize,
    /// NA count.
    pub na: usize,
    /// Needs-Review count (counts as not Present).
    pub needs_review: usize,
}

/// One section of the matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionCoverage {
    /// Section name.
    pub section: String,
    /// Explicit empty marker; empty sections are rendered, not dropped.
    pub empty: bool,
    /// Obligations in code order.
    pub obligations: Vec<ObligationCoverage>,
}

/// The full coverage matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageMatrix {
    /// Sections in declared order, then any extra sections sorted.
    pub sections: Vec<SectionCoverage>,
}

/// Compute the coverage matrix for a completed plan.
pub fn compute_coverage(plan: &CompiledPlan, assessments: &[Assessment]) -> CoverageMatrix {
    let by_key: BTreeMap<&str, &Assessment> = assessments
        .iter()
        .map(|a| (a.datapoint_key.as_str(), a))
        .collect();

    // Obligation roll-ups keyed by section.
    let mut by_section: BTreeMap<String, Vec<ObligationCoverage>> = BTreeMap::new();

    for obligation in &plan.obligations {
        let mut present = 0usize;
        let mut partial = 0usize;
        let mut absent = 0usize;
        let mut na = 0usize;
        let mut needs_review = 0usize;
        let mut total_mandatory = 0usize;

        for datapoint in &obligation.datapoints {
            if !datapoint.mandatory {
                continue;
            }
            total_mandatory += 1;
            match by_key.get(datapoint.datapoint_key.as_str()).map(|a| a.status) {
                Some(AssessmentStatus::Present) => present += 1,
                Some(AssessmentStatus::Partial) => partial += 1,
                Some(AssessmentStatus::NotApplicable) => na += 1,
                Some(AssessmentStatus::NeedsReview) => needs_review += 1,
                // Missing assessments count as Absent: an unassessed
                // mandatory datapoint is not evidence of compliance.
                Some(AssessmentStatus::Absent) | None => absent += 1,
            }
        }

        let applicable = total_mandatory - na;
        let level = if applicable == 0 {
            CoverageLevel::NotApplicable
        } else if present == applicable {
            CoverageLevel::Full
        } else if present == 0 {
            CoverageLevel::Absent
        } else {
            CoverageLevel::Partial
        };

        by_section
            .entry(obligation.section.clone())
            .or_default()
            .push(ObligationCoverage {
                obligation_code: obligation.obligation_code.clone(),
                section: obligation.section.clone(),
                level,
                total_mandatory,
                present,
                partial,
                absent,
                na,
                needs_review,
            });
    }

    let mut sections = Vec::new();
    for &name in DECLARED_SECTIONS {
        let obligations = by_section.remove(name).unwrap_or_default();
        sections.push(SectionCoverage {
            section: name.to_string(),
            empty: obligations.is_empty(),
            obligations,
        });
    }
    // Undeclared sections (custom overlays) render after the declared set,
    // sorted by name — never silently dropped.
    for (name, obligations) in by_section {
        sections.push(SectionCoverage {
            section: name,
            empty: obligations.is_empty(),
            obligations,
        });
    }

    CoverageMatrix { sections }
}

impl CoverageMatrix {
    /// Coverage rows for every obligation, flattened in section order.
    pub fn obligations(&self) -> impl Iterator<Item = &ObligationCoverage> {
        self.sections.iter().flat_map(|s| s.obligations.iter())
    }

    /// Find an obligation's coverage by code.
    pub fn level_for(&self, code: &ObligationCode) -> Option<CoverageLevel> {
        self.obligations()
            .find(|o| &o.obligation_code == code)
            .map(|o| o.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcs_core::DatapointKey;
    use dcs_regulatory::{CompiledDatapoint, CompiledObligation, DatapointType};
    use uuid::Uuid;

    fn plan_with(obligations: Vec<CompiledObligation>) -> CompiledPlan {
        CompiledPlan {
            company_id: Uuid::nil(),
            reporting_year: 2026,
            regimes: vec!["CSRD".to_string()],
            cohort: "wave-1".to_string(),
            phase_in_deferred: vec![],
            bundle_refs: vec![],
            obligations,
            excluded: vec![],
            plan_hash: "plan".to_string(),
        }
    }

    fn obligation(code: &str, section: &str, keys: &[&str]) -> CompiledObligation {
        CompiledObligation {
            obligation_code: ObligationCode::new(code).unwrap(),
            title: format!("{code} title"),
            standard_reference: format!("{code} ref"),
            section: section.to_string(),
            topic: None,
            datapoints: keys
                .iter()
                .map(|key| CompiledDatapoint {
                    datapoint_key: DatapointKey::new(*key).unwrap(),
                    obligation_code: ObligationCode::new(code).unwrap(),
                    title: key.to_string(),
                    disclosure_reference: String::new(),
                    datapoint_type: DatapointType::Narrative,
                    requires_baseline: false,
                    mandatory: true,
                })
                .collect(),
        }
    }

    fn assessment(key: &str, status: AssessmentStatus) -> Assessment {
        Assessment {
            datapoint_key: DatapointKey::new(key).unwrap(),
            status,
            value: None,
            unit: None,
            year: None,
            rationale: "r".to_string(),
            evidence_chunk_ids: vec![],
            prompt_hash: "p".to_string(),
            retrieval_params: serde_json::json!({}),
        }
    }

    #[test]
    fn full_when_all_mandatory_present() {
        let plan = plan_with(vec![obligation("ESRS-E1", "E1", &["ESRS-E1-1", "ESRS-E1-6"])]);
        let assessments = vec![
            assessment("ESRS-E1-1", AssessmentStatus::Present),
            assessment("ESRS-E1-6", AssessmentStatus::Present),
        ];
        let matrix = compute_coverage(&plan, &assessments);
        assert_eq!(
            matrix.level_for(&ObligationCode::new("ESRS-E1").unwrap()),
            Some(CoverageLevel::Full)
        );
    }

    #[test]
    fn partial_when_some_present() {
        let plan = plan_with(vec![obligation("ESRS-E1", "E1", &["ESRS-E1-1", "ESRS-E1-6"])]);
        let assessments = vec![
            assessment("ESRS-E1-1", AssessmentStatus::Present),
            assessment("ESRS-E1-6", AssessmentStatus::Absent),
        ];
        let matrix = compute_coverage(&plan, &assessments);
        assert_eq!(
            matrix.level_for(&ObligationCode::new("ESRS-E1").unwrap()),
            Some(CoverageLevel::Partial)
        );
    }

    #[test]
    fn absent_when_none_present() {
        let plan = plan_with(vec![obligation("ESRS-E1", "E1", &["ESRS-E1-1", "ESRS-E1-6"])]);
        let assessments = vec![
            assessment("ESRS-E1-1", AssessmentStatus::Absent),
            assessment("ESRS-E1-6", AssessmentStatus::Partial),
        ];
        let matrix = compute_coverage(&plan, &assessments);
        assert_eq!(
            matrix.level_for(&ObligationCode::new("ESRS-E1").unwrap()),
            Some(CoverageLevel::Absent)
        );
    }

    #[test]
    fn na_when_no_applicable_mandatory_datapoints() {
        let plan = plan_with(vec![obligation("ESRS-E4", "E4", &["ESRS-E4-1"])]);
        let assessments = vec![assessment("ESRS-E4-1", AssessmentStatus::NotApplicable)];
        let matrix = compute_coverage(&plan, &assessments);
        assert_eq!(
            matrix.level_for(&ObligationCode::new("ESRS-E4").unwrap()),
            Some(CoverageLevel::NotApplicable)
        );
    }

    #[test]
    fn na_when_obligation_has_no_datapoints() {
        let plan = plan_with(vec![obligation("ESRS-E5", "E5", &[])]);
        let matrix = compute_coverage(&plan, &[]);
        assert_eq!(
            matrix.level_for(&ObligationCode::new("ESRS-E5").unwrap()),
            Some(CoverageLevel::NotApplicable)
        );
    }

    #[test]
    fn needs_review_counts_as_not_present() {
        let plan = plan_with(vec![obligation("ESRS-E1", "E1", &["ESRS-E1-1", "ESRS-E1-6"])]);
        let assessments = vec![
            assessment("ESRS-E1-1", AssessmentStatus::Present),
            assessment("ESRS-E1-6", AssessmentStatus::NeedsReview),
        ];
        let matrix = compute_coverage(&plan, &assessments);
        assert_eq!(
            matrix.level_for(&ObligationCode::new("ESRS-E1").unwrap()),
            Some(CoverageLevel::Partial)
        );
    }

    #[test]
    fn missing_assessment_counts_as_absent() {
        let plan = plan_with(vec![obligation("ESRS-E1", "E1", &["ESRS-E1-1"])]);
        let matrix = compute_coverage(&plan, &[]);
        assert_eq!(
            matrix.level_for(&ObligationCode::new("ESRS-E1").unwrap()),
            Some(CoverageLevel::Absent)
        );
    }

    #[test]
    fn all_declared_sections_present_even_when_empty() {
        let plan = plan_with(vec![obligation("ESRS-E1", "E1", &["ESRS-E1-1"])]);
        let matrix = compute_coverage(&plan, &[]);
        assert_eq!(matrix.sections.len(), DECLARED_SECTIONS.len());
        let names: Vec<&str> = matrix.sections.iter().map(|s| s.section.as_str()).collect();
        assert_eq!(names, DECLARED_SECTIONS.to_vec());
        let e1 = matrix.sections.iter().find(|s| s.section == "E1").unwrap();
        assert!(!e1.empty);
        let s4 = matrix.sections.iter().find(|s| s.section == "S4").unwrap();
        assert!(s4.empty);
        assert!(s4.obligations.is_empty());
    }

    #[test]
    fn undeclared_section_appended_not_dropped() {
        let plan = plan_with(vec![obligation("ZZ-LOCAL", "Local", &["ZZ-LOCAL-1"])]);
        let matrix = compute_coverage(&plan, &[]);
        assert_eq!(matrix.sections.len(), DECLARED_SECTIONS.len() + 1);
        let last = matrix.sections.last().unwrap();
        assert_eq!(last.section, "Local");
        assert!(!last.empty);
    }

    #[test]
    fn non_mandatory_datapoints_do_not_count() {
        let mut ob = obligation("ESRS-G1", "G1", &["ESRS-G1-1", "ESRS-G1-2"]);
        ob.datapoints[1].mandatory = false;
        let plan = plan_with(vec![ob]);
        let assessments = vec![
            assessment("ESRS-G1-1", AssessmentStatus::Present),
            assessment("ESRS-G1-2", AssessmentStatus::Absent),
        ];
        let matrix = compute_coverage(&plan, &assessments);
        assert_eq!(
            matrix.level_for(&ObligationCode::new("ESRS-G1").unwrap()),
            Some(CoverageLevel::Full)
        );
    }
}
