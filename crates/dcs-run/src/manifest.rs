//! # Run Manifest
//!
//! The reproducibility record written once at run completion: every
//! fingerprint input, the plan hash, the aggregate prompt hash, and the
//! report template version. The manifest deliberately contains no run id
//! and no timestamps — two runs with the same run hash produce
//! byte-identical manifests, which is what makes cached outputs and
//! evidence archives byte-stable.

use serde::{Deserialize, Serialize};

use dcs_core::{sha256_digest, CanonicalBytes, CanonicalizationError};

use crate::fingerprint::RunFingerprint;

/// Version tag of the HTML report template.
pub const REPORT_TEMPLATE_VERSION: &str = "report-html-v1";

/// The completed-run manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    /// The canonical run hash.
    pub run_hash: String,
    /// Hash of the compiled plan.
    pub plan_hash: String,
    /// Every fingerprint input, verbatim.
    #[serde(flatten)]
    pub fingerprint: RunFingerprint,
    /// Aggregate prompt hash over all assessments.
    pub prompt_hash: String,
    /// Report template version.
    pub report_template_version: String,
}

impl RunManifest {
    /// Assemble the manifest for a completed run.
    pub fn build(
        fingerprint: RunFingerprint,
        run_hash: String,
        plan_hash: String,
        assessment_prompt_hashes: &[String],
    ) -> Result<Self, CanonicalizationError> {
        Ok(Self {
            run_hash,
            plan_hash,
            fingerprint,
            prompt_hash: aggregate_prompt_hash(assessment_prompt_hashes)?,
            report_template_version: REPORT_TEMPLATE_VERSION.to_string(),
        })
    }

    /// Canonical JSON bytes of the manifest.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, CanonicalizationError> {
        Ok(CanonicalBytes::new(self)?.into_inner())
    }
}

/// Collapse per-assessment prompt hashes into one fingerprint: the hash
/// itself when unique, otherwise the hash of the sorted distinct list.
fn aggregate_prompt_hash(hashes: &[String]) -> Result<String, CanonicalizationError> {
    let mut distinct: Vec<&String> = hashes.iter().collect();
    distinct.sort();
    distinct.dedup();
    match distinct.as_slice() {
        [] => Ok(String::new()),
        [single] => Ok((*single).clone()),
        many => {
            let canonical = CanonicalBytes::new(&many)?;
            Ok(sha256_digest(&canonical).to_hex())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{CompanyProfileSnapshot, RetrievalParams};
    use dcs_assess::ProviderIdentity;
    use dcs_ingest::ChunkParams;
    use dcs_retrieval::RetrievalPolicy;
    use std::collections::BTreeMap;

    fn fingerprint() -> RunFingerprint {
        RunFingerprint {
            document_hashes: vec!["a".repeat(64)],
            company_profile: CompanyProfileSnapshot {
                name: "Acme".to_string(),
                employees: Some(100),
                turnover: None,
                listed_status: Some(false),
                reporting_year: Some(2026),
                reporting_year_start: None,
                reporting_year_end: None,
                jurisdictions: vec!["EU".to_string()],
                regimes: vec!["CSRD".to_string()],
            },
            materiality: BTreeMap::new(),
            bundle_refs: vec![],
            compiler_mode: "registry".to_string(),
            retrieval_params: RetrievalParams::new(
                5,
                RetrievalPolicy::default(),
                ChunkParams::default(),
            ),
            provider_identity: ProviderIdentity {
                name: "deterministic-fallback".to_string(),
                model: "deterministic-local-v1".to_string(),
                prompt_template_version: "extraction-v1".to_string(),
            },
            prompt_template_version: "extraction-v1".to_string(),
            code_version: "abc".to_string(),
        }
    }

    #[test]
    fn manifest_bytes_are_deterministic() {
        let hashes = vec!["p1".to_string(), "p1".to_string()];
        let a = RunManifest::build(fingerprint(), "rh".into(), "ph".into(), &hashes).unwrap();
        let b = RunManifest::build(fingerprint(), "rh".into(), "ph".into(), &hashes).unwrap();
        assert_eq!(a.canonical_bytes().unwrap(), b.canonical_bytes().unwrap());
    }

    #[test]
    fn single_prompt_hash_passes_through() {
        let manifest = RunManifest::build(
            fingerprint(),
            "rh".into(),
            "ph".into(),
            &["only".to_string(), "only".to_string()],
        )
        .unwrap();
        assert_eq!(manifest.prompt_hash, "only");
    }

    #[test]
    fn multiple_prompt_hashes_aggregate_order_independently() {
        let forward = RunManifest::build(
            fingerprint(),
            "rh".into(),
            "ph".into(),
            &["p1".to_string(), "p2".to_string()],
        )
        .unwrap();
        let reversed = RunManifest::build(
            fingerprint(),
            "rh".into(),
            "ph".into(),
            &["p2".to_string(), "p1".to_string()],
        )
        .unwrap();
        assert_eq!(forward.prompt_hash, reversed.prompt_hash);
        assert_eq!(forward.prompt_hash.len(), 64);
    }

    #[test]
    fn manifest_contains_all_fingerprint_fields() {
        let manifest =
            RunManifest::build(fingerprint(), "rh".into(), "ph".into(), &[]).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&manifest.canonical_bytes().unwrap()).unwrap();
        for field in [
            "run_hash",
            "plan_hash",
            "document_hashes",
            "company_profile",
            "materiality",
            "bundle_refs",
            "compiler_mode",
            "retrieval_params",
            "provider_identity",
            "prompt_template_version",
            "code_version",
            "prompt_hash",
            "report_template_version",
        ] {
            assert!(value.get(field).is_some(), "manifest missing field {field}");
        }
    }
}
