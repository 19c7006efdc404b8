//! # Run-Hash Cache
//!
//! Write-once output cache keyed by run hash. A lookup precedes any work in
//! the orchestrator: a hit returns the stored plan, assessments,
//! diagnostics, coverage, and manifest verbatim, with no provider calls and
//! no new diagnostics. A second concurrent completion with the same hash is
//! a no-op.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use dcs_assess::{Assessment, CoverageMatrix, ExtractionDiagnostic};
use dcs_regulatory::CompiledPlan;

use crate::manifest::RunManifest;

/// The complete cached output of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRun {
    /// The run hash the entry is keyed by.
    pub run_hash: String,
    /// Compiled plan.
    pub plan: CompiledPlan,
    /// Assessments in plan order.
    pub assessments: Vec<Assessment>,
    /// Diagnostics in plan order.
    pub diagnostics: Vec<ExtractionDiagnostic>,
    /// Coverage matrix.
    pub coverage: CoverageMatrix,
    /// Manifest.
    pub manifest: RunManifest,
}

/// Thread-safe, cloneable run cache.
#[derive(Debug, Clone, Default)]
pub struct RunCache {
    inner: Arc<RwLock<BTreeMap<String, CachedRun>>>,
}

impl RunCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a run hash.
    pub fn get(&self, run_hash: &str) -> Option<CachedRun> {
        self.inner.read().get(run_hash).cloned()
    }

    /// Store an output; write-once per run hash.
    ///
    /// Returns the stored entry — the existing one when the key was already
    /// present, so concurrent completions converge on one value.
    pub fn store(&self, entry: CachedRun) -> CachedRun {
        let mut guard = self.inner.write();
        guard
            .entry(entry.run_hash.clone())
            .or_insert(entry)
            .clone()
    }

    /// Number of cached runs.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
