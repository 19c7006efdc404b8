//! # Bundle Registry
//!
//! In-memory registry of validated bundles keyed by `(bundle_id, version)`.
//! Upserts are idempotent by checksum; import supports two modes:
//!
//! - `merge` — upsert the provided bundles, leave everything else untouched.
//! - `sync` — upsert the provided bundles and deactivate registry entries
//!   absent from the import set.
//!
//! Deactivated bundles stay resolvable for historical runs but are excluded
//! from the active set offered to new compilations.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use dcs_core::ContentDigest;

use crate::schema::{bundle_checksum, validate_bundle, Bundle, BundleError};

/// One registry entry.
#[derive(Debug, Clone)]
pub struct StoredBundle {
    /// The validated bundle payload.
    pub bundle: Bundle,
    /// Canonical checksum of the payload.
    pub checksum: ContentDigest,
    /// Whether the bundle participates in new compilations.
    pub active: bool,
}

/// Summary row for listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleSummary {
    /// Bundle identifier.
    pub bundle_id: String,
    /// Bundle version.
    pub version: String,
    /// Canonical checksum (hex).
    pub checksum: String,
    /// Active flag.
    pub active: bool,
}

/// Import mode for [`BundleRegistry::import`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Upsert only.
    Merge,
    /// Upsert and deactivate entries absent from the import set.
    Sync,
}

/// Result of an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// `(bundle_id, version, checksum)` of every imported bundle, sorted.
    pub synced: Vec<(String, String, String)>,
    /// `(bundle_id, version)` of entries deactivated by `sync` mode, sorted.
    pub deactivated: Vec<(String, String)>,
}

/// Thread-safe, cloneable in-memory bundle registry.
///
/// The `RwLock` is `parking_lot`, not `tokio::sync` — operations are
/// synchronous and the lock is never held across an `.await` point.
#[derive(Debug, Clone, Default)]
pub struct BundleRegistry {
    inner: Arc<RwLock<BTreeMap<(String, String), StoredBundle>>>,
}

impl BundleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a bundle; idempotent by checksum.
    ///
    /// Returns the checksum and whether the entry changed.
    pub fn upsert(&self, bundle: Bundle) -> Result<(ContentDigest, bool), BundleError> {
        validate_bundle(&bundle)?;
        let checksum = bundle_checksum(&bundle)?;
        let key = (bundle.bundle_id.clone(), bundle.version.clone());

        let mut guard = self.inner.write();
        if let Some(existing) = guard.get_mut(&key) {
            if existing.checksum == checksum {
                existing.active = true;
                return Ok((checksum, false));
            }
        }
        guard.insert(
            key,
            StoredBundle {
                bundle,
                checksum,
                active: true,
            },
        );
        Ok((checksum, true))
    }

    /// Fetch one bundle by id and version.
    pub fn get(&self, bundle_id: &str, version: &str) -> Option<StoredBundle> {
        self.inner
            .read()
            .get(&(bundle_id.to_string(), version.to_string()))
            .cloned()
    }

    /// All active bundles, in `(bundle_id, version)` order.
    pub fn active_bundles(&self) -> Vec<Bundle> {
        self.inner
            .read()
            .values()
            .filter(|s| s.active)
            .map(|s| s.bundle.clone())
            .collect()
    }

    /// Summary rows for every entry, in `(bundle_id, version)` order.
    pub fn list(&self) -> Vec<BundleSummary> {
        self.inner
            .read()
            .values()
            .map(|s| BundleSummary {
                bundle_id: s.bundle.bundle_id.clone(),
                version: s.bundle.version.clone(),
                checksum: s.checksum.to_hex(),
                active: s.active,
            })
            .collect()
    }

    /// Import a set of bundles under the given mode.
    pub fn import(&self, bundles: Vec<Bundle>, mode: SyncMode) -> Result<SyncReport, BundleError> {
        let mut synced = Vec::new();
        let mut imported_keys = std::collections::BTreeSet::new();

        for bundle in bundles {
            let key = (bundle.bundle_id.clone(), bundle.version.clone());
            let (checksum, _) = self.upsert(bundle)?;
            synced.push((key.0.clone(), key.1.clone(), checksum.to_hex()));
            imported_keys.insert(key);
        }
        synced.sort();

        let mut deactivated = Vec::new();
        if mode == SyncMode::Sync {
            let mut guard = self.inner.write();
            for (key, stored) in guard.iter_mut() {
                if stored.active && !imported_keys.contains(key) {
                    stored.active = false;
                    deactivated.push(key.clone());
                }
            }
        }
        deactivated.sort();

        tracing::info!(
            imported = synced.len(),
            deactivated = deactivated.len(),
            mode = ?mode,
            "bundle registry import"
        );

        Ok(SyncReport {
            synced,
            deactivated,
        })
    }
}
