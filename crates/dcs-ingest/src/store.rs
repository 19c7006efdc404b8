//! # Content-Addressed Document Store
//!
//! Immutable byte storage keyed by content hash. Writing bytes that already
//! exist returns the existing `DocHash` without a rewrite; retrieval either
//! returns the original bytes or fails. There is no mutation path.
//!
//! ## Integrity Invariant
//!
//! Every read re-hashes the retrieved content and compares it against the
//! requested hash. A mismatch is a fatal `IntegrityMismatch` — corruption and
//! substitution are both detected at the read boundary, never propagated.
//!
//! Dedup across tenants happens here at the storage layer; *visibility* is a
//! separate concern enforced by company-document links in the serving layer.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use dcs_core::DocHash;

/// Failures of the document store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested document is not present.
    #[error("document not found: {0}")]
    NotFound(DocHash),

    /// Stored bytes no longer hash to the requested digest. Fatal.
    #[error("integrity mismatch for {expected}: stored bytes hash to {actual}")]
    IntegrityMismatch {
        /// The digest the caller asked for.
        expected: DocHash,
        /// The digest the stored bytes actually produce.
        actual: DocHash,
    },

    /// The underlying storage is unavailable. Retryable.
    #[error("storage unavailable: {0}")]
    Unavailable(#[from] io::Error),
}

/// A content-addressed document store backed by the filesystem.
///
/// Documents live at `<root>/<doc_hash>`. Writers are idempotent by hash, so
/// concurrent ingestion of identical bytes converges on a single stored copy.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    /// Create a store rooted at the given directory, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, hash: &DocHash) -> PathBuf {
        self.root.join(hash.as_str())
    }

    /// Store a byte payload, returning its hash and whether it already existed.
    ///
    /// Existing content is never rewritten: the write path is append-only and
    /// idempotent by `doc_hash`.
    pub fn put(&self, bytes: &[u8]) -> Result<(DocHash, bool), StoreError> {
        let hash = DocHash::from_bytes(bytes);
        let path = self.path_for(&hash);
        if path.exists() {
            return Ok((hash, true));
        }
        // Write to a sibling temp file then rename, so a partially written
        // payload can never be observed under its content address.
        let tmp = self.root.join(format!(".{}.tmp", hash.as_str()));
        fs::write(&tmp, bytes)?;
        match fs::rename(&tmp, &path) {
            Ok(()) => {}
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                // A concurrent writer may have landed the same content first.
                if !path.exists() {
                    return Err(StoreError::Unavailable(e));
                }
            }
        }
        tracing::debug!(doc_hash = %hash, size = bytes.len(), "stored document bytes");
        Ok((hash, false))
    }

    /// Retrieve the bytes for a document hash, verifying integrity.
    pub fn get(&self, hash: &DocHash) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(hash);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(hash.clone()))
            }
            Err(e) => return Err(StoreError::Unavailable(e)),
        };
        let actual = DocHash::from_bytes(&bytes);
        if &actual != hash {
            return Err(StoreError::IntegrityMismatch {
                expected: hash.clone(),
                actual,
            });
        }
        Ok(bytes)
    }

    /// Whether a document is present.
    pub fn contains(&self, hash: &DocHash) -> bool {
        self.path_for(hash).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, DocumentStore) {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn put_then_get_round_trips() {
        let (_dir, store) = store();
        let (hash, existed) = store.put(b"annual report 2026").unwrap();
        assert!(!existed);
        assert_eq!(store.get(&hash).unwrap(), b"annual report 2026");
    }

    #[test]
    fn put_is_idempotent_by_hash() {
        let (_dir, store) = store();
        let (h1, first) = store.put(b"same bytes").unwrap();
        let (h2, second) = store.put(b"same bytes").unwrap();
        assert_eq!(h1, h2);
        assert!(!first);
        assert!(second, "second write of identical bytes reports existing");
    }

    #[test]
    fn get_unknown_hash_is_not_found() {
        let (_dir, store) = store();
        let missing = DocHash::from_bytes(b"never stored");
        match store.get(&missing) {
            Err(StoreError::NotFound(h)) => assert_eq!(h, missing),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn corrupted_bytes_fail_integrity_check() {
        let (dir, store) = store();
        let (hash, _) = store.put(b"original payload").unwrap();
        // Corrupt the stored file behind the store's back.
        std::fs::write(dir.path().join(hash.as_str()), b"tampered").unwrap();
        match store.get(&hash) {
            Err(StoreError::IntegrityMismatch { expected, actual }) => {
                assert_eq!(expected, hash);
                assert_ne!(actual, hash);
            }
            other => panic!("expected IntegrityMismatch, got {other:?}"),
        }
    }

    #[test]
    fn contains_reflects_presence() {
        let (_dir, store) = store();
        let missing = DocHash::from_bytes(b"missing");
        assert!(!store.contains(&missing));
        let (hash, _) = store.put(b"present").unwrap();
        assert!(store.contains(&hash));
    }
}
