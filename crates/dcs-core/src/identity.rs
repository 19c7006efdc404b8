//! # Domain Identifiers — Validated Newtypes
//!
//! Newtype wrappers for the identifiers that cross crate boundaries. Each
//! wraps a `String` with a validated constructor so that a bare or malformed
//! string cannot masquerade as an identifier deeper in the pipeline.
//!
//! `DocHash` and `ChunkId` are content-derived: identical inputs always
//! produce identical identifiers, which is what makes re-ingestion and
//! re-chunking idempotent.

use serde::{Deserialize, Serialize};

use crate::digest::sha256_hex;
use crate::error::ValidationError;

fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

// ── TenantId ────────────────────────────────────────────────────────────────

/// Tenant identifier carried in the `X-Tenant-ID` header.
///
/// Non-empty, at most 64 characters, restricted to `[A-Za-z0-9._-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Create a validated tenant identifier.
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        let valid = !s.is_empty()
            && s.len() <= 64
            && s.bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
        if valid {
            Ok(Self(s))
        } else {
            Err(ValidationError::InvalidTenant(s))
        }
    }

    /// Return the tenant id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── DocHash ─────────────────────────────────────────────────────────────────

/// Content-addressed document identifier: lowercase-hex SHA-256 of the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocHash(String);

impl DocHash {
    /// Parse an existing 64-character lowercase hex document hash.
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        if is_hex64(&s) {
            Ok(Self(s))
        } else {
            Err(ValidationError::InvalidDocHash(s))
        }
    }

    /// Compute the document hash of a byte payload.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(sha256_hex(bytes))
    }

    /// Return the hash as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── ChunkId ─────────────────────────────────────────────────────────────────

/// Stable chunk identifier derived from document hash, page, and offsets.
///
/// `chunk_id = SHA-256(doc_hash ":" page_number ":" start ":" end)`, so the
/// id is a deterministic function of content and chunking parameters and is
/// stable across re-ingestion of identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    /// Parse an existing 64-character lowercase hex chunk id.
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        if is_hex64(&s) {
            Ok(Self(s))
        } else {
            Err(ValidationError::InvalidChunkId(s))
        }
    }

    /// Derive the chunk id for a span of a document page.
    pub fn derive(doc_hash: &DocHash, page_number: u32, start: usize, end: usize) -> Self {
        let seed = format!("{}:{}:{}:{}", doc_hash.as_str(), page_number, start, end);
        Self(sha256_hex(seed.as_bytes()))
    }

    /// Return the chunk id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── DatapointKey ────────────────────────────────────────────────────────────

/// Key of a single disclosure datapoint, e.g. `ESRS-E1-6`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatapointKey(String);

impl DatapointKey {
    /// Create a validated datapoint key (non-empty, at most 128 characters).
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        if s.trim().is_empty() || s.len() > 128 {
            Err(ValidationError::InvalidDatapointKey(s))
        } else {
            Ok(Self(s))
        }
    }

    /// Return the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DatapointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── ObligationCode ──────────────────────────────────────────────────────────

/// Code of an obligation (a grouped set of datapoints), e.g. `ESRS-E1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObligationCode(String);

impl ObligationCode {
    /// Create a validated obligation code (non-empty, at most 128 characters).
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        if s.trim().is_empty() || s.len() > 128 {
            Err(ValidationError::InvalidObligationCode(s))
        } else {
            Ok(Self(s))
        }
    }

    /// Return the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObligationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_id_accepts_reasonable_values() {
        assert!(TenantId::new("acme").is_ok());
        assert!(TenantId::new("acme-prod_01.eu").is_ok());
    }

    #[test]
    fn tenant_id_rejects_empty_and_invalid() {
        assert!(TenantId::new("").is_err());
        assert!(TenantId::new("a b").is_err());
        assert!(TenantId::new("x".repeat(65)).is_err());
    }

    #[test]
    fn doc_hash_from_bytes_is_deterministic() {
        let a = DocHash::from_bytes(b"report body");
        let b = DocHash::from_bytes(b"report body");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn doc_hash_rejects_non_hex() {
        assert!(DocHash::new("nothex").is_err());
        assert!(DocHash::new("G".repeat(64)).is_err());
    }

    #[test]
    fn chunk_id_derivation_matches_formula() {
        let doc = DocHash::from_bytes(b"doc");
        let id = ChunkId::derive(&doc, 3, 0, 800);
        let expected = sha256_hex(format!("{}:3:0:800", doc.as_str()).as_bytes());
        assert_eq!(id.as_str(), expected);
    }

    #[test]
    fn chunk_id_changes_with_any_component() {
        let doc = DocHash::from_bytes(b"doc");
        let base = ChunkId::derive(&doc, 1, 0, 100);
        assert_ne!(base, ChunkId::derive(&doc, 2, 0, 100));
        assert_ne!(base, ChunkId::derive(&doc, 1, 1, 100));
        assert_ne!(base, ChunkId::derive(&doc, 1, 0, 101));
    }

    #[test]
    fn datapoint_key_validation() {
        assert!(DatapointKey::new("ESRS-E1-6").is_ok());
        assert!(DatapointKey::new("  ").is_err());
        assert!(DatapointKey::new("x".repeat(129)).is_err());
    }

    #[test]
    fn identifiers_serialize_transparently() {
        let key = DatapointKey::new("ESRS-E1-1").unwrap();
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"ESRS-E1-1\"");
        let back: DatapointKey = serde_json::from_str("\"ESRS-E1-1\"").unwrap();
        assert_eq!(back, key);
    }
}
