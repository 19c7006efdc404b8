//! # Content Digest — SHA-256 Identifiers
//!
//! Defines `ContentDigest` and the two digest entry points used across the
//! stack:
//!
//! - [`sha256_digest`] — digest of a canonical structure. Accepts only
//!   `&CanonicalBytes`, so every structured fingerprint (bundle checksum,
//!   plan hash, prompt hash, run hash) provably flows through the
//!   canonicalization pipeline.
//! - [`sha256_hex`] — digest of an opaque byte payload (document files).
//!   Content addressing of raw bytes does not canonicalize.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::canonical::CanonicalBytes;
use crate::error::ValidationError;

/// A 32-byte SHA-256 digest rendered as lowercase hex on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    /// Construct from raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character lowercase hex digest.
    pub fn from_hex(s: &str) -> Result<Self, ValidationError> {
        if s.len() != 64 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(ValidationError::InvalidDigest(s.to_string()));
        }
        let mut out = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            // Both characters validated above.
            let hi = hex_val(chunk[0]);
            let lo = hex_val(chunk[1]);
            out[i] = (hi << 4) | lo;
        }
        Ok(Self(out))
    }

    /// Render the digest as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in self.0 {
            s.push(char::from_digit((b >> 4) as u32, 16).unwrap_or('0'));
            s.push(char::from_digit((b & 0xf) as u32, 16).unwrap_or('0'));
        }
        s
    }

    /// Access the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

fn hex_val(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        _ => b - b'a' + 10,
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Compute the SHA-256 digest of canonical bytes.
///
/// The `&CanonicalBytes` parameter type is the enforcement point: there is no
/// way to digest a structure that did not pass through canonicalization.
pub fn sha256_digest(bytes: &CanonicalBytes) -> ContentDigest {
    let mut hasher = Sha256::new();
    hasher.update(bytes.as_bytes());
    ContentDigest(hasher.finalize().into())
}

/// Compute the lowercase-hex SHA-256 of an opaque byte payload.
///
/// Reserved for raw content (document bytes, archive entries). Structured
/// values must go through [`sha256_digest`] instead.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    ContentDigest(hasher.finalize().into()).to_hex()
}
