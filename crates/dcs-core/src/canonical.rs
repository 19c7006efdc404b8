//! # Canonical Serialization — Deterministic Byte Production
//!
//! This module defines `CanonicalBytes`, the sole construction path for bytes
//! used in fingerprint computation across the entire stack: bundle checksums,
//! plan hashes, prompt hashes, and run hashes.
//!
//! ## Invariant
//!
//! The `CanonicalBytes` newtype has a private inner field. The only way to
//! construct it is through `CanonicalBytes::new()`, which serializes with
//! sorted object keys, compact separators, and UTF-8 output. Any function
//! requiring canonical bytes for digest computation must accept
//! `&CanonicalBytes`, so a non-canonical serialization path cannot reach a
//! digest by accident.
//!
//! ## Number normalization
//!
//! Integers serialize without a fractional part. Decimals serialize in the
//! shortest representation that round-trips (serde_json's ryu formatting),
//! which is itself a fixed point: canonicalizing the parse of a canonical
//! document reproduces the same bytes.

use serde::Serialize;
use serde_json::Value;

use crate::error::CanonicalizationError;

/// Bytes produced exclusively by deterministic canonicalization.
///
/// # Invariants
///
/// - The only constructor is `CanonicalBytes::new()`.
/// - Object keys are emitted in ascending byte order.
/// - No insignificant whitespace.
/// - String escaping follows JSON exactly as `serde_json` emits it.
///
/// These invariants are enforced by the constructor and cannot be violated by
/// downstream code because the inner `Vec<u8>` is private.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    /// Construct canonical bytes from any serializable value.
    ///
    /// This is the ONLY way to construct `CanonicalBytes`. All structured
    /// digest computation in the stack must flow through this constructor.
    pub fn new(obj: &impl Serialize) -> Result<Self, CanonicalizationError> {
        let value = serde_json::to_value(obj)?;
        let mut out = Vec::new();
        write_canonical(&value, &mut out)?;
        Ok(Self(out))
    }

    /// Access the canonical bytes for digest computation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume and return the canonical byte vector.
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for CanonicalBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Recursively serialize a JSON value with explicitly sorted object keys.
///
/// Key ordering is applied here rather than relying on the map type so the
/// output is stable regardless of which `serde_json` map representation is
/// active in the dependency graph.
fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<(), CanonicalizationError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => {
            out.extend_from_slice(n.to_string().as_bytes());
        }
        Value::String(s) => {
            let escaped = serde_json::to_string(s)?;
            out.extend_from_slice(escaped.as_bytes());
        }
        Value::Array(items) => {
            out.push(b'[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            for (idx, key) in keys.iter().enumerate() {
                if idx > 0 {
                    out.push(b',');
                }
                let escaped = serde_json::to_string(key)?;
                out.extend_from_slice(escaped.as_bytes());
                out.push(b':');
                // Key is present by construction.
                if let Some(item) = map.get(*key) {
                    write_canonical(item, out)?;
                }
            }
            out.push(b'}');
        }
    }
    Ok(())
}
