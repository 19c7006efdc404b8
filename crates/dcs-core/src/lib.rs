//! # dcs-core — Foundational Types for the Disclosure Compliance Stack
//!
//! This crate is the bedrock of the stack. Every other crate in the workspace
//! depends on `dcs-core`; it depends on nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for domain primitives.** `TenantId`, `DocHash`,
//!    `ChunkId`, `DatapointKey`, `ObligationCode` — all newtypes with
//!    validated constructors. No bare strings for identifiers.
//!
//! 2. **`CanonicalBytes` newtype.** ALL fingerprint computation flows through
//!    `CanonicalBytes::new()`. No raw `serde_json::to_vec()` for digests.
//!    Ever. This prevents the canonicalization-split defect class by
//!    construction.
//!
//! 3. **`sha256_digest()` accepts only `&CanonicalBytes`.** Compile-time
//!    enforcement that all structured digest paths flow through
//!    canonicalization. Raw byte content (document files) hashes through
//!    `sha256_hex()` which is reserved for opaque byte payloads.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `dcs-*` crates (this is the leaf of the DAG).
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.
//! - All public types derive `Debug`, `Clone`, and implement
//!   `Serialize`/`Deserialize` where they cross a boundary.

pub mod canonical;
pub mod digest;
pub mod error;
pub mod identity;

// Re-export primary types for ergonomic imports.
pub use canonical::CanonicalBytes;
pub use digest::{sha256_digest, sha256_hex, ContentDigest};
pub use error::{CanonicalizationError, CoreError, ValidationError};
pub use identity::{ChunkId, DatapointKey, DocHash, ObligationCode, TenantId};
