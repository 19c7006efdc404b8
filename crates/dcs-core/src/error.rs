//! # Error Types — Structured Error Hierarchy
//!
//! Base error types shared across the stack. All errors use `thiserror` for
//! derive-based `Display` and `Error` implementations. Higher layers map
//! these onto the machine-readable error taxonomy surfaced at the HTTP edge
//! (`VALIDATION`, `NOT_FOUND`, `INTEGRITY`, ...).

use thiserror::Error;

/// Top-level error type for core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Canonicalization failed.
    #[error("canonicalization error: {0}")]
    Canonicalization(#[from] CanonicalizationError),

    /// Identifier or field validation failure.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error during canonical serialization.
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    /// JSON serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Validation failures for domain identifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Tenant identifier is empty, too long, or contains invalid characters.
    #[error("invalid tenant id: {0:?}")]
    InvalidTenant(String),

    /// Not a 64-character lowercase hex SHA-256 digest.
    #[error("invalid digest: {0:?}")]
    InvalidDigest(String),

    /// Not a valid document hash.
    #[error("invalid document hash: {0:?}")]
    InvalidDocHash(String),

    /// Not a valid chunk id.
    #[error("invalid chunk id: {0:?}")]
    InvalidChunkId(String),

    /// Datapoint key is empty or exceeds length limits.
    #[error("invalid datapoint key: {0:?}")]
    InvalidDatapointKey(String),

    /// Obligation code is empty or exceeds length limits.
    #[error("invalid obligation code: {0:?}")]
    InvalidObligationCode(String),
}
