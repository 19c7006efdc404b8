//! # dcs-ingest — Document Ingestion Pipeline
//!
//! The front half of the compliance pipeline: immutable byte storage, page
//! extraction, and chunking. Everything here is deterministic — identical
//! bytes with identical parameters always produce identical pages, chunks,
//! and identifiers, which is what makes run fingerprints meaningful.
//!
//! - [`store`] — content-addressed document store with verify-on-read.
//! - [`extract`] — ordered per-page text extraction with parser versioning.
//! - [`chunk`] — fixed-rule splitting with stable, content-derived chunk ids.

pub mod chunk;
pub mod extract;
pub mod store;

pub use chunk::{build_page_chunks, chunk_pages, ChunkParams, ChunkPayload};
pub use extract::{extract_pages, ExtractError, ExtractedPage};
pub use store::{DocumentStore, StoreError};
