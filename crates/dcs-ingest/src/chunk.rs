//! # Fixed-Rule Chunking
//!
//! Splits extracted pages into overlapping fixed-length chunks. Chunking
//! never crosses a page boundary, emits chunks in `(page, start_offset)`
//! order, and derives each chunk id from `(doc_hash, page, start, end)` so
//! re-chunking identical bytes with identical parameters reproduces identical
//! ids.
//!
//! Offsets are character offsets (matching `char_count` on pages), not byte
//! offsets, so multi-byte text chunks deterministically.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dcs_core::{ChunkId, DocHash};

use crate::extract::ExtractedPage;

/// Default chunk length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 800;

/// Default overlap between consecutive chunks, in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// Chunking parameters. Participates in the run fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkParams {
    /// Target chunk length in characters.
    pub size: usize,
    /// Overlap between consecutive chunks in characters.
    pub overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkParams {
    /// Validate the parameter combination.
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.size == 0 {
            return Err(ChunkError::InvalidParams(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.overlap >= self.size {
            return Err(ChunkError::InvalidParams(format!(
                "chunk overlap ({}) must be less than chunk size ({})",
                self.overlap, self.size
            )));
        }
        Ok(())
    }
}

/// Chunking failures.
#[derive(Error, Debug)]
pub enum ChunkError {
    /// The parameter combination is not usable.
    #[error("invalid chunk parameters: {0}")]
    InvalidParams(String),
}

/// One chunk of a document page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    /// Stable content-derived chunk identifier.
    pub chunk_id: ChunkId,
    /// Document the chunk belongs to.
    pub doc_hash: DocHash,
    /// 1-based page number.
    pub page_number: u32,
    /// Start character offset within the page.
    pub start_offset: usize,
    /// End character offset within the page (exclusive).
    pub end_offset: usize,
    /// Chunk text.
    pub text: String,
}

/// Split one page deterministically into overlapping chunks.
///
/// An empty page emits exactly one empty chunk with offsets `(0, 0)` so the
/// page remains represented in the index.
pub fn build_page_chunks(
    doc_hash: &DocHash,
    page_number: u32,
    text: &str,
    params: &ChunkParams,
) -> Result<Vec<ChunkPayload>, ChunkError> {
    params.validate()?;

    if text.is_empty() {
        return Ok(vec![ChunkPayload {
            chunk_id: ChunkId::derive(doc_hash, page_number, 0, 0),
            doc_hash: doc_hash.clone(),
            page_number,
            start_offset: 0,
            end_offset: 0,
            text: String::new(),
        }]);
    }

    let chars: Vec<char> = text.chars().collect();
    let step = params.size - params.overlap;
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let end = usize::min(chars.len(), start + params.size);
        chunks.push(ChunkPayload {
            chunk_id: ChunkId::derive(doc_hash, page_number, start, end),
            doc_hash: doc_hash.clone(),
            page_number,
            start_offset: start,
            end_offset: end,
            text: chars[start..end].iter().collect(),
        });
        if end == chars.len() {
            break;
        }
        start += step;
    }

    Ok(chunks)
}

/// Chunk every page of a document, in `(page, start_offset)` order.
pub fn chunk_pages(
    doc_hash: &DocHash,
    pages: &[ExtractedPage],
    params: &ChunkParams,
) -> Result<Vec<ChunkPayload>, ChunkError> {
    let mut ordered: Vec<&ExtractedPage> = pages.iter().collect();
    ordered.sort_by_key(|p| p.page_number);

    let mut all = Vec::new();
    for page in ordered {
        all.extend(build_page_chunks(
            doc_hash,
            page.page_number,
            &page.text,
            params,
        )?);
    }
    Ok(all)
}
