//! # Evidence Packager
//!
//! Builds the exportable archive holding everything needed to re-derive a
//! run's result: manifest, assessments, cited evidence, compiled plan,
//! coverage matrix, and the referenced document bytes.
//!
//! The archive is byte-stable: entries are written in lexicographic path
//! order, stored uncompressed, with a fixed timestamp and fixed mode bits.
//! Two completed runs with identical run hashes produce byte-identical
//! archives.
//!
//! An integrity pass re-hashes every document payload before the archive is
//! finalized; any mismatch fails packaging rather than shipping corrupt
//! evidence.

use std::collections::BTreeSet;
use std::io::Write;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dcs_core::{sha256_hex, CanonicalBytes, CanonicalizationError, DocHash};
use dcs_ingest::{DocumentStore, StoreError};
use dcs_retrieval::IndexedChunk;

use crate::orchestrator::RunOutput;

/// One archive entry as reported by the preview endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackEntry {
    /// Entry path within the archive.
    pub path: String,
    /// Uncompressed size in bytes.
    pub size: usize,
    /// SHA-256 of the entry content.
    pub sha256: String,
}

/// Packaging failures.
#[derive(Error, Debug)]
pub enum EvidenceError {
    /// A referenced document could not be read.
    #[error("document store failure: {0}")]
    Store(#[from] StoreError),

    /// A document re-hashed to a different digest than the manifest pins.
    #[error("document integrity failure: expected {expected}, got {actual}")]
    Integrity {
        /// Digest pinned by the manifest.
        expected: String,
        /// Digest of the stored bytes.
        actual: String,
    },

    /// Canonical serialization failed.
    #[error("canonicalization failed: {0}")]
    Canonicalization(#[from] CanonicalizationError),

    /// Archive writing failed.
    #[error("archive write failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// IO failure while assembling the archive.
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
}

/// A chunk record exported into `evidence.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EvidenceRow {
    chunk_id: String,
    doc_hash: String,
    page_number: u32,
    start_offset: usize,
    end_offset: usize,
    text: String,
}

/// Assemble the archive's files as `(path, content)` pairs, sorted by path.
fn collect_pack_files(
    store: &DocumentStore,
    output: &RunOutput,
    chunks: &[IndexedChunk],
) -> Result<Vec<(String, Vec<u8>)>, EvidenceError> {
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();

    // assessments.jsonl — one canonical line per assessment, in plan order.
    let mut assessments_jsonl = Vec::new();
    for assessment in &output.assessments {
        assessments_jsonl.extend_from_slice(CanonicalBytes::new(assessment)?.as_bytes());
        assessments_jsonl.push(b'\n');
    }
    files.push(("assessments.jsonl".to_string(), assessments_jsonl));

    // evidence.jsonl — every cited chunk, sorted by chunk id.
    let cited: BTreeSet<&str> = output
        .assessments
        .iter()
        .flat_map(|a| a.evidence_chunk_ids.iter().map(|c| c.as_str()))
        .collect();
    let mut evidence_jsonl = Vec::new();
    for chunk_id in &cited {
        if let Some(chunk) = chunks.iter().find(|c| c.chunk_id.as_str() == *chunk_id) {
            let row = EvidenceRow {
                chunk_id: chunk.chunk_id.as_str().to_string(),
                doc_hash: chunk.doc_hash.as_str().to_string(),
                page_number: chunk.page_number,
                start_offset: chunk.start_offset,
                end_offset: chunk.end_offset,
                text: chunk.text.clone(),
            };
            evidence_jsonl.extend_from_slice(CanonicalBytes::new(&row)?.as_bytes());
            evidence_jsonl.push(b'\n');
        }
    }
    files.push(("evidence.jsonl".to_string(), evidence_jsonl));

    // compiled_plan.json / coverage_matrix.json / manifest.json.
    files.push((
        "compiled_plan.json".to_string(),
        CanonicalBytes::new(&output.plan)?.into_inner(),
    ));
    files.push((
        "coverage_matrix.json".to_string(),
        CanonicalBytes::new(&output.coverage)?.into_inner(),
    ));
    files.push((
        "manifest.json".to_string(),
        output.manifest.canonical_bytes()?,
    ));

    // documents/<doc_hash> — re-hashed before inclusion.
    for hash_str in &output.manifest.fingerprint.document_hashes {
        let doc_hash = DocHash::new(hash_str.clone()).map_err(|_| EvidenceError::Integrity {
            expected: hash_str.clone(),
            actual: "invalid-hash".to_string(),
        })?;
        let bytes = store.get(&doc_hash)?;
        let actual = sha256_hex(&bytes);
        if &actual != hash_str {
            return Err(EvidenceError::Integrity {
                expected: hash_str.clone(),
                actual,
            });
        }
        files.push((format!("documents/{hash_str}"), bytes));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Build the byte-stable archive.
pub fn build_evidence_pack(
    store: &DocumentStore,
    output: &RunOutput,
    chunks: &[IndexedChunk],
) -> Result<Vec<u8>, EvidenceError> {
    let files = collect_pack_files(store, output, chunks)?;

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    // Fixed timestamp (1980-01-01) and mode bits keep the archive
    // byte-identical across builds of the same run hash.
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    for (path, content) in &files {
        writer.start_file(path.clone(), options)?;
        writer.write_all(content)?;
    }

    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}

/// List the archive entries without building the archive bytes.
pub fn preview_evidence_pack(
    store: &DocumentStore,
    output: &RunOutput,
    chunks: &[IndexedChunk],
) -> Result<Vec<PackEntry>, EvidenceError> {
    let files = collect_pack_files(store, output, chunks)?;
    Ok(files
        .into_iter()
        .map(|(path, content)| PackEntry {
            path,
            size: content.len(),
            sha256: sha256_hex(&content),
        })
        .collect())
}
