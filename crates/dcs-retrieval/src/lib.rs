//! # dcs-retrieval — Deterministic Hybrid Retrieval
//!
//! Ranks chunks for a query by combining a lexical token-match score with a
//! cosine vector score under configured weights. The ordering contract is
//! strict: primary key is descending combined score, ties break by ascending
//! `chunk_id` — never insertion order, never a timestamp.
//!
//! Scores are rounded to eight decimal places before ordering so that the
//! ranking is stable across platforms and floating-point summation orders.
//!
//! Embeddings are optional. A chunk without an embedding scores zero on the
//! vector component and degrades gracefully to its lexical score; the
//! tie-break still holds.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use dcs_core::{ChunkId, DocHash};

/// Retrieval policy. Participates in the run fingerprint, so every field is
/// part of the reproducibility contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalPolicy {
    /// Policy version tag.
    pub version: String,
    /// Weight of the lexical score in the combined score.
    pub lexical_weight: f64,
    /// Weight of the vector score in the combined score.
    pub vector_weight: f64,
    /// Tie-break rule; only `"chunk_id"` is defined.
    pub tie_break: String,
}

impl Default for RetrievalPolicy {
    fn default() -> Self {
        Self {
            version: "hybrid-v1".to_string(),
            lexical_weight: 0.6,
            vector_weight: 0.4,
            tie_break: "chunk_id".to_string(),
        }
    }
}

/// A chunk as held in the retrieval index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    /// Stable chunk identifier.
    pub chunk_id: ChunkId,
    /// Owning document.
    pub doc_hash: DocHash,
    /// 1-based page number.
    pub page_number: u32,
    /// Start character offset within the page.
    pub start_offset: usize,
    /// End character offset within the page (exclusive).
    pub end_offset: usize,
    /// Chunk text.
    pub text: String,
    /// Optional embedding vector.
    pub embedding: Option<Vec<f32>>,
}

/// One ranked retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Chunk identifier.
    pub chunk_id: ChunkId,
    /// Owning document.
    pub doc_hash: DocHash,
    /// 1-based page number.
    pub page_number: u32,
    /// Start character offset within the page.
    pub start_offset: usize,
    /// End character offset within the page (exclusive).
    pub end_offset: usize,
    /// Chunk text.
    pub text: String,
    /// Normalized lexical token-match score.
    pub lexical_score: f64,
    /// Cosine similarity against the query embedding (0 when unavailable).
    pub vector_score: f64,
    /// `lexical_weight * lexical + vector_weight * vector`, rounded.
    pub combined_score: f64,
}

/// Lowercase whitespace tokenization of the query.
fn tokenize(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Fraction of query terms present in the chunk text.
fn lexical_score(query_terms: &[String], text: &str) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let text_lower = text.to_lowercase();
    let hits = query_terms
        .iter()
        .filter(|term| text_lower.contains(term.as_str()))
        .count();
    hits as f64 / query_terms.len() as f64
}

/// Cosine similarity; zero for mismatched dimensions or zero-norm vectors.
fn cosine_similarity(lhs: &[f32], rhs: &[f32]) -> f64 {
    if lhs.len() != rhs.len() || lhs.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut lhs_norm = 0.0f64;
    let mut rhs_norm = 0.0f64;
    for (a, b) in lhs.iter().zip(rhs.iter()) {
        let (a, b) = (*a as f64, *b as f64);
        dot += a * b;
        lhs_norm += a * a;
        rhs_norm += b * b;
    }
    if lhs_norm == 0.0 || rhs_norm == 0.0 {
        return 0.0;
    }
    dot / (lhs_norm.sqrt() * rhs_norm.sqrt())
}

/// Round to eight decimal places for platform-stable ordering.
fn round8(x: f64) -> f64 {
    (x * 1e8).round() / 1e8
}

/// Run deterministic hybrid retrieval over an already-scoped chunk set.
///
/// The caller is responsible for scoping `chunks` to the querying company's
/// linked documents; [`retrieve_scoped`] applies that filter explicitly.
pub fn retrieve(
    chunks: &[IndexedChunk],
    query: &str,
    query_embedding: Option<&[f32]>,
    top_k: usize,
    policy: &RetrievalPolicy,
) -> Vec<RetrievalResult> {
    if top_k == 0 {
        return Vec::new();
    }

    let query_terms = tokenize(query);

    let mut scored: Vec<RetrievalResult> = chunks
        .iter()
        .map(|chunk| {
            let lex = lexical_score(&query_terms, &chunk.text);
            let vec_score = match (query_embedding, chunk.embedding.as_deref()) {
                (Some(q), Some(e)) => cosine_similarity(q, e),
                _ => 0.0,
            };
            let combined = policy.lexical_weight * lex + policy.vector_weight * vec_score;
            RetrievalResult {
                chunk_id: chunk.chunk_id.clone(),
                doc_hash: chunk.doc_hash.clone(),
                page_number: chunk.page_number,
                start_offset: chunk.start_offset,
                end_offset: chunk.end_offset,
                text: chunk.text.clone(),
                lexical_score: round8(lex),
                vector_score: round8(vec_score),
                combined_score: round8(combined),
            }
        })
        .collect();

    // Descending combined score; ties break by ascending chunk_id.
    scored.sort_by(|a, b| {
        b.combined_score
            .total_cmp(&a.combined_score)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    scored.truncate(top_k);
    scored
}

/// Hybrid retrieval restricted to a company's linked document set.
///
/// Chunks whose `doc_hash` is outside `allowed_docs` never participate, which
/// is the isolation boundary between companies and tenants.
pub fn retrieve_scoped(
    chunks: &[IndexedChunk],
    allowed_docs: &BTreeSet<DocHash>,
    query: &str,
    query_embedding: Option<&[f32]>,
    top_k: usize,
    policy: &RetrievalPolicy,
) -> Vec<RetrievalResult> {
    let scoped: Vec<IndexedChunk> = chunks
        .iter()
        .filter(|c| allowed_docs.contains(&c.doc_hash))
        .cloned()
        .collect();
    retrieve(&scoped, query, query_embedding, top_k, policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(doc: &DocHash, page: u32, start: usize, text: &str) -> IndexedChunk {
        IndexedChunk {
            chunk_id: ChunkId::derive(doc, page, start, start + text.chars().count()),
            doc_hash: doc.clone(),
            page_number: page,
            start_offset: start,
            end_offset: start + text.chars().count(),
            text: text.to_string(),
            embedding: None,
        }
    }

    #[test]
    fn lexical_score_is_term_fraction() {
        let terms = tokenize("scope emissions 2026");
        assert_eq!(lexical_score(&terms, "scope 1 emissions were flat"), 2.0 / 3.0);
        assert_eq!(lexical_score(&terms, "nothing relevant"), 0.0);
        assert_eq!(lexical_score(&[], "anything"), 0.0);
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-12);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn results_ordered_by_score_then_chunk_id() {
        let doc = DocHash::from_bytes(b"ranking");
        let chunks = vec![
            chunk(&doc, 1, 0, "emissions data for the year"),
            chunk(&doc, 1, 100, "unrelated narrative text"),
            chunk(&doc, 2, 0, "emissions data for the year"),
        ];
        let results = retrieve(&chunks, "emissions data", None, 10, &RetrievalPolicy::default());
        assert_eq!(results.len(), 3);
        // Two chunks tie on score; the lower chunk_id comes first.
        assert!(results[0].combined_score >= results[1].combined_score);
        assert_eq!(results[0].combined_score, results[1].combined_score);
        assert!(results[0].chunk_id < results[1].chunk_id);
        assert_eq!(results[2].lexical_score, 0.0);
    }

    #[test]
    fn retrieval_is_deterministic() {
        let doc = DocHash::from_bytes(b"determinism");
        let chunks: Vec<IndexedChunk> = (0..20)
            .map(|i| chunk(&doc, 1, i * 50, &format!("chunk number {i} emissions")))
            .collect();
        let a = retrieve(&chunks, "emissions chunk", None, 5, &RetrievalPolicy::default());
        let b = retrieve(&chunks, "emissions chunk", None, 5, &RetrievalPolicy::default());
        assert_eq!(a, b);
    }

    #[test]
    fn top_k_zero_returns_nothing() {
        let doc = DocHash::from_bytes(b"none");
        let chunks = vec![chunk(&doc, 1, 0, "text")];
        assert!(retrieve(&chunks, "text", None, 0, &RetrievalPolicy::default()).is_empty());
    }

    #[test]
    fn missing_embedding_degrades_to_lexical_only() {
        let doc = DocHash::from_bytes(b"embeddings");
        let mut with_embedding = chunk(&doc, 1, 0, "carbon offsets");
        with_embedding.embedding = Some(vec![1.0, 0.0]);
        let without_embedding = chunk(&doc, 2, 0, "carbon offsets");

        let query_embedding = [1.0f32, 0.0];
        let results = retrieve(
            &[with_embedding.clone(), without_embedding.clone()],
            "carbon",
            Some(&query_embedding),
            10,
            &RetrievalPolicy::default(),
        );
        let scored_with = results
            .iter()
            .find(|r| r.chunk_id == with_embedding.chunk_id)
            .unwrap();
        let scored_without = results
            .iter()
            .find(|r| r.chunk_id == without_embedding.chunk_id)
            .unwrap();
        assert_eq!(scored_with.vector_score, 1.0);
        assert_eq!(scored_without.vector_score, 0.0);
        assert!(scored_with.combined_score > scored_without.combined_score);
    }

    #[test]
    fn scoped_retrieval_excludes_unlinked_documents() {
        let linked = DocHash::from_bytes(b"linked doc");
        let foreign = DocHash::from_bytes(b"foreign doc");
        let chunks = vec![
            chunk(&linked, 1, 0, "emissions disclosure"),
            chunk(&foreign, 1, 0, "emissions disclosure"),
        ];
        let allowed: BTreeSet<DocHash> = [linked.clone()].into_iter().collect();
        let results = retrieve_scoped(
            &chunks,
            &allowed,
            "emissions",
            None,
            10,
            &RetrievalPolicy::default(),
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_hash, linked);
    }

    #[test]
    fn scores_are_rounded_to_eight_places() {
        let doc = DocHash::from_bytes(b"rounding");
        let chunks = vec![chunk(&doc, 1, 0, "one two three")];
        let results = retrieve(
            &chunks,
            "one two missing",
            None,
            1,
            &RetrievalPolicy::default(),
        );
        // 2/3 rounded at 8 places.
        assert_eq!(results[0].lexical_score, 0.66666667);
    }
}
