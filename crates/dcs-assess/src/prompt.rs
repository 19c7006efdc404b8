//! # Extraction Prompt
//!
//! The prompt is a structure, not a string: the canonical JSON form of
//! [`ExtractionPrompt`] is what gets hashed into `prompt_hash`, and the
//! rendered text is derived from the same structure. Two runs with identical
//! inputs therefore produce identical prompt hashes regardless of how the
//! provider chooses to consume the prompt.

use serde::{Deserialize, Serialize};

use dcs_core::{sha256_digest, CanonicalBytes, CanonicalizationError, ChunkId, DatapointKey};
use dcs_regulatory::{CompiledDatapoint, DatapointType};
use dcs_retrieval::RetrievalResult;

/// Version tag of the prompt template. Part of the run fingerprint.
pub const PROMPT_TEMPLATE_VERSION: &str = "extraction-v1";

/// One retrieved chunk as presented to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptChunk {
    /// Chunk identifier the provider must cite.
    pub chunk_id: ChunkId,
    /// Chunk text.
    pub text: String,
}

/// The structured prompt for one datapoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionPrompt {
    /// Prompt template version.
    pub template_version: String,
    /// Datapoint under assessment.
    pub datapoint_key: DatapointKey,
    /// Datapoint title.
    pub title: String,
    /// Disclosure reference.
    pub disclosure_reference: String,
    /// Narrative or metric.
    pub datapoint_type: DatapointType,
    /// Whether a baseline is required.
    pub requires_baseline: bool,
    /// Retrieved chunks, in retrieval order.
    pub chunks: Vec<PromptChunk>,
}

impl ExtractionPrompt {
    /// Build the prompt for a datapoint from its retrieval results.
    pub fn build(datapoint: &CompiledDatapoint, retrieved: &[RetrievalResult]) -> Self {
        Self {
            template_version: PROMPT_TEMPLATE_VERSION.to_string(),
            datapoint_key: datapoint.datapoint_key.clone(),
            title: datapoint.title.clone(),
            disclosure_reference: datapoint.disclosure_reference.clone(),
            datapoint_type: datapoint.datapoint_type,
            requires_baseline: datapoint.requires_baseline,
            chunks: retrieved
                .iter()
                .map(|r| PromptChunk {
                    chunk_id: r.chunk_id.clone(),
                    text: r.text.clone(),
                })
                .collect(),
        }
    }

    /// SHA-256 over the canonical prompt structure.
    pub fn hash(&self) -> Result<String, CanonicalizationError> {
        let canonical = CanonicalBytes::new(self)?;
        Ok(sha256_digest(&canonical).to_hex())
    }

    /// Render the prompt as provider input text.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Assess datapoint {key} ({kind}): {title}",
            key = self.datapoint_key,
            kind = match self.datapoint_type {
                DatapointType::Narrative => "narrative",
                DatapointType::Metric => "metric",
            },
            title = self.title,
        ));
        if !self.disclosure_reference.is_empty() {
            out.push_str(&format!(" [{}]", self.disclosure_reference));
        }
        if self.requires_baseline {
            out.push_str("\nA baseline year and baseline value are required.");
        }
        out.push_str(
            "\nReturn JSON only, matching the provided schema. Cite evidence by chunk_id.\n",
        );
        for chunk in &self.chunks {
            out.push_str(&format!("\n[chunk {}]\n{}\n", chunk.chunk_id, chunk.text));
        }
        out
    }
}
