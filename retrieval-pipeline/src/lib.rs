#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod answer_retrieval;
pub mod cache;
pub mod expansion;
pub mod llm_instructions;
pub mod orchestrator;
pub mod pipeline;
pub mod reranking;
pub mod retriever;
pub mod scoring;

use common::storage::types::Chunk;
use serde::Serialize;

pub use answer_retrieval::Answer;
pub use cache::ResponseCache;
pub use expansion::QueryExpander;
pub use orchestrator::AnswerOrchestrator;
pub use pipeline::{PipelineStageTimings, StageKind};
pub use reranking::{RerankCapability, Reranker};
pub use retriever::Retriever;

/// A chunk proposed by similarity search, after fusion across query variants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub chunk: Chunk,
    /// Origin of the owning document, for display.
    pub source: String,
    /// Best similarity any variant reached for this chunk.
    pub score: f32,
    /// Number of query variants that surfaced this chunk.
    pub support: usize,
}

impl Candidate {
    pub fn chunk_id(&self) -> &str {
        &self.chunk.id
    }
}

/// Final shortlist entry handed to generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub chunk: Chunk,
    pub source: String,
    /// Reranker score, or the fused similarity when reranking was skipped.
    pub score: f32,
    /// 1-based position in the shortlist.
    pub rank: usize,
}

impl RankedResult {
    pub fn chunk_id(&self) -> &str {
        &self.chunk.id
    }
}
