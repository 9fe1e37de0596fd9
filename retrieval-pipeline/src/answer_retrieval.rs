use std::{collections::BTreeSet, fmt::Write as _, time::Duration};

use chrono::Utc;
use common::{
    storage::types::{CacheEntry, Citation},
    utils::text::preview,
};
use serde::Serialize;

use crate::{pipeline::PipelineStageTimings, RankedResult};

/// What a question returns to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    /// Cited passages in the order the generator referenced them. For an
    /// uncited answer this is the full context shortlist.
    pub citations: Vec<Citation>,
    /// False when the generator gave no citation that maps to a passage.
    pub cited: bool,
    pub cache_hit: bool,
    /// Passage texts handed to the generator, best first.
    pub context: Vec<String>,
    pub corpus_version: u64,
    #[serde(skip)]
    pub elapsed: Duration,
    #[serde(skip)]
    pub stage_timings: PipelineStageTimings,
}

impl Answer {
    /// Unique document origins behind the answer, sorted.
    pub fn sources(&self) -> Vec<String> {
        self.citations
            .iter()
            .map(|citation| citation.source.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn from_cache(entry: CacheEntry) -> Self {
        Self {
            text: entry.answer,
            citations: entry.citations,
            cited: entry.cited,
            cache_hit: true,
            context: entry.context,
            corpus_version: entry.corpus_version,
            elapsed: Duration::ZERO,
            stage_timings: PipelineStageTimings::default(),
        }
    }

    pub fn to_cache_entry(&self, ttl: Duration) -> CacheEntry {
        CacheEntry {
            answer: self.text.clone(),
            citations: self.citations.clone(),
            context: self.context.clone(),
            cited: self.cited,
            generated_at: Utc::now(),
            ttl_secs: ttl.as_secs(),
            corpus_version: self.corpus_version,
        }
    }
}

/// Numbered passages, each tagged with its chunk id and origin.
pub fn format_context(ranked: &[RankedResult]) -> String {
    let mut context = String::new();
    for (idx, result) in ranked.iter().enumerate() {
        let _ = write!(
            context,
            "{}. [{}] (source: {})\n{}\n\n",
            idx + 1,
            result.chunk.id,
            result.source,
            result.chunk.text.trim()
        );
    }
    context
}

pub fn create_user_message(query: &str, ranked: &[RankedResult]) -> String {
    format!(
        r"Question: {query}

Context from documents:
{context}
Instructions:
1. Search through ALL context passages for information relevant to the question.
2. Extract the answer directly from the context only.
3. Quote values, dates, names, titles, codes or identifiers exactly as written.
4. Do NOT infer beyond the text or use outside knowledge.
5. List the id in square brackets of every passage you used as a reference.
6. If the information is not explicitly stated in the context, answer: {no_answer}
",
        context = format_context(ranked),
        no_answer = crate::llm_instructions::NO_ANSWER,
    )
}

pub fn citation_for(result: &RankedResult) -> Citation {
    Citation {
        chunk_id: result.chunk.id.clone(),
        document_id: result.chunk.document_id.clone(),
        source: result.source.clone(),
        snippet: preview(&result.chunk.text),
    }
}

/// Maps generator citation markers back to ranked passages. A marker is a
/// chunk id, optionally in square brackets, or a 1-based passage number.
/// Unknown markers are dropped and duplicates removed.
pub fn map_citations(markers: &[String], ranked: &[RankedResult]) -> Vec<Citation> {
    let mut seen = BTreeSet::new();
    let mut citations = Vec::new();

    for marker in markers {
        let key = marker.trim().trim_start_matches('[').trim_end_matches(']').trim();
        let matched = ranked
            .iter()
            .find(|result| result.chunk.id == key)
            .or_else(|| {
                key.parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|idx| ranked.get(idx))
            });
        if let Some(result) = matched {
            if seen.insert(result.chunk.id.clone()) {
                citations.push(citation_for(result));
            }
        }
    }
    citations
}
