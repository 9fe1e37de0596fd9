mod cohere;
mod pool;

pub use cohere::CohereReranker;
pub use pool::{RerankerLease, RerankerPool};

use std::{cmp::Ordering, sync::Arc};

use async_trait::async_trait;
use common::{
    error::AppError,
    utils::{
        config::{AppConfig, RerankingBackend},
        retry::{call_with_retry, RetryPolicy},
    },
};
use tracing::{debug, info, instrument, warn};

use crate::{Candidate, RankedResult};

/// Scores (query, document) pairs. Higher is more relevant.
#[async_trait]
pub trait RerankCapability: Send + Sync {
    fn name(&self) -> &'static str;

    /// One score per document, in input order.
    async fn score(&self, query: &str, documents: Vec<String>) -> Result<Vec<f32>, AppError>;
}

/// Builds the configured reranking capability, or `None` when reranking is off.
pub fn capability_from_config(
    config: &AppConfig,
) -> Result<Option<Arc<dyn RerankCapability>>, AppError> {
    if !config.reranking_enabled {
        return Ok(None);
    }

    match config.reranking_backend {
        RerankingBackend::Fastembed => {
            let pool: Arc<dyn RerankCapability> = RerankerPool::from_config(config)?;
            Ok(Some(pool))
        }
        RerankingBackend::Cohere => match config.cohere_api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(Some(Arc::new(CohereReranker::new(
                key,
                config.cohere_rerank_model.clone(),
            )))),
            _ => {
                info!("cohere reranking selected without an api key; reranking disabled");
                Ok(None)
            }
        },
    }
}

/// Turns fused candidates into the final shortlist. Never fails: when the
/// capability is missing or errors, the fused ordering is kept.
pub struct Reranker {
    capability: Option<Arc<dyn RerankCapability>>,
    retry: RetryPolicy,
}

impl Reranker {
    pub fn new(capability: Option<Arc<dyn RerankCapability>>, retry: RetryPolicy) -> Self {
        Self { capability, retry }
    }

    pub fn disabled() -> Self {
        Self::new(None, RetryPolicy::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.capability.is_some()
    }

    /// `query` must be the user's original question, not an expanded variant.
    #[instrument(skip_all, fields(candidates = candidates.len(), top_n))]
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        top_n: usize,
    ) -> Vec<RankedResult> {
        if candidates.is_empty() || top_n == 0 {
            return Vec::new();
        }
        let Some(capability) = self.capability.as_ref() else {
            return fallback(candidates, top_n);
        };

        let documents: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
        let scored = call_with_retry(&self.retry, "reranker.score", || {
            capability.score(query, documents.clone())
        })
        .await;

        match scored {
            Ok(scores) if scores.len() == candidates.len() => {
                debug!(backend = capability.name(), "candidates reranked");
                apply_scores(candidates, &scores, top_n)
            }
            Ok(scores) => {
                let err = AppError::RerankUnavailable(format!(
                    "{} returned {} scores for {} candidates",
                    capability.name(),
                    scores.len(),
                    candidates.len()
                ));
                warn!(error = %err, "falling back to similarity ordering");
                fallback(candidates, top_n)
            }
            Err(err) => {
                let err = AppError::RerankUnavailable(err.to_string());
                warn!(backend = capability.name(), error = %err, "falling back to similarity ordering");
                fallback(candidates, top_n)
            }
        }
    }
}

fn apply_scores(candidates: Vec<Candidate>, scores: &[f32], top_n: usize) -> Vec<RankedResult> {
    let mut scored: Vec<(Candidate, f32)> = candidates.into_iter().zip(scores.iter().copied()).collect();
    // Stable sort keeps the fused order between equal scores.
    scored.sort_by(|(_, a), (_, b)| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    scored
        .into_iter()
        .take(top_n)
        .enumerate()
        .map(|(idx, (candidate, score))| ranked(candidate, score, idx))
        .collect()
}

fn fallback(candidates: Vec<Candidate>, top_n: usize) -> Vec<RankedResult> {
    candidates
        .into_iter()
        .take(top_n)
        .enumerate()
        .map(|(idx, candidate)| {
            let score = candidate.score;
            ranked(candidate, score, idx)
        })
        .collect()
}

fn ranked(candidate: Candidate, score: f32, idx: usize) -> RankedResult {
    RankedResult {
        chunk: candidate.chunk,
        source: candidate.source,
        score,
        rank: idx + 1,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use common::storage::types::Chunk;

    use super::*;

    fn candidate(id: &str, text: &str, score: f32) -> Candidate {
        Candidate {
            chunk: Chunk {
                id: id.into(),
                document_id: "doc".into(),
                text: text.into(),
                start: 0,
                end: text.len(),
            },
            source: "doc.md".into(),
            score,
            support: 1,
        }
    }

    fn candidates() -> Vec<Candidate> {
        vec![
            candidate("a", "alpha", 0.9),
            candidate("b", "beta", 0.8),
            candidate("c", "gamma", 0.7),
        ]
    }

    fn ids(results: &[RankedResult]) -> Vec<&str> {
        results.iter().map(RankedResult::chunk_id).collect()
    }

    /// Scores documents by length, longest first.
    struct LengthScorer {
        seen_query: tokio::sync::Mutex<Option<String>>,
    }

    #[async_trait]
    impl RerankCapability for LengthScorer {
        fn name(&self) -> &'static str {
            "length"
        }

        async fn score(&self, query: &str, documents: Vec<String>) -> Result<Vec<f32>, AppError> {
            *self.seen_query.lock().await = Some(query.to_string());
            #[allow(clippy::cast_precision_loss)]
            let scores = documents.iter().map(|d| d.len() as f32).collect();
            Ok(scores)
        }
    }

    struct FailingScorer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RerankCapability for FailingScorer {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn score(&self, _query: &str, _documents: Vec<String>) -> Result<Vec<f32>, AppError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Err(AppError::Transient("503 from provider".into()))
        }
    }

    struct ShortScorer;

    #[async_trait]
    impl RerankCapability for ShortScorer {
        fn name(&self) -> &'static str {
            "short"
        }

        async fn score(&self, _query: &str, _documents: Vec<String>) -> Result<Vec<f32>, AppError> {
            Ok(vec![1.0])
        }
    }

    #[tokio::test]
    async fn orders_by_capability_score_with_original_query() {
        let scorer = Arc::new(LengthScorer {
            seen_query: tokio::sync::Mutex::new(None),
        });
        let reranker = Reranker::new(Some(scorer.clone()), RetryPolicy::immediate(1));

        let results = reranker.rerank("original question", candidates(), 2).await;

        assert_eq!(ids(&results), vec!["a", "c"]);
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].rank, 2);
        assert_eq!(
            scorer.seen_query.lock().await.as_deref(),
            Some("original question")
        );
    }

    #[tokio::test]
    async fn disabled_reranker_keeps_fused_order() {
        let results = Reranker::disabled().rerank("q", candidates(), 2).await;

        assert_eq!(ids(&results), vec!["a", "b"]);
        assert!((results[1].score - 0.8).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn failing_capability_degrades_after_retries() {
        let scorer = Arc::new(FailingScorer {
            calls: AtomicUsize::new(0),
        });
        let reranker = Reranker::new(Some(scorer.clone()), RetryPolicy::immediate(2));

        let results = reranker.rerank("q", candidates(), 3).await;

        assert_eq!(ids(&results), vec!["a", "b", "c"]);
        assert_eq!(scorer.calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn incomplete_scores_fall_back() {
        let reranker = Reranker::new(Some(Arc::new(ShortScorer)), RetryPolicy::immediate(1));
        let results = reranker.rerank("q", candidates(), 5).await;
        assert_eq!(ids(&results), vec!["a", "b", "c"]);
    }
}
