use std::sync::Arc;

use common::{
    error::AppError,
    storage::store::VectorStore,
    utils::{
        embedding::{embed_with_retry, Embedder},
        retry::{call_with_retry, RetryPolicy},
    },
};
use futures::future::try_join_all;
use tracing::{debug, instrument};

use crate::{scoring::fuse_candidates, Candidate};

/// Nearest-neighbour search over the vector store, one search per query variant.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    retry: RetryPolicy,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, vectors: Arc<dyn VectorStore>, retry: RetryPolicy) -> Self {
        Self {
            embedder,
            vectors,
            retry,
        }
    }

    /// Embeds every variant, searches `k_per_variant` neighbours for each and
    /// fuses the results. Any search that still fails after retries fails the
    /// whole call; partial candidate sets are never returned.
    #[instrument(skip_all, fields(variants = variants.len(), k_per_variant))]
    pub async fn retrieve(
        &self,
        variants: &[String],
        k_per_variant: usize,
    ) -> Result<Vec<Candidate>, AppError> {
        if variants.is_empty() || k_per_variant == 0 {
            return Ok(Vec::new());
        }

        let embeddings =
            embed_with_retry(self.embedder.as_ref(), variants.to_vec(), &self.retry).await?;

        let searches = embeddings.iter().map(|embedding| async move {
            call_with_retry(&self.retry, "vectors.search", || {
                self.vectors.search(embedding, k_per_variant)
            })
            .await
            .map_err(|err| match err {
                AppError::Validation(_) | AppError::InvalidConfig(_) => err,
                other => AppError::RetrievalUnavailable(other.to_string()),
            })
        });
        let per_variant = try_join_all(searches).await?;

        let hits: usize = per_variant.iter().map(Vec::len).sum();
        let candidates = fuse_candidates(per_variant);
        debug!(
            hits,
            candidates = candidates.len(),
            "fused retrieval candidates"
        );
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use common::storage::{
        memory::MemoryVectorStore,
        types::{Chunk, ChunkHit, ChunkRecord},
    };

    use super::*;

    /// Maps a text onto one of two axes depending on a keyword.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn dimension(&self) -> usize {
            2
        }

        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
            Ok(texts
                .iter()
                .map(|text| {
                    if text.contains("tokio") {
                        vec![1.0, 0.1]
                    } else {
                        vec![0.1, 1.0]
                    }
                })
                .collect())
        }
    }

    struct DownStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VectorStore for DownStore {
        async fn upsert(&self, _records: Vec<ChunkRecord>) -> Result<(), AppError> {
            Ok(())
        }
        async fn delete(&self, _chunk_id: &str) -> Result<bool, AppError> {
            Ok(false)
        }
        async fn delete_by_document(&self, _document_id: &str) -> Result<usize, AppError> {
            Ok(0)
        }
        async fn search(&self, _embedding: &[f32], _k: usize) -> Result<Vec<ChunkHit>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Transient("connection refused".into()))
        }
        async fn get_chunks(&self, _chunk_ids: &[String]) -> Result<Vec<Chunk>, AppError> {
            Ok(Vec::new())
        }
        async fn chunk_count(&self) -> Result<usize, AppError> {
            Ok(0)
        }
    }

    fn record(id_start: usize, document_id: &str, text: &str, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            chunk: Chunk::new(document_id, text.into(), id_start, id_start + text.len()),
            source: format!("{document_id}.md"),
            embedding,
        }
    }

    #[tokio::test]
    async fn fuses_results_of_every_variant() {
        let store = Arc::new(MemoryVectorStore::default());
        store
            .upsert(vec![
                record(0, "runtime", "tokio scheduling", vec![1.0, 0.0]),
                record(0, "cooking", "pasta water", vec![0.0, 1.0]),
            ])
            .await
            .expect("upsert");

        let retriever = Retriever::new(Arc::new(KeywordEmbedder), store, RetryPolicy::immediate(1));
        let variants = vec!["how does tokio work".to_string(), "boil pasta".to_string()];

        let candidates = retriever.retrieve(&variants, 2).await.expect("retrieve");

        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| c.support == 2));
        assert!(candidates[0].score >= candidates[1].score);
    }

    #[tokio::test]
    async fn unreachable_store_is_retrieval_unavailable() {
        let store = Arc::new(DownStore {
            calls: AtomicUsize::new(0),
        });
        let retriever = Retriever::new(
            Arc::new(KeywordEmbedder),
            store.clone(),
            RetryPolicy::immediate(3),
        );

        let result = retriever.retrieve(&["tokio".to_string()], 5).await;

        assert!(matches!(result, Err(AppError::RetrievalUnavailable(_))));
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }
}
