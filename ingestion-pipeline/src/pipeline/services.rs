use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        store::Stores,
        types::{ChunkRecord, Document},
    },
    utils::{
        embedding::{embed_with_retry, Embedder},
        retry::{call_with_retry, RetryPolicy},
    },
};
use retrieval_pipeline::cache::ResponseCache;

use crate::utils::document_source::{DocumentRef, DocumentSource};

/// Everything the ingestion stages need from the outside world.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn load_text(
        &self,
        source: &dyn DocumentSource,
        document: &DocumentRef,
    ) -> Result<String, AppError>;

    async fn find_document(&self, document_id: &str) -> Result<Option<Document>, AppError>;

    async fn record_document(&self, document: Document) -> Result<(), AppError>;

    /// One batch of chunk texts to vectors, in order.
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError>;

    async fn delete_chunks(&self, document_id: &str) -> Result<usize, AppError>;

    async fn upsert_chunks(&self, records: Vec<ChunkRecord>) -> Result<(), AppError>;

    async fn bump_corpus_version(&self) -> Result<u64, AppError>;

    async fn corpus_version(&self) -> Result<u64, AppError>;

    /// Drops answers cached against `corpus_version`.
    async fn invalidate_answers(&self, corpus_version: u64) -> Result<usize, AppError>;
}

pub struct DefaultPipelineServices {
    stores: Stores,
    embedder: Arc<dyn Embedder>,
    cache: Option<Arc<ResponseCache>>,
    retry: RetryPolicy,
}

impl DefaultPipelineServices {
    pub fn new(
        stores: Stores,
        embedder: Arc<dyn Embedder>,
        cache: Option<Arc<ResponseCache>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            stores,
            embedder,
            cache,
            retry,
        }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn load_text(
        &self,
        source: &dyn DocumentSource,
        document: &DocumentRef,
    ) -> Result<String, AppError> {
        source.load(document).await
    }

    async fn find_document(&self, document_id: &str) -> Result<Option<Document>, AppError> {
        call_with_retry(&self.retry, "catalog.get_document", || {
            self.stores.catalog.get_document(document_id)
        })
        .await
    }

    async fn record_document(&self, document: Document) -> Result<(), AppError> {
        call_with_retry(&self.retry, "catalog.put_document", || {
            self.stores.catalog.put_document(document.clone())
        })
        .await
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        embed_with_retry(self.embedder.as_ref(), texts, &self.retry).await
    }

    async fn delete_chunks(&self, document_id: &str) -> Result<usize, AppError> {
        call_with_retry(&self.retry, "vectors.delete_by_document", || {
            self.stores.vectors.delete_by_document(document_id)
        })
        .await
    }

    async fn upsert_chunks(&self, records: Vec<ChunkRecord>) -> Result<(), AppError> {
        call_with_retry(&self.retry, "vectors.upsert", || {
            self.stores.vectors.upsert(records.clone())
        })
        .await
    }

    async fn bump_corpus_version(&self) -> Result<u64, AppError> {
        // Not retried: a timed-out increment may already have landed.
        self.stores.catalog.bump_corpus_version().await
    }

    async fn corpus_version(&self) -> Result<u64, AppError> {
        call_with_retry(&self.retry, "catalog.corpus_version", || {
            self.stores.catalog.corpus_version()
        })
        .await
    }

    async fn invalidate_answers(&self, corpus_version: u64) -> Result<usize, AppError> {
        match &self.cache {
            Some(cache) => cache.invalidate_all_for_corpus_version(corpus_version).await,
            None => Ok(0),
        }
    }
}
