use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::AppError,
    storage::types::{CacheEntry, Chunk, ChunkHit, ChunkRecord, Document},
};

/// Chunk vectors plus metadata, searchable by cosine similarity.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts or replaces records by chunk id.
    async fn upsert(&self, records: Vec<ChunkRecord>) -> Result<(), AppError>;

    async fn delete(&self, chunk_id: &str) -> Result<bool, AppError>;

    /// Removes every chunk owned by the document and returns how many went away.
    async fn delete_by_document(&self, document_id: &str) -> Result<usize, AppError>;

    /// Nearest neighbours ordered by descending similarity, at most `k`.
    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<ChunkHit>, AppError>;

    async fn get_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Chunk>, AppError>;

    async fn chunk_count(&self) -> Result<usize, AppError>;
}

/// Document metadata and the corpus version counter.
#[async_trait]
pub trait CorpusCatalog: Send + Sync {
    async fn get_document(&self, document_id: &str) -> Result<Option<Document>, AppError>;

    async fn put_document(&self, document: Document) -> Result<(), AppError>;

    async fn list_documents(&self) -> Result<Vec<Document>, AppError>;

    async fn document_count(&self) -> Result<usize, AppError>;

    async fn corpus_version(&self) -> Result<u64, AppError>;

    /// Atomically increments the corpus version and returns the new value.
    async fn bump_corpus_version(&self) -> Result<u64, AppError>;

    async fn last_ingested_at(&self) -> Result<Option<DateTime<Utc>>, AppError>;
}

/// Key-value store for finished answers. Entries are tagged so a whole
/// generation of answers can be dropped at once.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Expired entries read as a miss.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, AppError>;

    async fn set(
        &self,
        key: &str,
        entry: CacheEntry,
        ttl: Duration,
        tag: &str,
    ) -> Result<(), AppError>;

    async fn clear_by_tag(&self, tag: &str) -> Result<usize, AppError>;
}

/// Handles to the three stores, all backed by the same service.
#[derive(Clone)]
pub struct Stores {
    pub vectors: Arc<dyn VectorStore>,
    pub catalog: Arc<dyn CorpusCatalog>,
    pub cache: Arc<dyn CacheStore>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorpusStats {
    pub corpus_version: u64,
    pub document_count: usize,
    pub chunk_count: usize,
    pub last_ingested_at: Option<DateTime<Utc>>,
}

/// Snapshot for the status query.
pub async fn corpus_stats(
    catalog: &dyn CorpusCatalog,
    vectors: &dyn VectorStore,
) -> Result<CorpusStats, AppError> {
    let (corpus_version, document_count, chunk_count, last_ingested_at) = tokio::try_join!(
        catalog.corpus_version(),
        catalog.document_count(),
        vectors.chunk_count(),
        catalog.last_ingested_at(),
    )?;

    Ok(CorpusStats {
        corpus_version,
        document_count,
        chunk_count,
        last_ingested_at,
    })
}
