use std::{
    cmp::Ordering as CmpOrdering,
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    error::AppError,
    storage::{
        store::{CacheStore, CorpusCatalog, Stores, VectorStore},
        types::{CacheEntry, Chunk, ChunkHit, ChunkRecord, Document},
    },
};

/// Brute-force cosine search over records kept in process memory.
#[derive(Default)]
pub struct MemoryVectorStore {
    records: RwLock<HashMap<String, ChunkRecord>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, records: Vec<ChunkRecord>) -> Result<(), AppError> {
        let mut guard = self.records.write().await;
        for record in records {
            guard.insert(record.chunk.id.clone(), record);
        }
        Ok(())
    }

    async fn delete(&self, chunk_id: &str) -> Result<bool, AppError> {
        Ok(self.records.write().await.remove(chunk_id).is_some())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize, AppError> {
        let mut guard = self.records.write().await;
        let before = guard.len();
        guard.retain(|_, record| record.chunk.document_id != document_id);
        Ok(before.saturating_sub(guard.len()))
    }

    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<ChunkHit>, AppError> {
        let guard = self.records.read().await;
        let mut hits: Vec<ChunkHit> = guard
            .values()
            .map(|record| ChunkHit {
                chunk: record.chunk.clone(),
                source: record.source.clone(),
                score: cosine_similarity(embedding, &record.embedding),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(CmpOrdering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn get_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Chunk>, AppError> {
        let guard = self.records.read().await;
        Ok(chunk_ids
            .iter()
            .filter_map(|id| guard.get(id).map(|record| record.chunk.clone()))
            .collect())
    }

    async fn chunk_count(&self) -> Result<usize, AppError> {
        Ok(self.records.read().await.len())
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    documents: RwLock<HashMap<String, Document>>,
    version: AtomicU64,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CorpusCatalog for MemoryCatalog {
    async fn get_document(&self, document_id: &str) -> Result<Option<Document>, AppError> {
        Ok(self.documents.read().await.get(document_id).cloned())
    }

    async fn put_document(&self, document: Document) -> Result<(), AppError> {
        self.documents
            .write()
            .await
            .insert(document.id.clone(), document);
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<Document>, AppError> {
        let mut documents: Vec<Document> =
            self.documents.read().await.values().cloned().collect();
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents)
    }

    async fn document_count(&self) -> Result<usize, AppError> {
        Ok(self.documents.read().await.len())
    }

    async fn corpus_version(&self) -> Result<u64, AppError> {
        Ok(self.version.load(Ordering::SeqCst))
    }

    async fn bump_corpus_version(&self) -> Result<u64, AppError> {
        Ok(self.version.fetch_add(1, Ordering::SeqCst).saturating_add(1))
    }

    async fn last_ingested_at(&self) -> Result<Option<DateTime<Utc>>, AppError> {
        Ok(self
            .documents
            .read()
            .await
            .values()
            .filter_map(|document| document.ingested_at)
            .max())
    }
}

struct CachedValue {
    entry: CacheEntry,
    tag: String,
    /// `None` when the TTL is too large to represent.
    expires_at: Option<Instant>,
}

impl CachedValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CachedValue>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, AppError> {
        let guard = self.entries.read().await;
        Ok(guard
            .get(key)
            .filter(|cached| cached.is_live(Instant::now()))
            .map(|cached| cached.entry.clone()))
    }

    async fn set(
        &self,
        key: &str,
        entry: CacheEntry,
        ttl: Duration,
        tag: &str,
    ) -> Result<(), AppError> {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl);
        let mut guard = self.entries.write().await;
        guard.retain(|_, cached| cached.is_live(now));
        guard.insert(
            key.to_string(),
            CachedValue {
                entry,
                tag: tag.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn clear_by_tag(&self, tag: &str) -> Result<usize, AppError> {
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|_, cached| cached.tag != tag);
        Ok(before.saturating_sub(guard.len()))
    }
}

impl Stores {
    /// Fresh, empty in-process stores.
    pub fn in_memory() -> Self {
        Self {
            vectors: Arc::new(MemoryVectorStore::new()),
            catalog: Arc::new(MemoryCatalog::new()),
            cache: Arc::new(MemoryCacheStore::new()),
        }
    }
}
