use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::{CacheStore, CorpusCatalog, Stores, VectorStore},
        types::{CacheEntry, Chunk, ChunkHit, ChunkRecord, Document, StoredObject},
    },
};

const CHUNK_TABLE: &str = "chunk";
const CACHE_TABLE: &str = "response_cache";
const HNSW_MIN_EF: usize = 40;
const CHUNK_FIELDS: &str = "chunk_key, document_id, source, text, start_offset, end_offset";

/// Corpus stores backed by SurrealDB tables.
#[derive(Clone)]
pub struct SurrealStore {
    db: Arc<SurrealDbClient>,
}

impl SurrealStore {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    async fn count(&self, table: &str, filter: Option<(&str, String)>) -> Result<usize, AppError> {
        #[derive(Deserialize)]
        struct CountRow {
            count: usize,
        }

        let mut response = match filter {
            Some((field, value)) => {
                self.db
                    .query(format!(
                        "SELECT count() AS count FROM {table} WHERE {field} = $value GROUP ALL"
                    ))
                    .bind(("value", value))
                    .await?
            }
            None => {
                self.db
                    .query(format!("SELECT count() AS count FROM {table} GROUP ALL"))
                    .await?
            }
        };
        let row: Option<CountRow> = response.take(0)?;
        Ok(row.map_or(0, |row| row.count))
    }
}

// Stored without an `id` field; the record key is `chunk_key`.
#[derive(Debug, Serialize, Deserialize)]
struct ChunkRow {
    chunk_key: String,
    document_id: String,
    source: String,
    text: String,
    start_offset: usize,
    end_offset: usize,
    #[serde(default)]
    embedding: Vec<f32>,
}

impl From<ChunkRecord> for ChunkRow {
    fn from(record: ChunkRecord) -> Self {
        Self {
            chunk_key: record.chunk.id,
            document_id: record.chunk.document_id,
            source: record.source,
            text: record.chunk.text,
            start_offset: record.chunk.start,
            end_offset: record.chunk.end,
            embedding: record.embedding,
        }
    }
}

impl ChunkRow {
    fn into_chunk(self) -> Chunk {
        Chunk {
            id: self.chunk_key,
            document_id: self.document_id,
            text: self.text,
            start: self.start_offset,
            end: self.end_offset,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HitRow {
    chunk_key: String,
    document_id: String,
    source: String,
    text: String,
    start_offset: usize,
    end_offset: usize,
    score: f32,
}

impl From<HitRow> for ChunkHit {
    fn from(row: HitRow) -> Self {
        Self {
            chunk: Chunk {
                id: row.chunk_key,
                document_id: row.document_id,
                text: row.text,
                start: row.start_offset,
                end: row.end_offset,
            },
            source: row.source,
            score: row.score,
        }
    }
}

#[async_trait]
impl VectorStore for SurrealStore {
    async fn upsert(&self, records: Vec<ChunkRecord>) -> Result<(), AppError> {
        if records.is_empty() {
            return Ok(());
        }
        let rows: Vec<ChunkRow> = records.into_iter().map(ChunkRow::from).collect();

        self.db
            .query(format!(
                "BEGIN TRANSACTION;
                 FOR $row IN $rows {{
                     UPSERT type::thing('{CHUNK_TABLE}', $row.chunk_key) CONTENT $row;
                 }};
                 COMMIT TRANSACTION;"
            ))
            .bind(("rows", rows))
            .await?
            .check()?;
        Ok(())
    }

    async fn delete(&self, chunk_id: &str) -> Result<bool, AppError> {
        let mut response = self
            .db
            .query(format!(
                "DELETE type::thing('{CHUNK_TABLE}', $id) RETURN BEFORE"
            ))
            .bind(("id", chunk_id.to_owned()))
            .await?;
        let removed: Vec<ChunkRow> = response.take(0)?;
        Ok(!removed.is_empty())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize, AppError> {
        let existing = self
            .count(CHUNK_TABLE, Some(("document_id", document_id.to_owned())))
            .await?;
        if existing == 0 {
            return Ok(0);
        }

        self.db
            .query(format!(
                "DELETE {CHUNK_TABLE} WHERE document_id = $document_id"
            ))
            .bind(("document_id", document_id.to_owned()))
            .await?
            .check()?;
        debug!(document_id, removed = existing, "deleted document chunks");
        Ok(existing)
    }

    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<ChunkHit>, AppError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        // The HNSW candidate list must be at least `k` wide or results are cut short.
        let ef = k.max(HNSW_MIN_EF);
        let mut response = self
            .db
            .query(format!(
                "SELECT {CHUNK_FIELDS}, vector::similarity::cosine(embedding, $embedding) AS score
                 FROM {CHUNK_TABLE}
                 WHERE embedding <|{k},{ef}|> $embedding
                 ORDER BY score DESC"
            ))
            .bind(("embedding", embedding.to_vec()))
            .await?;
        let rows: Vec<HitRow> = response.take(0)?;

        let mut hits: Vec<ChunkHit> = rows.into_iter().map(ChunkHit::from).collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn get_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Chunk>, AppError> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut response = self
            .db
            .query(format!(
                "SELECT {CHUNK_FIELDS} FROM {CHUNK_TABLE} WHERE chunk_key IN $ids"
            ))
            .bind(("ids", chunk_ids.to_vec()))
            .await?;
        let rows: Vec<ChunkRow> = response.take(0)?;
        let mut by_id: HashMap<String, Chunk> = rows
            .into_iter()
            .map(|row| {
                let chunk = row.into_chunk();
                (chunk.id.clone(), chunk)
            })
            .collect();

        Ok(chunk_ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn chunk_count(&self) -> Result<usize, AppError> {
        self.count(CHUNK_TABLE, None).await
    }
}

#[derive(Debug, Deserialize)]
struct VersionRow {
    #[serde(default)]
    value: u64,
}

#[async_trait]
impl CorpusCatalog for SurrealStore {
    async fn get_document(&self, document_id: &str) -> Result<Option<Document>, AppError> {
        Ok(self.db.get_item::<Document>(document_id).await?)
    }

    async fn put_document(&self, document: Document) -> Result<(), AppError> {
        self.db.upsert_item(document).await?;
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<Document>, AppError> {
        let mut documents = self.db.get_all_stored_items::<Document>().await?;
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents)
    }

    async fn document_count(&self) -> Result<usize, AppError> {
        self.count(Document::table_name(), None).await
    }

    async fn corpus_version(&self) -> Result<u64, AppError> {
        let row: Option<VersionRow> = self.db.select(("corpus_meta", "version")).await?;
        Ok(row.map_or(0, |row| row.value))
    }

    async fn bump_corpus_version(&self) -> Result<u64, AppError> {
        let mut response = self
            .db
            .query("UPSERT corpus_meta:version SET value += 1 RETURN AFTER")
            .await?;
        let rows: Vec<VersionRow> = response.take(0)?;
        rows.into_iter()
            .next()
            .map(|row| row.value)
            .ok_or_else(|| AppError::InternalError("corpus version bump returned no row".into()))
    }

    async fn last_ingested_at(&self) -> Result<Option<DateTime<Utc>>, AppError> {
        Ok(self
            .list_documents()
            .await?
            .into_iter()
            .filter_map(|document| document.ingested_at)
            .max())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheRow {
    key: String,
    tag: String,
    /// Unix milliseconds.
    expires_at: i64,
    entry: CacheEntry,
}

#[async_trait]
impl CacheStore for SurrealStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, AppError> {
        let row: Option<CacheRow> = self.db.select((CACHE_TABLE, key)).await?;
        let now = Utc::now().timestamp_millis();
        Ok(row
            .filter(|row| row.expires_at > now)
            .map(|row| row.entry))
    }

    async fn set(
        &self,
        key: &str,
        entry: CacheEntry,
        ttl: Duration,
        tag: &str,
    ) -> Result<(), AppError> {
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let now = Utc::now().timestamp_millis();
        let row = CacheRow {
            key: key.to_owned(),
            tag: tag.to_owned(),
            expires_at: now.saturating_add(ttl_millis),
            entry,
        };

        // Expired rows can never be served again; drop them on the way in.
        self.db
            .query(format!(
                "DELETE {CACHE_TABLE} WHERE expires_at <= $now;
                 UPSERT type::thing('{CACHE_TABLE}', $key) CONTENT $row;"
            ))
            .bind(("now", now))
            .bind(("key", key.to_owned()))
            .bind(("row", row))
            .await?
            .check()?;
        Ok(())
    }

    async fn clear_by_tag(&self, tag: &str) -> Result<usize, AppError> {
        let existing = self
            .count(CACHE_TABLE, Some(("tag", tag.to_owned())))
            .await?;
        if existing == 0 {
            return Ok(0);
        }
        self.db
            .query(format!("DELETE {CACHE_TABLE} WHERE tag = $tag"))
            .bind(("tag", tag.to_owned()))
            .await?
            .check()?;
        Ok(existing)
    }
}

impl Stores {
    /// All three stores on one SurrealDB connection.
    pub fn surreal(db: Arc<SurrealDbClient>) -> Self {
        let store = Arc::new(SurrealStore::new(db));
        Self {
            vectors: Arc::clone(&store) as Arc<dyn VectorStore>,
            catalog: Arc::clone(&store) as Arc<dyn CorpusCatalog>,
            cache: store,
        }
    }
}
