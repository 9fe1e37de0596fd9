use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::types::{ChunkRecord, Document, DocumentStatus},
    utils::retry::RetryPolicy,
};
use tokio::sync::{Mutex, Notify};

use super::{
    config::IngestionTuning, services::PipelineServices, IngestionCoordinator,
    IngestionJobTracker, JobStatus,
};
use crate::utils::document_source::{DocumentRef, DocumentSource};

#[derive(Default)]
struct MockServices {
    documents: Mutex<HashMap<String, Document>>,
    chunks: Mutex<HashMap<String, Vec<ChunkRecord>>>,
    version: Mutex<u64>,
    invalidated: Mutex<Vec<u64>>,
    calls: Mutex<Vec<&'static str>>,
    fail_embedding_on: Option<&'static str>,
    fail_upsert: AtomicBool,
    embed_delay: Option<Duration>,
    embeds_in_flight: AtomicUsize,
    peak_embeds_in_flight: AtomicUsize,
}

impl MockServices {
    fn failing_embedding_on(marker: &'static str) -> Self {
        Self {
            fail_embedding_on: Some(marker),
            ..Self::default()
        }
    }

    fn slow_embedding(delay: Duration) -> Self {
        Self {
            embed_delay: Some(delay),
            ..Self::default()
        }
    }

    async fn record(&self, stage: &'static str) {
        self.calls.lock().await.push(stage);
    }

    async fn take_calls(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.calls.lock().await)
    }

    async fn chunk_texts(&self, document_id: &str) -> Vec<String> {
        self.chunks
            .lock()
            .await
            .get(document_id)
            .map(|records| records.iter().map(|r| r.chunk.text.clone()).collect())
            .unwrap_or_default()
    }

    async fn document(&self, document_id: &str) -> Option<Document> {
        self.documents.lock().await.get(document_id).cloned()
    }
}

#[async_trait]
impl PipelineServices for MockServices {
    async fn load_text(
        &self,
        source: &dyn DocumentSource,
        document: &DocumentRef,
    ) -> Result<String, AppError> {
        self.record("load").await;
        source.load(document).await
    }

    async fn find_document(&self, document_id: &str) -> Result<Option<Document>, AppError> {
        self.record("find").await;
        Ok(self.documents.lock().await.get(document_id).cloned())
    }

    async fn record_document(&self, document: Document) -> Result<(), AppError> {
        self.record("record").await;
        self.documents
            .lock()
            .await
            .insert(document.id.clone(), document);
        Ok(())
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        self.record("embed").await;
        if let Some(delay) = self.embed_delay {
            let in_flight = self.embeds_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_embeds_in_flight
                .fetch_max(in_flight, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.embeds_in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        if let Some(marker) = self.fail_embedding_on {
            if texts.iter().any(|text| text.contains(marker)) {
                return Err(AppError::EmbeddingUnavailable("provider down".into()));
            }
        }
        Ok(texts.iter().map(|_| vec![0.6, 0.8]).collect())
    }

    async fn delete_chunks(&self, document_id: &str) -> Result<usize, AppError> {
        self.record("delete").await;
        Ok(self
            .chunks
            .lock()
            .await
            .remove(document_id)
            .map_or(0, |records| records.len()))
    }

    async fn upsert_chunks(&self, records: Vec<ChunkRecord>) -> Result<(), AppError> {
        self.record("upsert").await;
        let mut chunks = self.chunks.lock().await;
        for record in records {
            let document_id = record.chunk.document_id.clone();
            chunks.entry(document_id).or_default().push(record);
            if self.fail_upsert.load(Ordering::SeqCst) {
                // One record landed before the store gave up.
                return Err(AppError::RetrievalUnavailable("store write failed".into()));
            }
        }
        Ok(())
    }

    async fn bump_corpus_version(&self) -> Result<u64, AppError> {
        self.record("bump").await;
        let mut version = self.version.lock().await;
        *version += 1;
        Ok(*version)
    }

    async fn corpus_version(&self) -> Result<u64, AppError> {
        Ok(*self.version.lock().await)
    }

    async fn invalidate_answers(&self, corpus_version: u64) -> Result<usize, AppError> {
        self.record("invalidate").await;
        self.invalidated.lock().await.push(corpus_version);
        Ok(0)
    }
}

struct StaticSource {
    documents: Mutex<Vec<(String, String)>>,
}

impl StaticSource {
    fn new(documents: &[(&str, &str)]) -> Self {
        Self {
            documents: Mutex::new(
                documents
                    .iter()
                    .map(|(id, text)| ((*id).to_string(), (*text).to_string()))
                    .collect(),
            ),
        }
    }

    async fn replace(&self, id: &str, text: &str) {
        let mut documents = self.documents.lock().await;
        if let Some(entry) = documents.iter_mut().find(|(doc_id, _)| doc_id == id) {
            entry.1 = text.to_string();
        }
    }
}

#[async_trait]
impl DocumentSource for StaticSource {
    async fn list(&self) -> Result<Vec<DocumentRef>, AppError> {
        Ok(self
            .documents
            .lock()
            .await
            .iter()
            .map(|(id, _)| DocumentRef {
                id: id.clone(),
                source: format!("memory://{id}"),
            })
            .collect())
    }

    async fn load(&self, document: &DocumentRef) -> Result<String, AppError> {
        self.documents
            .lock()
            .await
            .iter()
            .find(|(id, _)| *id == document.id)
            .map(|(_, text)| text.clone())
            .ok_or_else(|| AppError::NotFound(document.id.clone()))
    }
}

fn tuning() -> IngestionTuning {
    IngestionTuning {
        chunk_size: 60,
        chunk_overlap: 10,
        embedding_batch_size: 2,
        document_concurrency: 2,
        retry: RetryPolicy::immediate(1),
    }
}

fn coordinator(services: &Arc<MockServices>) -> IngestionCoordinator {
    IngestionCoordinator::with_services(tuning(), services.clone())
        .expect("tuning should be valid")
}

#[tokio::test]
async fn reingesting_unchanged_corpus_changes_nothing() {
    let services = Arc::new(MockServices::default());
    let source = StaticSource::new(&[
        ("alpha", "Alpha covers the deployment checklist."),
        ("beta", "Beta explains how to rotate credentials."),
    ]);
    let coordinator = coordinator(&services);

    let first = coordinator.ingest(&source).await.expect("first run");
    assert_eq!(first.documents_processed, 2);
    assert_eq!(first.documents_ingested, 2);
    assert_eq!(first.chunks_created, 2);
    assert_eq!(first.corpus_version, 2);
    let alpha_before = services.chunk_texts("alpha").await;
    services.take_calls().await;

    let second = coordinator.ingest(&source).await.expect("second run");
    assert_eq!(second.documents_ingested, 0);
    assert_eq!(second.documents_skipped, 2);
    assert_eq!(second.chunks_created, 0);
    assert_eq!(second.chunks_skipped, 2);
    assert_eq!(second.corpus_version, 2);
    assert_eq!(services.chunk_texts("alpha").await, alpha_before);

    let calls = services.take_calls().await;
    assert!(!calls.contains(&"embed"));
    assert!(!calls.contains(&"upsert"));
    assert!(!calls.contains(&"bump"));
}

#[tokio::test]
async fn new_document_runs_stages_in_order() {
    let services = Arc::new(MockServices::default());
    let source = StaticSource::new(&[("alpha", "A short note.")]);

    let report = coordinator(&services)
        .ingest(&source)
        .await
        .expect("ingest");

    assert!(!report.has_failures());
    assert_eq!(
        services.take_calls().await,
        vec!["load", "find", "record", "embed", "delete", "upsert", "bump", "record", "invalidate"]
    );

    let stored = services.document("alpha").await.expect("catalog entry");
    assert_eq!(stored.status, DocumentStatus::Ingested);
    assert_eq!(stored.chunk_count, 1);
    assert!(stored.ingested_at.is_some());
    assert_eq!(*services.invalidated.lock().await, vec![0]);
}

#[tokio::test]
async fn changed_document_replaces_its_chunks() {
    let services = Arc::new(MockServices::default());
    let source = StaticSource::new(&[
        ("alpha", "Original alpha text."),
        ("beta", "Beta stays the same."),
    ]);
    let coordinator = coordinator(&services);
    coordinator.ingest(&source).await.expect("first run");

    source.replace("alpha", "Alpha was rewritten entirely.").await;
    let report = coordinator.ingest(&source).await.expect("second run");

    assert_eq!(report.documents_ingested, 1);
    assert_eq!(report.documents_skipped, 1);
    assert_eq!(report.corpus_version, 3);
    assert_eq!(
        services.chunk_texts("alpha").await,
        vec!["Alpha was rewritten entirely.".to_string()]
    );
    assert!(services.invalidated.lock().await.contains(&2));
}

#[tokio::test]
async fn embedding_failure_is_isolated_to_its_document() {
    let services = Arc::new(MockServices::failing_embedding_on("poison"));
    let source = StaticSource::new(&[
        ("bad", "This document carries poison."),
        ("good", "This document is fine."),
    ]);

    let report = coordinator(&services)
        .ingest(&source)
        .await
        .expect("ingest");

    assert_eq!(report.documents_processed, 2);
    assert_eq!(report.documents_ingested, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].document_id, "bad");
    assert!(report.failures[0].reason.contains("Embedding unavailable"));

    assert!(services.chunk_texts("bad").await.is_empty());
    assert_eq!(services.chunk_texts("good").await.len(), 1);
    let bad = services.document("bad").await.expect("failed doc recorded");
    assert_eq!(bad.status, DocumentStatus::Failed);
    assert!(bad.error.is_some());
}

#[tokio::test]
async fn failed_upsert_leaves_no_partial_chunks() {
    let services = Arc::new(MockServices::default());
    let source = StaticSource::new(&[("alpha", "First version of alpha.")]);
    let coordinator = coordinator(&services);
    coordinator.ingest(&source).await.expect("first run");

    let long_text = "Second version. ".repeat(12);
    source.replace("alpha", &long_text).await;
    services.fail_upsert.store(true, Ordering::SeqCst);
    services.take_calls().await;

    let report = coordinator.ingest(&source).await.expect("second run");

    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].reason.contains("storing chunks failed"));
    assert!(services.chunk_texts("alpha").await.is_empty());
    // Old chunks were removed, so the visible corpus moved on.
    assert_eq!(report.corpus_version, 2);

    let calls = services.take_calls().await;
    let upsert = calls.iter().position(|c| *c == "upsert").expect("upsert");
    assert_eq!(calls[upsert + 1], "delete");
    assert_eq!(calls[upsert + 2], "bump");

    let stored = services.document("alpha").await.expect("catalog entry");
    assert_eq!(stored.status, DocumentStatus::Failed);

    // Once the store recovers the document is retried and lands completely.
    services.fail_upsert.store(false, Ordering::SeqCst);
    let retry = coordinator.ingest(&source).await.expect("third run");
    assert_eq!(retry.documents_ingested, 1);
    assert!(!services.chunk_texts("alpha").await.is_empty());
}

#[tokio::test]
async fn documents_run_concurrently_up_to_the_limit() {
    let services = Arc::new(MockServices::slow_embedding(Duration::from_millis(20)));
    let source = StaticSource::new(&[
        ("a", "First short document."),
        ("b", "Second short document."),
        ("c", "Third short document."),
        ("d", "Fourth short document."),
        ("e", "Fifth short document."),
    ]);
    let coordinator = coordinator(&services);
    let limit = coordinator.tuning().document_concurrency;

    let report = coordinator.ingest(&source).await.expect("ingest");

    assert_eq!(report.documents_ingested, 5);
    let peak = services.peak_embeds_in_flight.load(Ordering::SeqCst);
    assert!(peak <= limit, "peak {peak} exceeded limit {limit}");
    assert!(peak > 1, "documents were processed one at a time");
}

struct UnreadableSource {
    inner: StaticSource,
    unreadable: &'static str,
}

#[async_trait]
impl DocumentSource for UnreadableSource {
    async fn list(&self) -> Result<Vec<DocumentRef>, AppError> {
        self.inner.list().await
    }

    async fn load(&self, document: &DocumentRef) -> Result<String, AppError> {
        if document.id == self.unreadable {
            return Err(AppError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "permission denied",
            )));
        }
        self.inner.load(document).await
    }
}

#[tokio::test]
async fn unreadable_document_is_marked_failed() {
    let services = Arc::new(MockServices::default());
    let source = UnreadableSource {
        inner: StaticSource::new(&[("locked", "Never read."), ("open", "Readable text.")]),
        unreadable: "locked",
    };

    let report = coordinator(&services)
        .ingest(&source)
        .await
        .expect("ingest");

    assert_eq!(report.documents_ingested, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].document_id, "locked");

    let locked = services.document("locked").await.expect("catalog entry");
    assert_eq!(locked.status, DocumentStatus::Failed);
    assert!(locked
        .error
        .as_deref()
        .is_some_and(|error| error.contains("permission denied")));
    assert!(services.chunk_texts("locked").await.is_empty());
}

#[tokio::test]
async fn rejects_overlap_not_smaller_than_chunk_size() {
    let services: Arc<dyn PipelineServices> = Arc::new(MockServices::default());
    let tuning = IngestionTuning {
        chunk_overlap: 60,
        ..tuning()
    };
    assert!(matches!(
        IngestionCoordinator::with_services(tuning, services),
        Err(AppError::InvalidConfig(_))
    ));
}

struct GatedSource {
    inner: StaticSource,
    gate: Arc<Notify>,
}

#[async_trait]
impl DocumentSource for GatedSource {
    async fn list(&self) -> Result<Vec<DocumentRef>, AppError> {
        self.gate.notified().await;
        self.inner.list().await
    }

    async fn load(&self, document: &DocumentRef) -> Result<String, AppError> {
        self.inner.load(document).await
    }
}

#[tokio::test]
async fn job_tracker_rejects_concurrent_runs() {
    let services = Arc::new(MockServices::default());
    let coordinator = coordinator(&services);
    let tracker = IngestionJobTracker::new();
    let gate = Arc::new(Notify::new());
    let gated = GatedSource {
        inner: StaticSource::new(&[("alpha", "Gated document.")]),
        gate: gate.clone(),
    };
    let other = StaticSource::new(&[("beta", "Another document.")]);

    let (first, second) = tokio::join!(tracker.run(&coordinator, &gated), async {
        tokio::task::yield_now().await;
        let second = tracker.run(&coordinator, &other).await;
        gate.notify_one();
        second
    });

    assert!(first.is_ok());
    assert!(matches!(second, Err(AppError::Validation(message)) if message.contains("already running")));

    let snapshot = tracker.snapshot().await;
    assert_eq!(snapshot.status, JobStatus::Succeeded);
    assert!(snapshot.finished_at.is_some());
    assert_eq!(
        snapshot.last_report.map(|report| report.documents_ingested),
        Some(1)
    );
    assert!(!tracker.is_running());
}
