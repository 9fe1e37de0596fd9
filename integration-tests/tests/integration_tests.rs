use std::sync::Arc;

use common::{
    storage::{
        db::SurrealDbClient,
        store::{corpus_stats, Stores},
    },
    utils::retry::RetryPolicy,
};
use ingestion_pipeline::{chunk_text, FolderSource};
use retrieval_pipeline::Reranker;
use tempfile::tempdir;
use uuid::Uuid;

use test_utils::*;

/// End-to-end tests: documents on disk are ingested, then questions are
/// answered against the resulting index with deterministic capabilities.

#[tokio::test]
async fn test_ingest_then_answer_with_citation_and_cache() {
    let dir = tempdir().expect("tempdir");
    write_corpus(dir.path());
    let pipeline = TestPipeline::new(
        Stores::in_memory(),
        Arc::new(KeywordGenerator::new("invoices")),
    );

    let report = pipeline
        .coordinator
        .ingest(&FolderSource::new(dir.path()))
        .await
        .expect("ingest");
    assert_eq!(report.documents_processed, 3);
    assert_eq!(report.documents_ingested, 3);
    assert!(!report.has_failures());
    // One bump per committed document.
    assert_eq!(report.corpus_version, 3);

    let first = pipeline
        .orchestrator
        .answer("When are invoices sent?")
        .await
        .expect("answer");
    assert!(!first.cache_hit);
    assert!(first.cited);
    assert_eq!(first.sources(), vec!["billing/invoices.md".to_string()]);
    assert_eq!(first.citations[0].chunk_id, "billing/invoices.md::0");

    let second = pipeline
        .orchestrator
        .answer("when are INVOICES sent?")
        .await
        .expect("answer");
    assert!(second.cache_hit);
    assert_eq!(second.text, first.text);
    assert_eq!(second.citations, first.citations);
    assert_eq!(pipeline.generator.calls(), 1);
}

#[tokio::test]
async fn test_reingest_of_changed_document_invalidates_answers() {
    let dir = tempdir().expect("tempdir");
    write_corpus(dir.path());
    let pipeline = TestPipeline::new(
        Stores::in_memory(),
        Arc::new(KeywordGenerator::new("invoices")),
    );
    let source = FolderSource::new(dir.path());

    pipeline.coordinator.ingest(&source).await.expect("ingest");
    let before = pipeline
        .orchestrator
        .answer("When are invoices sent?")
        .await
        .expect("answer");

    write_doc(
        dir.path(),
        "billing/invoices.md",
        "Invoices are now sent on the fifteenth of each month.",
    );
    let report = pipeline.coordinator.ingest(&source).await.expect("reingest");
    assert_eq!(report.documents_ingested, 1);
    assert_eq!(report.documents_skipped, 2);
    assert_eq!(report.corpus_version, before.corpus_version + 1);

    let after = pipeline
        .orchestrator
        .answer("When are invoices sent?")
        .await
        .expect("answer");
    assert!(!after.cache_hit);
    assert_eq!(after.corpus_version, report.corpus_version);
    assert!(after.context.iter().any(|text| text.contains("fifteenth")));
    assert_eq!(pipeline.generator.calls(), 2);
}

#[tokio::test]
async fn test_second_ingest_of_unchanged_folder_is_a_no_op() {
    let dir = tempdir().expect("tempdir");
    write_corpus(dir.path());
    let pipeline = TestPipeline::new(
        Stores::in_memory(),
        Arc::new(KeywordGenerator::new("laptop")),
    );
    let source = FolderSource::new(dir.path());

    let first = pipeline.coordinator.ingest(&source).await.expect("ingest");
    let stats_before = corpus_stats(
        pipeline.stores.catalog.as_ref(),
        pipeline.stores.vectors.as_ref(),
    )
    .await
    .expect("stats");

    let second = pipeline.coordinator.ingest(&source).await.expect("ingest");
    let stats_after = corpus_stats(
        pipeline.stores.catalog.as_ref(),
        pipeline.stores.vectors.as_ref(),
    )
    .await
    .expect("stats");

    assert_eq!(second.documents_processed, 3);
    assert_eq!(second.documents_ingested, 0);
    assert_eq!(second.documents_skipped, 3);
    assert_eq!(second.chunks_created, 0);
    assert_eq!(second.chunks_skipped, first.chunks_created);
    assert_eq!(second.corpus_version, first.corpus_version);
    assert_eq!(stats_after.chunk_count, stats_before.chunk_count);
    assert_eq!(stats_after.corpus_version, stats_before.corpus_version);
}

#[tokio::test]
async fn test_answer_survives_reranker_outage() {
    let dir = tempdir().expect("tempdir");
    write_corpus(dir.path());
    let pipeline = TestPipeline::with_reranker(
        Stores::in_memory(),
        Arc::new(KeywordGenerator::new("laptop")),
        Reranker::new(Some(Arc::new(OfflineReranker)), RetryPolicy::immediate(1)),
    );

    pipeline
        .coordinator
        .ingest(&FolderSource::new(dir.path()))
        .await
        .expect("ingest");

    let answer = pipeline
        .orchestrator
        .answer("What do new hires get, a laptop?")
        .await
        .expect("answer despite reranker outage");

    assert!(answer.cited);
    assert_eq!(answer.sources(), vec!["onboarding.md".to_string()]);
    assert!(answer.context.len() <= 3);
}

#[tokio::test]
async fn test_pipeline_on_surrealdb_store() {
    let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
        .await
        .expect("Failed to start in-memory surrealdb");
    db.ensure_schema(DIMENSION).await.expect("schema");
    let stores = Stores::surreal(Arc::new(db));

    let dir = tempdir().expect("tempdir");
    write_corpus(dir.path());
    let pipeline = TestPipeline::new(stores, Arc::new(KeywordGenerator::new("invoices")));
    let source = FolderSource::new(dir.path());

    let report = pipeline.coordinator.ingest(&source).await.expect("ingest");
    assert_eq!(report.documents_ingested, 3);

    let again = pipeline.coordinator.ingest(&source).await.expect("reingest");
    assert_eq!(again.documents_skipped, 3);

    let first = pipeline
        .orchestrator
        .answer("When are invoices sent?")
        .await
        .expect("answer");
    assert!(first.cited);
    assert_eq!(first.sources(), vec!["billing/invoices.md".to_string()]);

    let second = pipeline
        .orchestrator
        .answer("When are invoices sent?")
        .await
        .expect("answer");
    assert!(second.cache_hit);
}

#[tokio::test]
async fn test_long_document_chunks_share_configured_overlap() {
    let sentence = "Backups run nightly and are kept for thirty days. ";
    let text = sentence.repeat(40);
    let dir = tempdir().expect("tempdir");
    write_doc(dir.path(), "backups.md", &text);
    let pipeline = TestPipeline::new(
        Stores::in_memory(),
        Arc::new(KeywordGenerator::new("backups")),
    );

    let report = pipeline
        .coordinator
        .ingest(&FolderSource::new(dir.path()))
        .await
        .expect("ingest");

    let chunks = chunk_text("backups.md", &text, 500, 100).expect("chunk");
    assert_eq!(report.chunks_created, chunks.len());
    assert!(chunks.len() > 1);
    assert_eq!(chunks.first().map(|c| c.start), Some(0));
    assert_eq!(chunks.last().map(|c| c.end), Some(text.chars().count()));
    for pair in chunks.windows(2) {
        assert_eq!(pair[0].end - pair[1].start, 100);
        assert!(pair[0].text.chars().count() <= 500);
    }
}
