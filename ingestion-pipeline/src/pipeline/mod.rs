mod config;
mod context;
mod job;
mod report;
mod services;
mod stages;
mod state;

pub use config::IngestionTuning;
pub use job::{IngestionJobTracker, JobSnapshot, JobStatus};
pub use report::{IngestionFailure, IngestionReport};
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::store::Stores,
    utils::{config::PipelineSettings, embedding::Embedder},
};
use futures::{stream, StreamExt};
use retrieval_pipeline::cache::ResponseCache;
use tracing::{info, instrument, warn};

use self::{
    context::DocumentContext,
    stages::{commit, embed, fingerprint, skip, split},
    state::ready,
};
use crate::utils::document_source::{DocumentRef, DocumentSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentOutcome {
    Ingested { chunks: usize },
    Unchanged { chunks: usize },
}

/// Builds and updates the corpus index from a document source.
pub struct IngestionCoordinator {
    tuning: IngestionTuning,
    services: Arc<dyn PipelineServices>,
}

impl IngestionCoordinator {
    pub fn new(
        stores: Stores,
        embedder: Arc<dyn Embedder>,
        cache: Option<Arc<ResponseCache>>,
        settings: &PipelineSettings,
    ) -> Result<Self, AppError> {
        let tuning = IngestionTuning::from(settings);
        let services = DefaultPipelineServices::new(stores, embedder, cache, tuning.retry.clone());
        Self::with_services(tuning, Arc::new(services))
    }

    pub fn with_services(
        tuning: IngestionTuning,
        services: Arc<dyn PipelineServices>,
    ) -> Result<Self, AppError> {
        tuning.validate()?;
        Ok(Self { tuning, services })
    }

    pub fn tuning(&self) -> &IngestionTuning {
        &self.tuning
    }

    /// Ingests every document of `source`. Per-document failures end up in the
    /// report; only a source that cannot be listed fails the whole call.
    #[instrument(skip_all, fields(concurrency = self.tuning.document_concurrency))]
    pub async fn ingest(&self, source: &dyn DocumentSource) -> Result<IngestionReport, AppError> {
        let started = Instant::now();
        let documents = source.list().await?;
        info!(documents = documents.len(), "ingestion started");

        let outcomes: Vec<(&DocumentRef, Result<DocumentOutcome, AppError>)> =
            stream::iter(documents.iter())
                .map(|document| async move {
                    (document, self.ingest_document(source, document).await)
                })
                .buffer_unordered(self.tuning.document_concurrency)
                .collect()
                .await;

        let mut report = IngestionReport {
            documents_processed: documents.len(),
            ..IngestionReport::default()
        };
        for (document, outcome) in outcomes {
            match outcome {
                Ok(DocumentOutcome::Ingested { chunks }) => {
                    report.documents_ingested += 1;
                    report.chunks_created += chunks;
                }
                Ok(DocumentOutcome::Unchanged { chunks }) => {
                    report.documents_skipped += 1;
                    report.chunks_skipped += chunks;
                }
                Err(err) => report.failures.push(IngestionFailure {
                    document_id: document.id.clone(),
                    reason: failure_reason(&err),
                }),
            }
        }
        report
            .failures
            .sort_by(|a, b| a.document_id.cmp(&b.document_id));
        report.corpus_version = self.services.corpus_version().await?;

        info!(
            documents_processed = report.documents_processed,
            documents_ingested = report.documents_ingested,
            documents_skipped = report.documents_skipped,
            chunks_created = report.chunks_created,
            chunks_skipped = report.chunks_skipped,
            failures = report.failures.len(),
            corpus_version = report.corpus_version,
            total_ms = duration_millis(started.elapsed()),
            "ingestion finished"
        );
        Ok(report)
    }

    async fn ingest_document(
        &self,
        source: &dyn DocumentSource,
        document: &DocumentRef,
    ) -> Result<DocumentOutcome, AppError> {
        let result = match self.services.load_text(source, document).await {
            Ok(text) => self.drive_document(document, text).await,
            Err(err) => {
                warn!(document_id = %document.id, error = %err, "failed to load document");
                Err(err)
            }
        };
        if let Err(err) = &result {
            self.record_failure(document, err).await;
        }
        result
    }

    #[instrument(skip_all, fields(document_id = %document.id))]
    async fn drive_document(
        &self,
        document: &DocumentRef,
        text: String,
    ) -> Result<DocumentOutcome, AppError> {
        let mut ctx = DocumentContext::new(document, &self.tuning, self.services.as_ref(), text);
        let machine = ready();
        let pipeline_started = Instant::now();

        let machine = fingerprint(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;

        if ctx.is_unchanged() {
            skip(machine, &ctx).map_err(|err| ctx.abort(err))?;
            let chunks = ctx.existing.as_ref().map_or(0, |doc| doc.chunk_count);
            return Ok(DocumentOutcome::Unchanged { chunks });
        }

        let stage_start = Instant::now();
        let machine = split(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let split_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = embed(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let embed_duration = stage_start.elapsed();

        let chunks = ctx.records.len();
        let stage_start = Instant::now();
        let _machine = commit(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let commit_duration = stage_start.elapsed();

        info!(
            document_id = %document.id,
            chunks,
            corpus_version = ctx.corpus_version.unwrap_or_default(),
            total_ms = duration_millis(pipeline_started.elapsed()),
            split_ms = duration_millis(split_duration),
            embed_ms = duration_millis(embed_duration),
            commit_ms = duration_millis(commit_duration),
            "document ingestion finished"
        );

        Ok(DocumentOutcome::Ingested { chunks })
    }

    async fn record_failure(&self, document: &DocumentRef, err: &AppError) {
        let reason = failure_reason(err);
        let existing = match self.services.find_document(&document.id).await {
            Ok(existing) => existing,
            Err(lookup_err) => {
                warn!(document_id = %document.id, error = %lookup_err, "could not load document to mark it failed");
                return;
            }
        };
        let mut record = existing.unwrap_or_else(|| {
            common::storage::types::Document::pending(document.id.clone(), document.source.clone())
        });
        record.mark_failed(reason);
        if let Err(record_err) = self.services.record_document(record).await {
            warn!(document_id = %document.id, error = %record_err, "could not mark document failed");
        }
    }
}

fn failure_reason(err: &AppError) -> String {
    match err {
        AppError::IngestionPartialFailure { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests;
