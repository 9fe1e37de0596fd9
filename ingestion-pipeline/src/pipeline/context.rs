use common::{
    error::AppError,
    storage::types::{Chunk, ChunkRecord, Document},
};
use tracing::error;

use super::{config::IngestionTuning, services::PipelineServices};
use crate::utils::document_source::DocumentRef;

pub struct DocumentContext<'a> {
    pub document: &'a DocumentRef,
    pub tuning: &'a IngestionTuning,
    pub services: &'a dyn PipelineServices,
    pub text: String,
    pub content_hash: String,
    /// Catalog record from a previous run, if any.
    pub existing: Option<Document>,
    pub chunks: Vec<Chunk>,
    pub records: Vec<ChunkRecord>,
    pub corpus_version: Option<u64>,
}

impl<'a> DocumentContext<'a> {
    pub fn new(
        document: &'a DocumentRef,
        tuning: &'a IngestionTuning,
        services: &'a dyn PipelineServices,
        text: String,
    ) -> Self {
        Self {
            document,
            tuning,
            services,
            text,
            content_hash: String::new(),
            existing: None,
            chunks: Vec::new(),
            records: Vec::new(),
            corpus_version: None,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document.id
    }

    /// True when the catalog already holds this exact content as ingested.
    pub fn is_unchanged(&self) -> bool {
        self.existing
            .as_ref()
            .is_some_and(|existing| existing.is_current(&self.content_hash))
    }

    /// The catalog record to update, or a fresh pending one.
    pub fn catalog_record(&self) -> Document {
        self.existing.clone().unwrap_or_else(|| {
            Document::pending(self.document.id.clone(), self.document.source.clone())
        })
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            document_id = %self.document.id,
            error = %err,
            "document ingestion aborted"
        );
        err
    }
}
