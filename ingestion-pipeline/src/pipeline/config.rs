use common::{
    error::AppError,
    utils::{config::PipelineSettings, retry::RetryPolicy},
};

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_batch_size: usize,
    /// Documents processed at the same time.
    pub document_concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self::from(&PipelineSettings::default())
    }
}

impl From<&PipelineSettings> for IngestionTuning {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
            embedding_batch_size: settings.embedding_batch_size,
            document_concurrency: settings.ingest_concurrency,
            retry: settings.retry.clone(),
        }
    }
}

impl IngestionTuning {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.chunk_size == 0 || self.chunk_overlap >= self.chunk_size {
            return Err(AppError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than a non-zero chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.embedding_batch_size == 0 || self.document_concurrency == 0 {
            return Err(AppError::InvalidConfig(
                "embedding_batch_size and document_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
