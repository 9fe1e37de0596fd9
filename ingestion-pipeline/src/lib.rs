#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunker;
pub mod pipeline;
pub mod utils;

pub use chunker::chunk_text;
pub use pipeline::{
    DefaultPipelineServices, IngestionCoordinator, IngestionFailure, IngestionJobTracker,
    IngestionReport, IngestionTuning, JobSnapshot, JobStatus, PipelineServices,
};
pub use utils::document_source::{DocumentRef, DocumentSource, FolderSource};
