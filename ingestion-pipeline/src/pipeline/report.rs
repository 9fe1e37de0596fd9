use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionFailure {
    pub document_id: String,
    pub reason: String,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    /// Documents found in the source, whatever happened to them.
    pub documents_processed: usize,
    pub documents_ingested: usize,
    pub documents_skipped: usize,
    pub chunks_created: usize,
    /// Chunks of unchanged documents that were left as they were.
    pub chunks_skipped: usize,
    pub failures: Vec<IngestionFailure>,
    /// Corpus version once the run finished.
    pub corpus_version: u64,
}

impl IngestionReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl fmt::Display for IngestionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Documents processed: {}", self.documents_processed)?;
        writeln!(
            f,
            "  ingested: {}, unchanged: {}, failed: {}",
            self.documents_ingested,
            self.documents_skipped,
            self.failures.len()
        )?;
        writeln!(f, "Chunks created: {}", self.chunks_created)?;
        writeln!(f, "Chunks skipped: {}", self.chunks_skipped)?;
        write!(f, "Corpus version: {}", self.corpus_version)?;
        if self.has_failures() {
            write!(f, "\nFailures:")?;
            for failure in &self.failures {
                write!(f, "\n  - {}: {}", failure.document_id, failure.reason)?;
            }
        }
        Ok(())
    }
}
