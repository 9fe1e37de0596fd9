use chrono::{DateTime, Utc};

use crate::stored_object;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    #[default]
    Pending,
    Ingested,
    Failed,
}

stored_object!(Document, "document", {
    /// Where the text came from, usually a path relative to the data directory.
    source: String,
    /// SHA-256 of the extracted text, hex encoded. Empty until first hashed.
    #[serde(default)]
    content_hash: String,
    #[serde(default)]
    status: DocumentStatus,
    #[serde(default)]
    chunk_count: usize,
    #[serde(default)]
    ingested_at: Option<DateTime<Utc>>,
    #[serde(default)]
    error: Option<String>
});

impl Document {
    /// A document registered with the catalog but not yet ingested.
    pub fn pending(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            content_hash: String::new(),
            status: DocumentStatus::Pending,
            chunk_count: 0,
            ingested_at: None,
            error: None,
        }
    }

    pub fn mark_ingested(&mut self, content_hash: String, chunk_count: usize) {
        self.content_hash = content_hash;
        self.chunk_count = chunk_count;
        self.status = DocumentStatus::Ingested;
        self.ingested_at = Some(Utc::now());
        self.error = None;
    }

    /// Records a failure without touching the hash of the last good ingestion.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = DocumentStatus::Failed;
        self.error = Some(reason.into());
    }

    /// True when this document was already ingested from exactly this content.
    pub fn is_current(&self, content_hash: &str) -> bool {
        self.status == DocumentStatus::Ingested && self.content_hash == content_hash
    }
}
