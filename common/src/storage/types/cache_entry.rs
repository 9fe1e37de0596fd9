use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source reference attached to an answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub chunk_id: String,
    pub document_id: String,
    pub source: String,
    pub snippet: String,
}

/// A stored answer. Holds everything needed to rebuild the response without
/// touching any capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub answer: String,
    pub citations: Vec<Citation>,
    /// Passages that were given to the generator, in prompt order.
    #[serde(default)]
    pub context: Vec<String>,
    /// False when the generator cited nothing we could map back to a passage.
    #[serde(default = "default_cited")]
    pub cited: bool,
    pub generated_at: DateTime<Utc>,
    pub ttl_secs: u64,
    pub corpus_version: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let ttl = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX);
        (now - self.generated_at).num_seconds() >= ttl
    }
}

const fn default_cited() -> bool {
    true
}
