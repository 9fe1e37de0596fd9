use serde::{Deserialize, Serialize};

/// Contiguous span of a document's text. `start` and `end` are character
/// offsets into the extracted text, `end` exclusive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Chunk {
    pub fn new(document_id: &str, text: String, start: usize, end: usize) -> Self {
        Self {
            id: Self::id_for(document_id, start),
            document_id: document_id.to_string(),
            text,
            start,
            end,
        }
    }

    /// Chunk ids are derived from the owning document and the start offset, so
    /// re-chunking identical text yields identical ids.
    pub fn id_for(document_id: &str, start: usize) -> String {
        format!("{document_id}::{start}")
    }

    pub fn len_chars(&self) -> usize {
        self.end - self.start
    }
}

/// A chunk together with its vector, ready to be written to a vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub chunk: Chunk,
    pub source: String,
    pub embedding: Vec<f32>,
}

/// A chunk returned by similarity search. Higher `score` is more similar.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHit {
    pub chunk: Chunk,
    pub source: String,
    pub score: f32,
}
