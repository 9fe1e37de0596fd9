use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

const PREVIEW_CHARS: usize = 120;

/// Canonical form of a user query: NFKC, trimmed, internal whitespace
/// collapsed to single spaces, lowercased.
pub fn normalize_query(query: &str) -> String {
    let normalized: String = query.nfkc().collect();
    normalized
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Single-line preview for logs.
pub fn preview(text: &str) -> String {
    let single_line: String = text
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();
    let mut preview: String = single_line.chars().take(PREVIEW_CHARS).collect();
    if single_line.chars().count() > PREVIEW_CHARS {
        preview.push('…');
    }
    preview
}

/// SHA-256 of the text as lowercase hex.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}
