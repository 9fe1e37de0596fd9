use std::path::Path;

use async_trait::async_trait;
use common::error::AppError;

/// Turns a file into plain text. Format internals stay behind this trait.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    fn supports(&self, path: &Path) -> bool;

    async fn extract(&self, path: &Path) -> Result<String, AppError>;
}

/// Plain text and markdown, read as UTF-8 with lossy replacement.
#[derive(Debug, Clone, Default)]
pub struct PlainTextExtractor;

const PLAIN_TEXT_EXTENSIONS: [&str; 3] = ["txt", "md", "markdown"];

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                PLAIN_TEXT_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            })
    }

    async fn extract(&self, path: &Path) -> Result<String, AppError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
