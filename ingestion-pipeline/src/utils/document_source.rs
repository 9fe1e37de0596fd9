use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use common::error::AppError;
use tracing::debug;

use super::file_text_extraction::{PlainTextExtractor, TextExtractor};

/// A document known to a source, before its text is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    /// Stable identifier, unique within the source.
    pub id: String,
    /// Human-readable origin shown next to citations.
    pub source: String,
}

/// Where documents come from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Every document currently available, ordered by id.
    async fn list(&self) -> Result<Vec<DocumentRef>, AppError>;

    async fn load(&self, document: &DocumentRef) -> Result<String, AppError>;
}

/// Recursively scans a folder. Hidden files and directories are ignored, as
/// are files no extractor supports. Ids are paths relative to the root with
/// `/` separators.
pub struct FolderSource {
    root: PathBuf,
    extractor: Arc<dyn TextExtractor>,
}

impl FolderSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_extractor(root, Arc::new(PlainTextExtractor))
    }

    pub fn with_extractor(root: impl Into<PathBuf>, extractor: Arc<dyn TextExtractor>) -> Self {
        Self {
            root: root.into(),
            extractor,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative_id(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect();
        (!parts.is_empty()).then(|| parts.join("/"))
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

#[async_trait]
impl DocumentSource for FolderSource {
    async fn list(&self) -> Result<Vec<DocumentRef>, AppError> {
        if !tokio::fs::try_exists(&self.root).await? {
            return Err(AppError::NotFound(format!(
                "document folder {} does not exist",
                self.root.display()
            )));
        }

        let mut pending = vec![self.root.clone()];
        let mut documents = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if is_hidden(&path) {
                    continue;
                }
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    if !self.extractor.supports(&path) {
                        debug!(path = %path.display(), "skipping unsupported file");
                        continue;
                    }
                    if let Some(id) = self.relative_id(&path) {
                        documents.push(DocumentRef {
                            source: id.clone(),
                            id,
                        });
                    }
                }
            }
        }

        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents)
    }

    async fn load(&self, document: &DocumentRef) -> Result<String, AppError> {
        let path = document
            .id
            .split('/')
            .fold(self.root.clone(), |path, part| path.join(part));
        self.extractor.extract(&path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_supported_files_recursively() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        tokio::fs::create_dir_all(root.join("guides/deep"))
            .await
            .expect("mkdir");
        tokio::fs::create_dir_all(root.join(".git")).await.expect("mkdir");
        tokio::fs::write(root.join("a.txt"), "alpha").await.expect("write");
        tokio::fs::write(root.join("guides/b.md"), "beta").await.expect("write");
        tokio::fs::write(root.join("guides/deep/c.markdown"), "gamma")
            .await
            .expect("write");
        tokio::fs::write(root.join(".hidden.md"), "secret").await.expect("write");
        tokio::fs::write(root.join(".git/config.txt"), "x").await.expect("write");
        tokio::fs::write(root.join("scan.pdf"), "%PDF").await.expect("write");

        let source = FolderSource::new(root);
        let documents = source.list().await.expect("list");
        let ids: Vec<_> = documents.iter().map(|doc| doc.id.as_str()).collect();
        assert_eq!(ids, vec!["a.txt", "guides/b.md", "guides/deep/c.markdown"]);

        let text = source.load(&documents[2]).await.expect("load");
        assert_eq!(text, "gamma");
    }

    #[tokio::test]
    async fn missing_folder_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = FolderSource::new(dir.path().join("nope"));
        assert!(matches!(source.list().await, Err(AppError::NotFound(_))));
    }
}
