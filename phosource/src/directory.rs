//! Local directory used as an album
//!
//! Every file with a displayable extension directly inside the directory is
//! one item. The file name is the identifier, the modification time is the
//! creation time and `size-mtime` is the content version.

use crate::error::{FetchError, Result};
use crate::{media_info, mime_for_extension, PhotoSource, RemoteItem};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn item_path(&self, id: &str) -> Result<PathBuf> {
        // Identifiers are plain file names, never paths
        if id.is_empty() || id.contains('/') || id.contains('\\') || id == "." || id == ".." {
            return Err(FetchError::NotFound(id.to_string()));
        }
        Ok(self.root.join(id))
    }
}

#[async_trait::async_trait]
impl PhotoSource for DirectorySource {
    fn name(&self) -> &str {
        "directory"
    }

    async fn list_items(&self) -> Result<Vec<RemoteItem>> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            FetchError::Unreachable(format!("{}: {}", self.root.display(), e))
        })?;

        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.starts_with('.') {
                continue;
            }
            let ext = Path::new(&file_name)
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default();
            let Some(mime_type) = mime_for_extension(&ext) else {
                continue;
            };
            let Some((kind, _)) = media_info(mime_type) else {
                continue;
            };

            let modified = metadata.modified()?;
            let mtime = modified
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();

            items.push(RemoteItem {
                id: file_name.clone(),
                kind,
                mime_type: mime_type.to_string(),
                created_at: DateTime::<Utc>::from(modified),
                version: format!("{:x}-{:x}", metadata.len(), mtime),
                filename: Some(file_name),
                download_url: None,
            });
        }

        items.sort_by(|a, b| a.id.cmp(&b.id));
        debug!(root = %self.root.display(), count = items.len(), "Listed directory");
        Ok(items)
    }

    async fn fetch(&self, item: &RemoteItem) -> Result<Bytes> {
        let path = self.item_path(&item.id)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(item.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
