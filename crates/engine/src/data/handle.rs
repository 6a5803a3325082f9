//! Path-backed data handle.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use opflow_types::{DirEntry, EventSender};
use tokio::fs;
use tokio_util::sync::CancellationToken;

use super::{ContentStream, DataError, DataHandle};

/// Handle to a package that lives in a local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathHandle {
    path: PathBuf,
    reference: String,
}

impl PathHandle {
    pub fn new(path: impl Into<PathBuf>, reference: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reference: reference.into(),
        }
    }

    /// Resolve `content_path` below the package root, refusing to leave it.
    fn content_location(&self, content_path: &str) -> Result<PathBuf, DataError> {
        let relative = Path::new(content_path.trim_start_matches('/'));
        if relative.components().any(|component| !matches!(component, Component::Normal(_) | Component::CurDir)) {
            return Err(DataError::invalid_request(format!("invalid content path: {content_path}")));
        }
        Ok(self.path.join(relative))
    }
}

#[async_trait]
impl DataHandle for PathHandle {
    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn reference(&self) -> &str {
        &self.reference
    }

    async fn get_content(
        &self,
        _cancel: &CancellationToken,
        _events: &EventSender,
        _call_id: &str,
        content_path: &str,
    ) -> Result<ContentStream, DataError> {
        let location = self.content_location(content_path)?;
        let file = fs::File::open(&location).await.map_err(|error| DataError::io(&location, &error))?;
        Ok(Box::new(file))
    }

    async fn list_descendants(&self, cancel: &CancellationToken, _events: &EventSender, _call_id: &str) -> Result<Vec<DirEntry>, DataError> {
        let mut entries = Vec::new();
        let mut pending = vec![self.path.clone()];

        while let Some(directory) = pending.pop() {
            if cancel.is_cancelled() {
                return Err(DataError::cancelled(&self.reference));
            }
            let mut reader = fs::read_dir(&directory).await.map_err(|error| DataError::io(&directory, &error))?;
            while let Some(entry) = reader.next_entry().await.map_err(|error| DataError::io(&directory, &error))? {
                let entry_path = entry.path();
                let metadata = entry.metadata().await.map_err(|error| DataError::io(&entry_path, &error))?;
                let is_dir = metadata.is_dir();
                entries.push(DirEntry {
                    path: relative_entry_path(&self.path, &entry_path),
                    size: if is_dir { 0 } else { metadata.len() },
                    mode: file_mode(&metadata),
                });
                if is_dir {
                    pending.push(entry_path);
                }
            }
        }

        entries.sort_by(|left, right| left.path.cmp(&right.path));
        Ok(entries)
    }
}

fn relative_entry_path(root: &Path, entry: &Path) -> String {
    let relative = entry.strip_prefix(root).unwrap_or(entry);
    let joined = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    format!("/{joined}")
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    match (metadata.is_dir(), metadata.permissions().readonly()) {
        (true, _) => 0o040755,
        (false, true) => 0o100444,
        (false, false) => 0o100644,
    }
}
