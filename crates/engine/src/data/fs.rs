//! Filesystem provider: absolute references, workspace directories, and caches.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use opflow_types::EventSender;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{DataError, DataHandle, PathHandle, Provider};

/// Resolves references that already exist on local disk.
///
/// Absolute references are checked as-is. Relative references are probed under
/// each base path in order; the first existing match wins.
#[derive(Debug, Clone, Default)]
pub struct FsProvider {
    base_paths: Vec<PathBuf>,
}

impl FsProvider {
    pub fn new<I, P>(base_paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            base_paths: base_paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn base_paths(&self) -> &[PathBuf] {
        &self.base_paths
    }
}

#[async_trait]
impl Provider for FsProvider {
    fn label(&self) -> &str {
        "filesystem"
    }

    async fn try_resolve(
        &self,
        _cancel: &CancellationToken,
        _events: &EventSender,
        _call_id: &str,
        data_ref: &str,
    ) -> Result<Option<Arc<dyn DataHandle>>, DataError> {
        if Path::new(data_ref).is_absolute() {
            return Ok(probe(Path::new(data_ref))
                .await?
                .then(|| Arc::new(PathHandle::new(data_ref, data_ref)) as Arc<dyn DataHandle>));
        }

        for base_path in &self.base_paths {
            let candidate = base_path.join(data_ref);
            if probe(&candidate).await? {
                debug!(data_ref = %data_ref, path = %candidate.display(), "filesystem hit");
                return Ok(Some(Arc::new(PathHandle::new(candidate, data_ref))));
            }
        }
        Ok(None)
    }

    fn errors_are_misses(&self) -> bool {
        true
    }
}

async fn probe(path: &Path) -> Result<bool, DataError> {
    match fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(DataError::io(path, &error)),
    }
}
