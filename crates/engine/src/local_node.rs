//! In-process node: serves packages from absolute paths and the git cache.

use std::sync::Arc;

use async_trait::async_trait;
use opflow_types::{DirEntry, EventSender, GetDataRequest, ListDescendantsRequest};
use opflow_util::EngineSettings;
use tokio_util::sync::CancellationToken;

use crate::data::{ContentStream, DataError, DataHandle, DataResolver, Node};

/// A [`Node`] that resolves packages itself rather than asking a peer.
#[derive(Clone)]
pub struct LocalNode {
    resolver: DataResolver,
}

impl LocalNode {
    /// Node resolving through `[filesystem, git(<data_dir>/ops)]`.
    pub fn new(settings: &EngineSettings) -> Self {
        Self::with_resolver(DataResolver::for_node_core(settings.ops_cache_dir()))
    }

    pub fn with_resolver(resolver: DataResolver) -> Self {
        Self { resolver }
    }

    /// References this node cannot parse are reported as `NotFound`.
    async fn resolve(&self, cancel: &CancellationToken, events: &EventSender, call_id: &str, pkg_ref: &str) -> Result<Arc<dyn DataHandle>, DataError> {
        match self.resolver.resolve(cancel, events, call_id, pkg_ref).await {
            Err(DataError::InvalidReference { reference, source }) => Err(DataError::not_found(reference, vec![format!("node: invalid git ref: {source}")])),
            other => other,
        }
    }
}

#[async_trait]
impl Node for LocalNode {
    async fn list_descendants(
        &self,
        cancel: &CancellationToken,
        events: &EventSender,
        call_id: &str,
        request: ListDescendantsRequest,
    ) -> Result<Vec<DirEntry>, DataError> {
        if request.pkg_ref.is_empty() {
            return Ok(Vec::new());
        }
        let handle = self.resolve(cancel, events, call_id, &request.pkg_ref).await?;
        handle.list_descendants(cancel, events, call_id).await
    }

    async fn get_data(&self, cancel: &CancellationToken, events: &EventSender, call_id: &str, request: GetDataRequest) -> Result<ContentStream, DataError> {
        if request.pkg_ref.is_empty() || request.content_path.is_empty() {
            return Err(DataError::invalid_request(format!("invalid ref: {}{}", request.pkg_ref, request.content_path)));
        }
        let handle = self.resolve(cancel, events, call_id, &request.pkg_ref).await?;
        handle.get_content(cancel, events, call_id, &request.content_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::sync::mpsc::unbounded_channel;

    fn node(cache: &std::path::Path) -> LocalNode {
        LocalNode::with_resolver(DataResolver::for_node_core(cache))
    }

    #[tokio::test]
    async fn test_empty_reference_lists_nothing() {
        let cache = tempfile::tempdir().unwrap();
        let (events, _receiver) = unbounded_channel();

        let entries = node(cache.path())
            .list_descendants(&CancellationToken::new(), &events, "call", ListDescendantsRequest::default())
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_get_data_requires_reference_and_path() {
        let cache = tempfile::tempdir().unwrap();
        let (events, _receiver) = unbounded_channel();
        let request = GetDataRequest {
            pkg_ref: "example.org/pkg#1.0.0".into(),
            content_path: String::new(),
        };

        let error = match node(cache.path()).get_data(&CancellationToken::new(), &events, "call", request).await {
            Ok(_) => panic!("expected invalid request"),
            Err(error) => error,
        };
        assert_eq!(error.to_string(), "invalid ref: example.org/pkg#1.0.0");
    }

    #[tokio::test]
    async fn test_serves_absolute_package_directories() {
        let cache = tempfile::tempdir().unwrap();
        let package = tempfile::tempdir().unwrap();
        std::fs::write(package.path().join("op.yml"), "name: hello\n").unwrap();
        let pkg_ref = package.path().to_string_lossy().into_owned();
        let local = node(cache.path());
        let (events, _receiver) = unbounded_channel();
        let cancel = CancellationToken::new();

        let entries = local
            .list_descendants(&cancel, &events, "call", ListDescendantsRequest { pkg_ref: pkg_ref.clone() })
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "/op.yml");

        let request = GetDataRequest {
            pkg_ref,
            content_path: "/op.yml".into(),
        };
        let mut content = String::new();
        local
            .get_data(&cancel, &events, "call", request)
            .await
            .unwrap()
            .read_to_string(&mut content)
            .await
            .unwrap();
        assert_eq!(content, "name: hello\n");
    }

    #[tokio::test]
    async fn test_serves_cached_git_packages_without_cloning() {
        let cache = tempfile::tempdir().unwrap();
        let cached = cache.path().join("example.org/pkg#1.0.0");
        std::fs::create_dir_all(&cached).unwrap();
        std::fs::write(cached.join("op.yml"), "name: cached\n").unwrap();
        let (events, _receiver) = unbounded_channel();

        let entries = node(cache.path())
            .list_descendants(
                &CancellationToken::new(),
                &events,
                "call",
                ListDescendantsRequest {
                    pkg_ref: "example.org/pkg#1.0.0".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(entries.iter().map(|entry| entry.path.as_str()).collect::<Vec<_>>(), ["/op.yml"]);
    }

    #[tokio::test]
    async fn test_unversioned_reference_is_not_found() {
        let cache = tempfile::tempdir().unwrap();
        let (events, _receiver) = unbounded_channel();
        let cancel = CancellationToken::new();
        let local = node(cache.path());

        let error = local
            .list_descendants(&cancel, &events, "call", ListDescendantsRequest { pkg_ref: "build".into() })
            .await
            .unwrap_err();
        assert!(error.is_not_found(), "unexpected error: {error:?}");

        let request = GetDataRequest {
            pkg_ref: "build".into(),
            content_path: "/op.yml".into(),
        };
        let error = match local.get_data(&cancel, &events, "call", request).await {
            Ok(_) => panic!("expected a miss"),
            Err(error) => error,
        };
        assert!(error.is_not_found(), "unexpected error: {error:?}");
    }

    #[tokio::test]
    async fn test_conventional_chain_falls_through_local_node_to_workspace() {
        let data_dir = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(workspace.path().join(".opspec/build")).unwrap();
        let settings = EngineSettings {
            data_dir: data_dir.path().to_path_buf(),
            ..EngineSettings::default()
        };
        let resolver = DataResolver::conventional(Arc::new(LocalNode::new(&settings)), workspace.path(), &settings);
        let (events, _receiver) = unbounded_channel();

        let handle = resolver.resolve(&CancellationToken::new(), &events, "call", "build").await.unwrap();
        assert_eq!(handle.path(), Some(workspace.path().join(".opspec/build").as_path()));
    }
}
