//! Ordered provider chain.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use opflow_types::EventSender;
use opflow_util::EngineSettings;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DataError, DataHandle, FsProvider, GitProvider, Node, NodeProvider, Provider};

/// Workspace directory searched before the working directory itself.
const WORKSPACE_OPS_DIR: &str = ".opspec";

/// Tries providers in order and returns the first handle.
///
/// Only misses fall through: `Ok(None)`, a `NotFound` error, or any error from
/// a provider whose [`Provider::errors_are_misses`] is set. Everything else,
/// authentication and authorization failures included, ends the resolution.
#[derive(Clone)]
pub struct DataResolver {
    providers: Vec<Arc<dyn Provider>>,
}

impl DataResolver {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self { providers }
    }

    /// Chain used from a workspace: `<cwd>/.opspec` and `<cwd>`, then the node.
    pub fn for_workspace(node: Arc<dyn Node>, cwd: &Path) -> Self {
        Self::new(vec![
            Arc::new(FsProvider::new([cwd.join(WORKSPACE_OPS_DIR), cwd.to_path_buf()])),
            Arc::new(NodeProvider::new(node)),
        ])
    }

    /// Chain used inside a node: absolute paths, then git through `cache_dir`.
    pub fn for_node_core(cache_dir: impl Into<PathBuf>) -> Self {
        Self::new(vec![Arc::new(FsProvider::default()), Arc::new(GitProvider::new(cache_dir))])
    }

    /// Node-local installation, then workspace and cache, then git.
    pub fn conventional(node: Arc<dyn Node>, cwd: &Path, settings: &EngineSettings) -> Self {
        let cache_dir = settings.ops_cache_dir();
        Self::new(vec![
            Arc::new(NodeProvider::new(node)),
            Arc::new(FsProvider::new([cwd.join(WORKSPACE_OPS_DIR), cwd.to_path_buf(), cache_dir])),
            Arc::new(GitProvider::from_settings(settings)),
        ])
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    /// Resolve `data_ref` through the chain.
    ///
    /// # Returns
    /// The first provider's handle, the first hard error, or `NotFound` listing
    /// why each provider missed.
    pub async fn resolve(
        &self,
        cancel: &CancellationToken,
        events: &EventSender,
        call_id: &str,
        data_ref: &str,
    ) -> Result<Arc<dyn DataHandle>, DataError> {
        debug!(call_id = %call_id, data_ref = %data_ref, providers = self.providers.len(), "resolving data");
        let mut attempts = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            if cancel.is_cancelled() {
                return Err(DataError::cancelled(data_ref));
            }
            match provider.try_resolve(cancel, events, call_id, data_ref).await {
                Ok(Some(handle)) => {
                    info!(call_id = %call_id, data_ref = %data_ref, provider = provider.label(), "data resolved");
                    return Ok(handle);
                }
                Ok(None) => {
                    debug!(data_ref = %data_ref, provider = provider.label(), "provider miss");
                    attempts.push(format!("{}: not found", provider.label()));
                }
                Err(error) if !error.is_cancelled() && (error.is_not_found() || provider.errors_are_misses()) => {
                    debug!(data_ref = %data_ref, provider = provider.label(), error = %error, "provider miss");
                    attempts.push(format!("{}: {error}", provider.label()));
                }
                Err(error) => {
                    warn!(call_id = %call_id, data_ref = %data_ref, provider = provider.label(), error = %error, "data resolution failed");
                    return Err(error);
                }
            }
        }

        Err(DataError::not_found(data_ref, attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PathHandle;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::unbounded_channel;

    enum Outcome {
        Hit(&'static str),
        Miss,
        Fail(DataError),
    }

    struct FakeProvider {
        label: &'static str,
        outcome: Outcome,
        soft_errors: bool,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(label: &'static str, outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                label,
                outcome,
                soft_errors: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn soft(label: &'static str, outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                label,
                outcome,
                soft_errors: true,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn label(&self) -> &str {
            self.label
        }

        async fn try_resolve(
            &self,
            _cancel: &CancellationToken,
            _events: &EventSender,
            _call_id: &str,
            data_ref: &str,
        ) -> Result<Option<Arc<dyn DataHandle>>, DataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                Outcome::Hit(path) => Ok(Some(Arc::new(PathHandle::new(*path, data_ref)))),
                Outcome::Miss => Ok(None),
                Outcome::Fail(error) => Err(error.clone()),
            }
        }

        fn errors_are_misses(&self) -> bool {
            self.soft_errors
        }
    }

    fn chain(providers: &[&Arc<FakeProvider>]) -> DataResolver {
        DataResolver::new(providers.iter().map(|provider| Arc::clone(*provider) as Arc<dyn Provider>).collect())
    }

    async fn resolve(resolver: &DataResolver) -> Result<Arc<dyn DataHandle>, DataError> {
        let (events, _receiver) = unbounded_channel();
        resolver.resolve(&CancellationToken::new(), &events, "call", "example.org/pkg#1.0.0").await
    }

    #[tokio::test]
    async fn test_first_hit_wins() {
        let first = FakeProvider::new("first", Outcome::Miss);
        let second = FakeProvider::new("second", Outcome::Hit("/second"));
        let third = FakeProvider::new("third", Outcome::Hit("/third"));
        let resolver = chain(&[&first, &second, &third]);

        let handle = resolve(&resolver).await.unwrap();
        assert_eq!(handle.path(), Some(Path::new("/second")));
        assert_eq!((first.calls(), second.calls(), third.calls()), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_all_misses_report_not_found() {
        let filesystem = FakeProvider::new("filesystem", Outcome::Miss);
        let git = FakeProvider::new("git", Outcome::Fail(DataError::not_found("example.org/pkg#1.0.0", Vec::new())));
        let resolver = chain(&[&filesystem, &git]);

        let error = resolve(&resolver).await.unwrap_err();
        assert!(error.is_not_found());
        let message = error.to_string();
        assert!(message.starts_with("unable to resolve 'example.org/pkg#1.0.0' (filesystem: not found; git: "));
    }

    #[tokio::test]
    async fn test_auth_failure_stops_resolution() {
        let git = FakeProvider::new(
            "git",
            Outcome::Fail(DataError::Authentication {
                reference: "example.org/pkg".into(),
            }),
        );
        let fallback = FakeProvider::new("fallback", Outcome::Hit("/fallback"));
        let resolver = chain(&[&git, &fallback]);

        let error = resolve(&resolver).await.unwrap_err();
        assert!(matches!(error, DataError::Authentication { .. }));
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn test_local_provider_errors_fall_through() {
        let broken_cache = FakeProvider::soft("filesystem", Outcome::Fail(DataError::fetch("example.org/pkg#1.0.0", "corrupt")));
        let git = FakeProvider::new("git", Outcome::Hit("/cache/example.org/pkg#1.0.0"));
        let resolver = chain(&[&broken_cache, &git]);

        let handle = resolve(&resolver).await.unwrap();
        assert_eq!(handle.path(), Some(Path::new("/cache/example.org/pkg#1.0.0")));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_providers() {
        let provider = FakeProvider::new("filesystem", Outcome::Hit("/x"));
        let resolver = chain(&[&provider]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (events, _receiver) = unbounded_channel();

        let error = resolver.resolve(&cancel, &events, "call", "example.org/pkg#1.0.0").await.unwrap_err();
        assert!(error.is_cancelled());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_node_core_chain_resolves_absolute_paths() {
        let cache = tempfile::tempdir().unwrap();
        let package = tempfile::tempdir().unwrap();
        let resolver = DataResolver::for_node_core(cache.path());
        let labels: Vec<_> = resolver.providers().iter().map(|provider| provider.label().to_string()).collect();
        assert_eq!(labels, ["filesystem", "git"]);

        let (events, _receiver) = unbounded_channel();
        let data_ref = package.path().to_string_lossy().into_owned();
        let handle = resolver.resolve(&CancellationToken::new(), &events, "call", &data_ref).await.unwrap();
        assert_eq!(handle.path(), Some(package.path()));
    }

    #[tokio::test]
    async fn test_workspace_chain_prefers_opspec_directory() {
        let workspace = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(workspace.path().join(".opspec/build")).unwrap();
        std::fs::create_dir_all(workspace.path().join("build")).unwrap();

        struct NoNode;

        #[async_trait]
        impl Node for NoNode {
            async fn list_descendants(
                &self,
                _cancel: &CancellationToken,
                _events: &EventSender,
                _call_id: &str,
                request: opflow_types::ListDescendantsRequest,
            ) -> Result<Vec<opflow_types::DirEntry>, DataError> {
                Err(DataError::not_found(request.pkg_ref, Vec::new()))
            }

            async fn get_data(
                &self,
                _cancel: &CancellationToken,
                _events: &EventSender,
                _call_id: &str,
                request: opflow_types::GetDataRequest,
            ) -> Result<crate::data::ContentStream, DataError> {
                Err(DataError::not_found(request.pkg_ref, Vec::new()))
            }
        }

        let resolver = DataResolver::for_workspace(Arc::new(NoNode), workspace.path());
        let (events, _receiver) = unbounded_channel();
        let handle = resolver.resolve(&CancellationToken::new(), &events, "call", "build").await.unwrap();
        assert_eq!(handle.path(), Some(workspace.path().join(".opspec/build").as_path()));

        let error = resolver.resolve(&CancellationToken::new(), &events, "call", "missing").await.unwrap_err();
        assert!(error.is_not_found());
    }
}
