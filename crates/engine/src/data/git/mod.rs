//! Git provider: packages sourced from tagged git repositories.
//!
//! Resolution reads through a local cache (`<base>/<name>#<version>/`). On a
//! miss the tag is shallow-cloned, stripped of repository metadata, and moved
//! into the cache. Concurrent resolutions of the same reference string on one
//! provider share a single fetch and its outcome.

mod pull;
mod remote;

pub use remote::{CloneRequest, GitCli, GitRemote, RemoteError, classify_clone_failure};

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use opflow_types::{Creds, EventKind, EventSender, publish};
use opflow_util::{CredentialHelper, EngineSettings};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{DataError, DataHandle, FsProvider, PackageRef, PathHandle, Provider};

type Resolution = Result<Arc<dyn DataHandle>, DataError>;
type SharedResolution = Shared<BoxFuture<'static, Resolution>>;

/// How the clone URL is built from a package name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitTransport {
    /// `ssh://git@<name>`, authenticated by the SSH agent.
    SshAgent,
    /// `https://<name>`, authenticated by explicit credentials.
    Https,
}

impl GitTransport {
    pub fn url_for(self, name: &str) -> String {
        match self {
            Self::SshAgent => format!("ssh://git@{name}"),
            Self::Https => format!("https://{name}"),
        }
    }
}

/// A fetch in progress, tagged so only its own completion removes it.
struct InFlight {
    id: u64,
    resolution: SharedResolution,
}

type FlightRegistry = Arc<Mutex<HashMap<String, InFlight>>>;

/// Held by the fetch task; unregisters its flight when the task ends, however it ends.
struct FlightGuard {
    registry: FlightRegistry,
    data_ref: String,
    id: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let Ok(mut in_flight) = self.registry.lock() else {
            return;
        };
        if in_flight.get(&self.data_ref).is_some_and(|entry| entry.id == self.id) {
            in_flight.remove(&self.data_ref);
        }
    }
}

/// State the detached fetch task needs; cloned into each flight.
#[derive(Clone)]
struct GitInner {
    base_path: PathBuf,
    cache: FsProvider,
    remote: Arc<dyn GitRemote>,
    pull_creds: Option<Creds>,
    credential_helper: Option<CredentialHelper>,
}

impl GitInner {
    async fn resolve(&self, cancel: &CancellationToken, events: &EventSender, call_id: &str, data_ref: &str) -> Resolution {
        let package_ref = PackageRef::parse(data_ref).map_err(|source| DataError::invalid_reference(data_ref, source))?;

        // Cache lookup errors are ignored; the remote pull below is authoritative.
        match self.cache.try_resolve(cancel, events, call_id, data_ref).await {
            Ok(Some(handle)) => {
                debug!(data_ref = %data_ref, "git cache hit");
                return Ok(handle);
            }
            Ok(None) => {}
            Err(error) => debug!(data_ref = %data_ref, error = %error, "ignoring git cache lookup failure"),
        }

        publish(
            events,
            call_id,
            EventKind::DataPullStarted {
                data_ref: data_ref.to_string(),
            },
        );
        let path = self.pull(cancel, &package_ref).await?;
        info!(data_ref = %data_ref, path = %path.display(), "git pull completed");
        publish(
            events,
            call_id,
            EventKind::DataPullCompleted {
                data_ref: data_ref.to_string(),
            },
        );
        Ok(Arc::new(PathHandle::new(path, data_ref)))
    }
}

/// Provider resolving `host/path#tag` references from git remotes.
pub struct GitProvider {
    inner: Arc<GitInner>,
    in_flight: FlightRegistry,
    next_flight_id: AtomicU64,
}

impl fmt::Debug for GitProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitProvider")
            .field("base_path", &self.inner.base_path)
            .field("has_pull_creds", &self.inner.pull_creds.is_some())
            .field("credential_fallback", &self.inner.credential_helper.is_some())
            .finish()
    }
}

impl GitProvider {
    /// Provider caching under `base_path` and cloning with the `git` executable.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self::with_remote(base_path, Arc::new(GitCli::default()))
    }

    pub fn with_remote(base_path: impl Into<PathBuf>, remote: Arc<dyn GitRemote>) -> Self {
        let base_path = base_path.into();
        Self::from_inner(GitInner {
            cache: FsProvider::new([base_path.clone()]),
            base_path,
            remote,
            pull_creds: None,
            credential_helper: None,
        })
    }

    /// Provider rooted at the settings' ops cache, honouring `credential_fallback`.
    pub fn from_settings(settings: &EngineSettings) -> Self {
        let provider = Self::new(settings.ops_cache_dir());
        if settings.credential_fallback {
            provider.with_credential_fallback(CredentialHelper::default())
        } else {
            provider
        }
    }

    /// Clone over HTTPS with these credentials instead of using the SSH agent.
    pub fn with_pull_creds(self, creds: Creds) -> Self {
        let mut inner = (*self.inner).clone();
        inner.pull_creds = Some(creds);
        Self::from_inner(inner)
    }

    /// On SSH authentication failure, retry once over HTTPS with credentials from `helper`.
    pub fn with_credential_fallback(self, helper: CredentialHelper) -> Self {
        let mut inner = (*self.inner).clone();
        inner.credential_helper = Some(helper);
        Self::from_inner(inner)
    }

    pub fn base_path(&self) -> &Path {
        &self.inner.base_path
    }

    fn from_inner(inner: GitInner) -> Self {
        Self {
            inner: Arc::new(inner),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_flight_id: AtomicU64::new(0),
        }
    }

    /// Join the fetch already running for `data_ref`, or start one.
    ///
    /// The fetch runs on its own task so it completes (and cleans up) even when
    /// every waiter goes away; it observes the starting caller's cancellation.
    /// The task drops its registry entry on completion, so only concurrent
    /// callers ever share an outcome.
    fn join_or_start(&self, cancel: &CancellationToken, events: &EventSender, call_id: &str, data_ref: &str) -> SharedResolution {
        let mut in_flight = self.in_flight.lock().expect("in-flight lock");
        if let Some(existing) = in_flight.get(data_ref) {
            debug!(data_ref = %data_ref, flight = existing.id, "joining in-flight git resolution");
            return existing.resolution.clone();
        }

        let id = self.next_flight_id.fetch_add(1, Ordering::Relaxed);
        let flight = FlightGuard {
            registry: Arc::clone(&self.in_flight),
            data_ref: data_ref.to_string(),
            id,
        };
        let inner = Arc::clone(&self.inner);
        let cancel = cancel.clone();
        let events = events.clone();
        let call_id = call_id.to_string();
        let owned_ref = data_ref.to_string();
        // The registry lock is held until the entry is inserted, so the guard
        // cannot run its removal before the insert.
        let task = tokio::spawn(async move {
            let _flight = flight;
            inner.resolve(&cancel, &events, &call_id, &owned_ref).await
        });

        let task_ref = data_ref.to_string();
        let resolution = async move {
            match task.await {
                Ok(resolution) => resolution,
                Err(join_error) => Err(DataError::fetch(task_ref, format!("git resolution task failed: {join_error}"))),
            }
        }
        .boxed()
        .shared();

        in_flight.insert(
            data_ref.to_string(),
            InFlight {
                id,
                resolution: resolution.clone(),
            },
        );
        resolution
    }
}

#[async_trait]
impl Provider for GitProvider {
    fn label(&self) -> &str {
        "git"
    }

    async fn try_resolve(
        &self,
        cancel: &CancellationToken,
        events: &EventSender,
        call_id: &str,
        data_ref: &str,
    ) -> Result<Option<Arc<dyn DataHandle>>, DataError> {
        let resolution = self.join_or_start(cancel, events, call_id, data_ref);

        tokio::select! {
            result = resolution => result.map(Some),
            _ = cancel.cancelled() => Err(DataError::cancelled(data_ref)),
        }
    }
}
