//! The container daemon capability consumed by the runtime.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use opflow_types::{Creds, EventSender};
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use super::{DaemonError, HostConfig};

/// Caller-supplied destination for one container output stream.
pub type OutputSink = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Everything needed to create one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<(String, String)>,
    pub work_dir: Option<String>,
    pub host_config: HostConfig,
    pub network: String,
    /// Extra DNS name for the container on `network`.
    pub network_alias: Option<String>,
}

/// Operations the runtime needs from a container engine.
///
/// Every call observes `cancel`; teardown calls are made with a token nobody cancels.
#[async_trait]
pub trait ContainerDaemon: Send + Sync {
    /// Create the user-defined network `name` unless it already exists.
    async fn ensure_network(&self, cancel: &CancellationToken, name: &str) -> Result<(), DaemonError>;

    async fn pull_image(
        &self,
        cancel: &CancellationToken,
        events: &EventSender,
        call_id: &str,
        reference: &str,
        creds: Option<&Creds>,
    ) -> Result<(), DaemonError>;

    async fn build_image(&self, cancel: &CancellationToken, tag: &str, source: &Path) -> Result<(), DaemonError>;

    /// Returns the new container's id.
    async fn create_container(&self, cancel: &CancellationToken, spec: &ContainerSpec) -> Result<String, DaemonError>;

    async fn start_container(&self, cancel: &CancellationToken, container_id: &str) -> Result<(), DaemonError>;

    /// Copy one output stream of `name` into `sink` until the container stops.
    async fn stream_logs(&self, cancel: &CancellationToken, name: &str, stream: LogStream, sink: &mut OutputSink) -> Result<(), DaemonError>;

    /// Block until `name` is no longer running and return its exit code.
    async fn wait_container(&self, cancel: &CancellationToken, name: &str) -> Result<i64, DaemonError>;

    async fn stop_container(&self, cancel: &CancellationToken, name: &str, timeout: Duration) -> Result<(), DaemonError>;

    /// Force-remove `name` together with its anonymous volumes.
    async fn remove_container(&self, cancel: &CancellationToken, name: &str) -> Result<(), DaemonError>;
}
