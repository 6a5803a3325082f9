//! One container invocation, start to teardown.

use std::panic::{AssertUnwindSafe, resume_unwind};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use opflow_types::{ContainerCall, ContainerImage, EventKind, EventSender, publish};
use opflow_util::EngineSettings;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ContainerDaemon, ContainerError, ContainerSpec, DaemonError, DockerCli, HostConfig, LogStream, OutputSink, parse_port_bindings};

/// Runs container calls against a [`ContainerDaemon`].
///
/// Holds no per-invocation state; one runtime serves any number of concurrent calls.
#[derive(Clone)]
pub struct ContainerRuntime {
    daemon: Arc<dyn ContainerDaemon>,
    network_name: String,
    name_prefix: String,
    stop_timeout: Duration,
}

impl ContainerRuntime {
    pub fn new(daemon: Arc<dyn ContainerDaemon>) -> Self {
        Self::from_settings(daemon, &EngineSettings::default())
    }

    pub fn from_settings(daemon: Arc<dyn ContainerDaemon>, settings: &EngineSettings) -> Self {
        Self {
            daemon,
            network_name: settings.network_name.clone(),
            name_prefix: settings.container_name_prefix.clone(),
            stop_timeout: settings.stop_timeout(),
        }
    }

    /// Runtime backed by the local `docker` CLI.
    pub fn docker(settings: &EngineSettings) -> Self {
        Self::from_settings(Arc::new(DockerCli::default()), settings)
    }

    /// Daemon-side name for a container id. External tools rely on the prefix.
    pub fn container_name(&self, container_id: &str) -> String {
        format!("{}{container_id}", self.name_prefix)
    }

    /// Run `call` to completion, writing its output to `stdout` and `stderr`.
    ///
    /// The container is stopped and removed before this returns, whatever the
    /// outcome, and no output is written afterwards. Both sinks are closed.
    /// If the returned future is dropped early, teardown is spawned onto the
    /// current runtime instead.
    ///
    /// # Returns
    /// The exit code, or `None` when creation failed because `cancel` fired.
    pub async fn run_container(
        &self,
        cancel: &CancellationToken,
        events: &EventSender,
        call_id: &str,
        call: &ContainerCall,
        stdout: OutputSink,
        stderr: OutputSink,
    ) -> Result<Option<i64>, ContainerError> {
        let name = self.container_name(&call.container_id);
        let guard = TeardownGuard {
            daemon: Arc::clone(&self.daemon),
            name: name.clone(),
            stop_timeout: self.stop_timeout,
            armed: true,
        };
        let mut streams = StreamTasks::default();

        let outcome = AssertUnwindSafe(self.drive(cancel, events, call_id, call, &name, stdout, stderr, &mut streams))
            .catch_unwind()
            .await;

        teardown(self.daemon.as_ref(), &name, self.stop_timeout).await;
        guard.disarm();
        streams.drain().await;

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => resume_unwind(panic),
        };
        match (result, streams.error) {
            (Err(error), Some(streaming)) => {
                warn!(container = %name, error = %streaming, "output streaming failed");
                Err(error)
            }
            (Ok(Some(_)), Some(streaming)) => Err(ContainerError::Streaming(streaming)),
            (result, _) => result,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        cancel: &CancellationToken,
        events: &EventSender,
        call_id: &str,
        call: &ContainerCall,
        name: &str,
        stdout: OutputSink,
        stderr: OutputSink,
        streams: &mut StreamTasks,
    ) -> Result<Option<i64>, ContainerError> {
        // A shared network lets containers reach each other by name.
        self.daemon
            .ensure_network(cancel, &self.network_name)
            .await
            .map_err(|source| ContainerError::network_setup(&self.network_name, source))?;

        let (image, image_error) = self.acquire_image(cancel, events, call_id, call).await;

        let port_bindings = parse_port_bindings(&call.ports)?;
        let spec = ContainerSpec {
            name: name.to_string(),
            image,
            cmd: call.cmd.clone(),
            env: call.env_vars.iter().map(|(key, value)| (key.clone(), value.clone())).collect(),
            work_dir: call.work_dir.clone(),
            host_config: HostConfig::construct(&call.dirs, &call.files, &call.sockets, port_bindings),
            network: self.network_name.clone(),
            network_alias: call.name.clone(),
        };

        let container_id = match self.daemon.create_container(cancel, &spec).await {
            Ok(container_id) => container_id,
            Err(error) if cancel.is_cancelled() => {
                info!(container = %name, error = %error, "container creation interrupted by cancellation");
                return Ok(None);
            }
            Err(creation) => {
                return Err(match image_error {
                    Some(image) => ContainerError::ImageAcquisition { image, creation },
                    None => ContainerError::Creation(creation),
                });
            }
        };
        debug!(container = %name, id = %container_id, "container created");

        self.daemon.start_container(cancel, &container_id).await.map_err(ContainerError::Start)?;
        info!(call_id = %call_id, container = %name, "container started");
        publish(
            events,
            call_id,
            EventKind::ContainerStarted {
                container_id: call.container_id.clone(),
            },
        );

        streams.spawn(Arc::clone(&self.daemon), cancel, name, LogStream::Stdout, stdout);
        streams.spawn(Arc::clone(&self.daemon), cancel, name, LogStream::Stderr, stderr);

        let exit_code = self.daemon.wait_container(cancel, name).await.map_err(ContainerError::Wait)?;
        info!(call_id = %call_id, container = %name, exit_code, "container exited");
        publish(
            events,
            call_id,
            EventKind::ContainerExited {
                container_id: call.container_id.clone(),
                exit_code,
            },
        );

        // The container has stopped, so its log streams finish on their own.
        streams.drain().await;
        Ok(Some(exit_code))
    }

    /// Build or pull the image. Failures are returned rather than raised: a
    /// cached image still lets creation succeed offline.
    async fn acquire_image(&self, cancel: &CancellationToken, events: &EventSender, call_id: &str, call: &ContainerCall) -> (String, Option<DaemonError>) {
        match &call.image {
            ContainerImage::Build { source } => {
                let tag = format!("{}:latest", call.container_id.to_lowercase());
                let result = self.daemon.build_image(cancel, &tag, source).await;
                if let Err(error) = &result {
                    warn!(image = %tag, error = %error, "image build failed");
                }
                (tag, result.err())
            }
            ContainerImage::Pull { reference, pull_creds } => {
                let result = self.daemon.pull_image(cancel, events, call_id, reference, pull_creds.as_ref()).await;
                if let Err(error) = &result {
                    warn!(image = %reference, error = %error, "image pull failed; trying a cached copy");
                }
                (reference.clone(), result.err())
            }
        }
    }
}

/// Graceful stop then forced removal, on a token the caller cannot cancel.
async fn teardown(daemon: &dyn ContainerDaemon, name: &str, stop_timeout: Duration) {
    let teardown = CancellationToken::new();
    if let Err(error) = daemon.stop_container(&teardown, name, stop_timeout).await {
        debug!(container = %name, error = %error, "container stop failed");
    }
    if let Err(error) = daemon.remove_container(&teardown, name).await {
        warn!(container = %name, error = %error, "container removal failed");
    }
}

/// Tears the container down in the background if a run is dropped before its
/// own teardown completed.
struct TeardownGuard {
    daemon: Arc<dyn ContainerDaemon>,
    name: String,
    stop_timeout: Duration,
    armed: bool,
}

impl TeardownGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(container = %name, "container run abandoned; tearing down in the background");
                let daemon = Arc::clone(&self.daemon);
                let stop_timeout = self.stop_timeout;
                runtime.spawn(async move { teardown(daemon.as_ref(), &name, stop_timeout).await });
            }
            Err(_) => warn!(container = %name, "container run abandoned outside a runtime; container not removed"),
        }
    }
}

/// The two output-copying tasks of a running container.
#[derive(Default)]
struct StreamTasks {
    handles: Vec<JoinHandle<Result<(), DaemonError>>>,
    error: Option<DaemonError>,
}

impl StreamTasks {
    fn spawn(&mut self, daemon: Arc<dyn ContainerDaemon>, cancel: &CancellationToken, name: &str, stream: LogStream, mut sink: OutputSink) {
        let cancel = cancel.clone();
        let name = name.to_string();
        self.handles.push(tokio::spawn(async move {
            let result = daemon.stream_logs(&cancel, &name, stream, &mut sink).await;
            if let Err(error) = sink.shutdown().await {
                debug!(container = %name, ?stream, error = %error, "failed to close output sink");
            }
            result
        }));
    }

    /// Wait for every task, keeping the first failure.
    async fn drain(&mut self) {
        for handle in self.handles.drain(..) {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(DaemonError::Io(format!("log streaming task failed: {join_error}"))),
            };
            if let Err(error) = result {
                self.error.get_or_insert(error);
            }
        }
    }
}
