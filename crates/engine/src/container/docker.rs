//! [`ContainerDaemon`] backed by the `docker` command-line client.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use opflow_types::{Creds, EventKind, EventSender, publish};
use opflow_util::redact_sensitive;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ContainerDaemon, ContainerSpec, DaemonError, LogStream, OutputSink};

const DEFAULT_REGISTRY: &str = "docker.io";

/// Talks to the container engine by running `docker` subcommands.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self { program: "docker".into() }
    }
}

impl DockerCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Run `command` to completion and return its trimmed stdout.
    async fn output(&self, cancel: &CancellationToken, mut command: Command, stdin: Option<&str>) -> Result<String, DaemonError> {
        let description = describe(&command);
        if stdin.is_some() {
            command.stdin(Stdio::piped());
        }
        let mut child = command.spawn().map_err(|error| DaemonError::Spawn {
            program: self.program.clone(),
            message: error.to_string(),
        })?;

        let run = async move {
            if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
                pipe.write_all(input.as_bytes()).await.map_err(|error| DaemonError::io(&error))?;
            }
            child.wait_with_output().await.map_err(|error| DaemonError::io(&error))
        };
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DaemonError::Cancelled),
            output = run => output?,
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(DaemonError::Command {
                command: description,
                status: output.status.to_string(),
                stderr: redact_sensitive(String::from_utf8_lossy(&output.stderr).trim()),
            })
        }
    }

    async fn login(&self, cancel: &CancellationToken, reference: &str, creds: &Creds) -> Result<(), DaemonError> {
        let registry = registry_host(reference);
        let command = self.command(["login", "--username", creds.username.as_str(), "--password-stdin", registry]);
        self.output(cancel, command, Some(&creds.password)).await?;
        debug!(registry = %registry, "registry login succeeded");
        Ok(())
    }
}

#[async_trait]
impl ContainerDaemon for DockerCli {
    async fn ensure_network(&self, cancel: &CancellationToken, name: &str) -> Result<(), DaemonError> {
        if self.output(cancel, self.command(["network", "inspect", name]), None).await.is_ok() {
            return Ok(());
        }
        match self.output(cancel, self.command(["network", "create", name]), None).await {
            Ok(_) => {
                info!(network = %name, "container network created");
                Ok(())
            }
            // Lost a creation race with another invocation.
            Err(DaemonError::Command { stderr, .. }) if stderr.contains("already exists") => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn pull_image(
        &self,
        cancel: &CancellationToken,
        events: &EventSender,
        call_id: &str,
        reference: &str,
        creds: Option<&Creds>,
    ) -> Result<(), DaemonError> {
        if let Some(creds) = creds {
            self.login(cancel, reference, creds).await?;
        }

        let description = format!("{} pull {reference}", self.program);
        let mut child = self.command(["pull", reference]).spawn().map_err(|error| DaemonError::Spawn {
            program: self.program.clone(),
            message: error.to_string(),
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DaemonError::Io("docker pull stdout unavailable".into()))?;

        let pull = async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await.map_err(|error| DaemonError::io(&error))? {
                publish(
                    events,
                    call_id,
                    EventKind::ImagePullProgress {
                        image_ref: reference.to_string(),
                        message: line,
                    },
                );
            }
            child.wait_with_output().await.map_err(|error| DaemonError::io(&error))
        };
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DaemonError::Cancelled),
            output = pull => output?,
        };

        if output.status.success() {
            Ok(())
        } else {
            Err(DaemonError::Command {
                command: description,
                status: output.status.to_string(),
                stderr: redact_sensitive(String::from_utf8_lossy(&output.stderr).trim()),
            })
        }
    }

    async fn build_image(&self, cancel: &CancellationToken, tag: &str, source: &Path) -> Result<(), DaemonError> {
        let mut command = self.command(["build", "--quiet", "--tag", tag]);
        command.arg(source);
        self.output(cancel, command, None).await.map(drop)
    }

    async fn create_container(&self, cancel: &CancellationToken, spec: &ContainerSpec) -> Result<String, DaemonError> {
        let mut command = self.command(create_args(spec));
        // Values travel through the client's environment, not argv.
        command.envs(spec.env.iter().map(|(key, value)| (key, value)));
        let container_id = self.output(cancel, command, None).await?;
        if container_id.is_empty() {
            return Err(DaemonError::Protocol("docker create printed no container id".into()));
        }
        Ok(container_id)
    }

    async fn start_container(&self, cancel: &CancellationToken, container_id: &str) -> Result<(), DaemonError> {
        self.output(cancel, self.command(["start", container_id]), None).await.map(drop)
    }

    async fn stream_logs(&self, cancel: &CancellationToken, name: &str, stream: LogStream, sink: &mut OutputSink) -> Result<(), DaemonError> {
        let mut command = self.command(["logs", "--follow", name]);
        match stream {
            LogStream::Stdout => command.stderr(Stdio::null()),
            LogStream::Stderr => command.stdout(Stdio::null()),
        };
        let mut child = command.spawn().map_err(|error| DaemonError::Spawn {
            program: self.program.clone(),
            message: error.to_string(),
        })?;

        let copy = async {
            let copied = match stream {
                LogStream::Stdout => {
                    let mut source = child.stdout.take().ok_or_else(|| DaemonError::Io("docker logs stdout unavailable".into()))?;
                    tokio::io::copy(&mut source, &mut *sink).await
                }
                LogStream::Stderr => {
                    let mut source = child.stderr.take().ok_or_else(|| DaemonError::Io("docker logs stderr unavailable".into()))?;
                    tokio::io::copy(&mut source, &mut *sink).await
                }
            };
            copied.map_err(|error| DaemonError::io(&error))?;
            sink.flush().await.map_err(|error| DaemonError::io(&error))
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DaemonError::Cancelled),
            result = copy => result,
        }
    }

    async fn wait_container(&self, cancel: &CancellationToken, name: &str) -> Result<i64, DaemonError> {
        let output = self.output(cancel, self.command(["wait", name]), None).await?;
        output
            .lines()
            .last()
            .and_then(|line| line.trim().parse::<i64>().ok())
            .ok_or_else(|| DaemonError::Protocol(format!("docker wait printed '{output}'")))
    }

    async fn stop_container(&self, cancel: &CancellationToken, name: &str, timeout: Duration) -> Result<(), DaemonError> {
        let seconds = timeout.as_secs().to_string();
        self.output(cancel, self.command(["stop", "--time", seconds.as_str(), name]), None).await.map(drop)
    }

    async fn remove_container(&self, cancel: &CancellationToken, name: &str) -> Result<(), DaemonError> {
        self.output(cancel, self.command(["rm", "--force", "--volumes", name]), None).await.map(drop)
    }
}

/// Arguments for `docker create`. Environment values are left to the caller's env.
fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["create".to_string(), "--name".to_string(), spec.name.clone(), "--network".to_string(), spec.network.clone()];
    if let Some(alias) = &spec.network_alias {
        args.extend(["--network-alias".to_string(), alias.clone()]);
    }
    if spec.host_config.privileged {
        args.push("--privileged".to_string());
    }
    for bind in &spec.host_config.binds {
        args.extend(["--volume".to_string(), bind.clone()]);
    }
    for binding in &spec.host_config.port_bindings {
        args.extend(["--publish".to_string(), binding.publish_arg()]);
    }
    for (key, _) in &spec.env {
        args.extend(["--env".to_string(), key.clone()]);
    }
    if let Some(work_dir) = &spec.work_dir {
        args.extend(["--workdir".to_string(), work_dir.clone()]);
    }
    args.push(spec.image.clone());
    args.extend(spec.cmd.iter().cloned());
    args
}

/// Registry host of an image reference, `docker.io` when it names none.
fn registry_host(reference: &str) -> &str {
    match reference.split_once('/') {
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => first,
        _ => DEFAULT_REGISTRY,
    }
}

fn describe(command: &Command) -> String {
    let command = command.as_std();
    let mut description = command.get_program().to_string_lossy().into_owned();
    for arg in command.get_args() {
        description.push(' ');
        description.push_str(&arg.to_string_lossy());
    }
    description
}
