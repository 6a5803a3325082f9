//! Git transport: the clone capability and its `git` CLI implementation.

use std::env;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use opflow_types::Creds;
use opflow_util::redact_sensitive;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Environment variables the inline credential helper reads from.
const USERNAME_ENV: &str = "OPFLOW_GIT_USERNAME";
const PASSWORD_ENV: &str = "OPFLOW_GIT_PASSWORD";

/// Credential helper that answers from the environment so secrets never reach argv.
const INLINE_CREDENTIAL_HELPER: &str =
    "credential.helper=!f() { echo \"username=${OPFLOW_GIT_USERNAME}\"; echo \"password=${OPFLOW_GIT_PASSWORD}\"; }; f";

/// A shallow, single-ref clone request.
#[derive(Debug, Clone, Copy)]
pub struct CloneRequest<'a> {
    pub url: &'a str,
    /// Tag (or branch) to check out.
    pub version: &'a str,
    pub destination: &'a Path,
    pub creds: Option<&'a Creds>,
}

/// Why a clone failed, as far as the caller needs to know.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("authentication required")]
    AuthenticationRequired,
    #[error("authorization failed")]
    AuthorizationFailed,
    #[error("no matching ref")]
    NoMatchingRef,
    #[error("clone cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

/// Capability to clone a single ref of a remote repository.
#[async_trait]
pub trait GitRemote: Send + Sync {
    async fn clone_ref(&self, cancel: &CancellationToken, request: CloneRequest<'_>) -> Result<(), RemoteError>;
}

/// [`GitRemote`] backed by the `git` executable.
///
/// SSH clones authenticate through the running SSH agent; prompting is disabled
/// so a missing identity fails fast instead of hanging.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self { program: "git".into() }
    }
}

impl GitCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    fn build_command(&self, request: &CloneRequest<'_>) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(creds) = request.creds {
            command
                .args(["-c", "credential.helper=", "-c", INLINE_CREDENTIAL_HELPER])
                .env(USERNAME_ENV, &creds.username)
                .env(PASSWORD_ENV, &creds.password);
        }
        command
            .args(["clone", "--quiet", "--depth", "1", "--single-branch", "--branch"])
            .arg(request.version)
            .arg("--")
            .arg(request.url)
            .arg(request.destination)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if env::var_os("GIT_SSH_COMMAND").is_none() {
            command.env("GIT_SSH_COMMAND", "ssh -o BatchMode=yes");
        }
        command
    }
}

#[async_trait]
impl GitRemote for GitCli {
    async fn clone_ref(&self, cancel: &CancellationToken, request: CloneRequest<'_>) -> Result<(), RemoteError> {
        debug!(
            url = %redact_sensitive(request.url),
            version = %request.version,
            destination = %request.destination.display(),
            "git clone started"
        );
        let child = self
            .build_command(&request)
            .spawn()
            .map_err(|error| RemoteError::Other(format!("failed to run {}: {error}", self.program)))?;

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
            output = child.wait_with_output() => output.map_err(|error| RemoteError::Other(error.to_string()))?,
        };

        if output.status.success() {
            return Ok(());
        }
        Err(classify_clone_failure(&String::from_utf8_lossy(&output.stderr)))
    }
}

/// Map `git clone` diagnostics onto the failure kinds callers act on.
pub fn classify_clone_failure(stderr: &str) -> RemoteError {
    let lowered = stderr.to_ascii_lowercase();

    if (lowered.contains("remote branch") && lowered.contains("not found")) || lowered.contains("could not find remote branch") {
        return RemoteError::NoMatchingRef;
    }

    const AUTHENTICATION_MARKERS: [&str; 6] = [
        "authentication failed",
        "could not read username",
        "could not read password",
        "terminal prompts disabled",
        "permission denied (publickey",
        "returned error: 401",
    ];
    if AUTHENTICATION_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return RemoteError::AuthenticationRequired;
    }

    const AUTHORIZATION_MARKERS: [&str; 4] = ["returned error: 403", "access denied", "not authorized", "permission to"];
    if AUTHORIZATION_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return RemoteError::AuthorizationFailed;
    }

    RemoteError::Other(redact_sensitive(stderr.trim()))
}
