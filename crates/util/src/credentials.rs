//! Bridge to an external git credential helper.
//!
//! The helper is spoken to over the line-oriented `key=value` protocol used by
//! `git credential fill`: a `url=<url>` line followed by a blank line on stdin,
//! and `key=value` lines on stdout until a blank line or end of stream.
//!
//! This requires a helper configuration that does not need user interaction;
//! prompting is disabled for the child process.

use std::process::Stdio;

use opflow_types::Creds;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::redact_sensitive;

/// Errors produced while exchanging credentials with a helper process.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("failed to start credential helper '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("credential helper I/O error: {message}")]
    Io { message: String },

    #[error("failed to parse credential helper line: '{line}'")]
    Protocol { line: String },

    #[error("credential helper did not return a {field}")]
    Missing { field: &'static str },

    #[error("credential helper exited with {status}: {stderr}")]
    HelperFailed { status: String, stderr: String },

    #[error("credential exchange cancelled")]
    Cancelled,
}

impl CredentialError {
    fn io(error: std::io::Error) -> Self {
        Self::Io {
            message: error.to_string(),
        }
    }
}

/// External program answering credential requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialHelper {
    program: String,
    args: Vec<String>,
}

impl Default for CredentialHelper {
    /// `git credential fill`, which consults whatever helpers git is configured with.
    fn default() -> Self {
        Self::new("git", ["credential", "fill"])
    }
}

impl CredentialHelper {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Ask the helper for credentials for `url`.
    ///
    /// # Errors
    /// - `Protocol` when a response line has no `=` separator.
    /// - `HelperFailed` when the helper exits unsuccessfully.
    /// - `Missing` when the response lacks a username or password.
    /// - `Cancelled` when `cancel` fires first; the helper is killed.
    pub async fn fill(&self, cancel: &CancellationToken, url: &str) -> Result<Creds, CredentialError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| CredentialError::Spawn {
                program: self.program.clone(),
                message: error.to_string(),
            })?;
        debug!(program = %self.program, url = %redact_sensitive(url), "credential helper started");

        let request = format!("url={url}\n\n");
        let exchange = async move {
            let mut stdin = child.stdin.take().ok_or_else(|| CredentialError::Io {
                message: "helper stdin unavailable".into(),
            })?;
            stdin.write_all(request.as_bytes()).await.map_err(CredentialError::io)?;
            drop(stdin);

            let stdout = child.stdout.take().ok_or_else(|| CredentialError::Io {
                message: "helper stdout unavailable".into(),
            })?;
            let mut stderr = child.stderr.take().ok_or_else(|| CredentialError::Io {
                message: "helper stderr unavailable".into(),
            })?;

            // Both pipes are read until the helper closes them so it never
            // blocks on a full pipe.
            let reply = async {
                let mut reader = BufReader::new(stdout);
                let response = read_response(&mut reader).await;
                let drained = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                let response = response?;
                drained.map_err(CredentialError::io)?;
                Ok::<_, CredentialError>(response)
            };
            let diagnostics = async {
                let mut captured = Vec::new();
                stderr.read_to_end(&mut captured).await.map(|_| captured)
            };
            let (response, diagnostics) = tokio::join!(reply, diagnostics);

            let status = child.wait().await.map_err(CredentialError::io)?;
            if !status.success() {
                let captured = diagnostics.unwrap_or_default();
                return Err(CredentialError::HelperFailed {
                    status: status.to_string(),
                    stderr: redact_sensitive(String::from_utf8_lossy(&captured).trim()),
                });
            }
            response?.into_creds()
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CredentialError::Cancelled),
            result = exchange => result,
        }
    }
}

/// Ask the default git credential helper for credentials for `url`.
pub async fn get_credentials(cancel: &CancellationToken, url: &str) -> Result<Creds, CredentialError> {
    CredentialHelper::default().fill(cancel, url).await
}

#[derive(Debug, Default)]
struct HelperResponse {
    username: Option<String>,
    password: Option<String>,
}

impl HelperResponse {
    fn into_creds(self) -> Result<Creds, CredentialError> {
        let username = self
            .username
            .filter(|value| !value.is_empty())
            .ok_or(CredentialError::Missing { field: "username" })?;
        let password = self
            .password
            .filter(|value| !value.is_empty())
            .ok_or(CredentialError::Missing { field: "password" })?;
        Ok(Creds::new(username, password))
    }
}

async fn read_response<R>(reader: R) -> Result<HelperResponse, CredentialError>
where
    R: AsyncBufRead + Unpin,
{
    let mut response = HelperResponse::default();
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.map_err(CredentialError::io)? {
        if line.is_empty() {
            break;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(CredentialError::Protocol {
                line: redact_sensitive(&line),
            });
        };
        match key {
            "username" => response.username = Some(value.to_string()),
            "password" => response.password = Some(value.to_string()),
            // protocol, host, path, quit, ... are not needed here
            _ => {}
        }
    }
    Ok(response)
}
