//! Error types for package resolution.

use std::path::PathBuf;

use opflow_util::CredentialError;
use thiserror::Error;

use super::reference::ReferenceError;

/// Errors surfaced by providers, handles, and the resolver.
///
/// `Clone` so a single deduplicated fetch can hand the same outcome to every waiter.
#[derive(Debug, Clone, Error)]
pub enum DataError {
    #[error("invalid git ref: {source}")]
    InvalidReference {
        reference: String,
        #[source]
        source: ReferenceError,
    },

    #[error("unable to resolve '{reference}'{}", format_attempts(.attempts))]
    NotFound { reference: String, attempts: Vec<String> },

    #[error("authentication failed for '{reference}'")]
    Authentication { reference: String },

    #[error("authorization failed for '{reference}'")]
    Authorization { reference: String },

    #[error("version '{version}' not found")]
    VersionNotFound { reference: String, version: String },

    #[error("failed to fetch '{reference}': {message}")]
    Fetch { reference: String, message: String },

    #[error("resolution of '{reference}' was cancelled")]
    Cancelled { reference: String },

    #[error("I/O error at {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    #[error("{message}")]
    InvalidRequest { message: String },

    #[error("credential lookup failed: {0}")]
    Credentials(#[from] CredentialError),
}

impl DataError {
    pub fn invalid_reference(reference: impl Into<String>, source: ReferenceError) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            source,
        }
    }

    pub fn not_found(reference: impl Into<String>, attempts: Vec<String>) -> Self {
        Self::NotFound {
            reference: reference.into(),
            attempts,
        }
    }

    pub fn fetch(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            reference: reference.into(),
            message: message.into(),
        }
    }

    pub fn cancelled(reference: impl Into<String>) -> Self {
        Self::Cancelled {
            reference: reference.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: error.to_string(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest { message: message.into() }
    }

    /// Whether the remote rejected who we are or what we may access.
    ///
    /// Callers use this to decide whether asking for different credentials can help.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::Authorization { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::Credentials(CredentialError::Cancelled))
    }
}

fn format_attempts(attempts: &[String]) -> String {
    if attempts.is_empty() {
        String::new()
    } else {
        format!(" ({})", attempts.join("; "))
    }
}
