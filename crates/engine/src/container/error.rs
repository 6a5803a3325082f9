//! Errors surfaced by the container runtime.

use thiserror::Error;

/// A failed call to the container daemon.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DaemonError {
    #[error("failed to run {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("`{command}` failed ({status}): {stderr}")]
    Command { command: String, status: String, stderr: String },

    #[error("{0}")]
    Io(String),

    #[error("unexpected daemon output: {0}")]
    Protocol(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl DaemonError {
    pub fn io(error: &std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

/// Errors from one container invocation, one variant per lifecycle stage.
#[derive(Debug, Clone, Error)]
pub enum ContainerError {
    #[error("failed to ensure network '{network}': {source}")]
    NetworkSetup {
        network: String,
        #[source]
        source: DaemonError,
    },

    /// Image acquisition failed and creation then failed too.
    #[error("{image}, {creation}")]
    ImageAcquisition { image: DaemonError, creation: DaemonError },

    #[error("invalid port binding '{binding}': {reason}")]
    InvalidPortBinding { binding: String, reason: String },

    #[error("failed to create container: {0}")]
    Creation(#[source] DaemonError),

    #[error("failed to start container: {0}")]
    Start(#[source] DaemonError),

    #[error("failed to stream container output: {0}")]
    Streaming(#[source] DaemonError),

    #[error("error waiting on container: {0}")]
    Wait(#[source] DaemonError),
}

impl ContainerError {
    pub fn network_setup(network: impl Into<String>, source: DaemonError) -> Self {
        Self::NetworkSetup {
            network: network.into(),
            source,
        }
    }

    pub fn invalid_port_binding(binding: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPortBinding {
            binding: binding.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_error_is_combined_with_creation_error() {
        let err = ContainerError::ImageAcquisition {
            image: DaemonError::Io("pull access denied".into()),
            creation: DaemonError::Io("No such image: alpine:3".into()),
        };
        assert_eq!(err.to_string(), "pull access denied, No such image: alpine:3");
    }

    #[test]
    fn test_wait_error_message() {
        let err = ContainerError::Wait(DaemonError::Cancelled);
        assert_eq!(err.to_string(), "error waiting on container: operation cancelled");
    }
}
