//! Container runtime: runs one container call end to end.
//!
//! The lifecycle is strictly ordered: network, image, create, start, then
//! output streaming concurrently with the exit wait. Teardown (stop, then
//! forced removal with volumes) runs on every path, including cancellation and
//! panics, with its own uncancelled token.

mod daemon;
mod docker;
mod error;
mod host_config;
mod run;

pub use daemon::{ContainerDaemon, ContainerSpec, LogStream, OutputSink};
pub use docker::DockerCli;
pub use error::{ContainerError, DaemonError};
pub use host_config::{HostConfig, PortBinding, parse_port_bindings};
pub use run::ContainerRuntime;
