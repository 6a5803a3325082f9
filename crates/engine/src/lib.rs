//! # Opflow Engine
//!
//! The Opflow Engine locates op packages and runs containerized op steps.
//! It resolves a package reference through an ordered chain of providers and,
//! for container steps, drives a single container from network setup to teardown.
//!
//! ## Key Features
//!
//! - **Data Resolution**: Filesystem, git and node providers behind one `Provider` trait
//! - **Git Cache**: Shallow tag clones cached under `<base>/<name>#<version>/`, one fetch per reference
//! - **Auth Classification**: Authentication and authorization failures surface as distinct errors
//! - **Container Runtime**: Network, image, create, start, stream, wait, and guaranteed cleanup
//!
//! ## Usage
//!
//! ```rust
//! use opflow_engine::DataResolver;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cache_dir = tempfile::tempdir()?;
//! let package_dir = tempfile::tempdir()?;
//! std::fs::write(package_dir.path().join("op.yml"), "name: hello\n")?;
//!
//! let resolver = DataResolver::for_node_core(cache_dir.path());
//! let (events, _receiver) = tokio::sync::mpsc::unbounded_channel();
//! let data_ref = package_dir.path().to_string_lossy().into_owned();
//!
//! let handle = resolver.resolve(&CancellationToken::new(), &events, "call-1", &data_ref).await?;
//! let entries = handle.list_descendants(&CancellationToken::new(), &events, "call-1").await?;
//! assert_eq!(entries[0].path, "/op.yml");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`data`**: References, handles, providers, and the resolver
//! - **`container`**: The container runtime and its daemon abstraction
//! - **`local_node`**: A node that serves packages from this machine

pub mod container;
pub mod data;
pub mod local_node;

// Re-export commonly used types for convenience
pub use container::{ContainerDaemon, ContainerError, ContainerRuntime, DaemonError, DockerCli, OutputSink};
pub use data::{
    ContentStream, DataError, DataHandle, DataResolver, FsProvider, GitProvider, Node, NodeHandle, NodeProvider, PackageRef, PathHandle, Provider,
};
pub use local_node::LocalNode;
