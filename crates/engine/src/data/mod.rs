//! Package resolution: handles, providers, and the resolver that chains them.
//!
//! Modules:
//! - `reference`: `name#version` parsing
//! - `handle`: path-backed data handle
//! - `fs`: filesystem provider (workspace and cache lookup)
//! - `git`: git provider with a read-through cache and fetch deduplication
//! - `node`: peer-node provider and node-backed handle
//! - `resolver`: ordered provider chain

mod error;
mod fs;
mod git;
mod handle;
mod node;
mod reference;
mod resolver;

pub use error::DataError;
pub use fs::FsProvider;
pub use git::{CloneRequest, GitCli, GitProvider, GitRemote, GitTransport, RemoteError, classify_clone_failure};
pub use handle::PathHandle;
pub use node::{Node, NodeHandle, NodeProvider};
pub use reference::{PackageRef, ReferenceError, VERSION_SEPARATOR};
pub use resolver::DataResolver;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use opflow_types::{DirEntry, EventSender};
use tokio::io::{AsyncRead, AsyncSeek};
use tokio_util::sync::CancellationToken;

/// Readable, seekable package content. Dropping it closes the underlying source.
pub trait ContentReader: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T> ContentReader for T where T: AsyncRead + AsyncSeek + Send + Unpin {}

/// Owned content stream returned by [`DataHandle::get_content`].
pub type ContentStream = Box<dyn ContentReader>;

/// Capability for reading resolved package content.
#[async_trait]
pub trait DataHandle: Send + Sync + fmt::Debug {
    /// Local directory holding the package, when it lives on this machine.
    fn path(&self) -> Option<&Path>;

    /// The reference this handle was resolved from.
    fn reference(&self) -> &str;

    /// Open a single file, addressed relative to the package root.
    async fn get_content(
        &self,
        cancel: &CancellationToken,
        events: &EventSender,
        call_id: &str,
        content_path: &str,
    ) -> Result<ContentStream, DataError>;

    /// Recursively list the package's content, ordered by path.
    async fn list_descendants(&self, cancel: &CancellationToken, events: &EventSender, call_id: &str) -> Result<Vec<DirEntry>, DataError>;
}

/// A strategy for turning a package reference into a [`DataHandle`].
///
/// `Ok(None)` means "not here" and lets the resolver try the next provider.
/// Implementations are shared across concurrent resolutions.
#[async_trait]
pub trait Provider: Send + Sync {
    fn label(&self) -> &str;

    async fn try_resolve(
        &self,
        cancel: &CancellationToken,
        events: &EventSender,
        call_id: &str,
        data_ref: &str,
    ) -> Result<Option<Arc<dyn DataHandle>>, DataError>;

    /// Whether the resolver should treat this provider's errors as misses.
    ///
    /// True for local lookups, so broken local state never blocks a remote source.
    fn errors_are_misses(&self) -> bool {
        false
    }
}
