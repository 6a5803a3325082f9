//! Node provider: packages served by a peer node's listing/read API.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use opflow_types::{DirEntry, EventSender, GetDataRequest, ListDescendantsRequest};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ContentStream, DataError, DataHandle, Provider};

/// The read surface of a node, local or remote.
#[async_trait]
pub trait Node: Send + Sync {
    async fn list_descendants(
        &self,
        cancel: &CancellationToken,
        events: &EventSender,
        call_id: &str,
        request: ListDescendantsRequest,
    ) -> Result<Vec<DirEntry>, DataError>;

    async fn get_data(&self, cancel: &CancellationToken, events: &EventSender, call_id: &str, request: GetDataRequest) -> Result<ContentStream, DataError>;
}

/// Handle whose content lives behind a [`Node`]; it has no local path.
#[derive(Clone)]
pub struct NodeHandle {
    node: Arc<dyn Node>,
    data_ref: String,
}

impl NodeHandle {
    pub fn new(node: Arc<dyn Node>, data_ref: impl Into<String>) -> Self {
        Self {
            node,
            data_ref: data_ref.into(),
        }
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle").field("data_ref", &self.data_ref).finish_non_exhaustive()
    }
}

#[async_trait]
impl DataHandle for NodeHandle {
    fn path(&self) -> Option<&Path> {
        None
    }

    fn reference(&self) -> &str {
        &self.data_ref
    }

    async fn get_content(
        &self,
        cancel: &CancellationToken,
        events: &EventSender,
        call_id: &str,
        content_path: &str,
    ) -> Result<ContentStream, DataError> {
        let request = GetDataRequest {
            pkg_ref: self.data_ref.clone(),
            content_path: content_path.to_string(),
        };
        self.node.get_data(cancel, events, call_id, request).await
    }

    async fn list_descendants(&self, cancel: &CancellationToken, events: &EventSender, call_id: &str) -> Result<Vec<DirEntry>, DataError> {
        let request = ListDescendantsRequest {
            pkg_ref: self.data_ref.clone(),
        };
        self.node.list_descendants(cancel, events, call_id, request).await
    }
}

/// Resolves a reference when the node can list it.
#[derive(Clone)]
pub struct NodeProvider {
    node: Arc<dyn Node>,
}

impl NodeProvider {
    pub fn new(node: Arc<dyn Node>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl Provider for NodeProvider {
    fn label(&self) -> &str {
        "node"
    }

    async fn try_resolve(
        &self,
        cancel: &CancellationToken,
        events: &EventSender,
        call_id: &str,
        data_ref: &str,
    ) -> Result<Option<Arc<dyn DataHandle>>, DataError> {
        let request = ListDescendantsRequest {
            pkg_ref: data_ref.to_string(),
        };
        // Any successful listing, even an empty one, proves the node can serve it.
        let entries = self.node.list_descendants(cancel, events, call_id, request).await?;
        debug!(data_ref = %data_ref, entries = entries.len(), "node listed package");
        Ok(Some(Arc::new(NodeHandle::new(Arc::clone(&self.node), data_ref))))
    }
}
