//! The container-call model consumed by the container runtime orchestrator.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::data::Creds;

/// Where a container's image comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ContainerImage {
    /// Pull an image by reference, optionally authenticating against its registry.
    Pull {
        reference: String,
        #[serde(default)]
        pull_creds: Option<Creds>,
    },
    /// Build an image from a local source directory.
    Build { source: PathBuf },
}

/// One fully interpreted container step, ready to run.
///
/// Map keys are container-side and values host-side: `dirs["/src"] = "/home/me/src"`
/// mounts the host directory at `/src` inside the container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerCall {
    /// Unique identifier of this invocation; the container name is derived from it.
    pub container_id: String,
    pub image: ContainerImage,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    #[serde(default)]
    pub dirs: BTreeMap<String, String>,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub sockets: BTreeMap<String, String>,
    /// Container port (`80`, `80/udp`, `6060-6061/tcp`) to host port (`8080`, `7060-7061`).
    #[serde(default)]
    pub ports: BTreeMap<String, String>,
    #[serde(default)]
    pub work_dir: Option<String>,
    /// Alias other containers on the shared network can resolve this one by.
    #[serde(default)]
    pub name: Option<String>,
}

impl ContainerCall {
    /// A call with only an identifier and image; everything else empty.
    pub fn new(container_id: impl Into<String>, image: ContainerImage) -> Self {
        Self {
            container_id: container_id.into(),
            image,
            cmd: Vec::new(),
            env_vars: BTreeMap::new(),
            dirs: BTreeMap::new(),
            files: BTreeMap::new(),
            sockets: BTreeMap::new(),
            ports: BTreeMap::new(),
            work_dir: None,
            name: None,
        }
    }
}
