//! Package content listings, peer-node requests, and credentials.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single entry in a package's recursive content listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirEntry {
    /// Path relative to the package root, always starting with `/`.
    pub path: String,
    /// Size in bytes; zero for directories.
    pub size: u64,
    /// Unix permission and type bits.
    pub mode: u32,
}

/// Request for a recursive listing of a package's content.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListDescendantsRequest {
    pub pkg_ref: String,
}

/// Request for a single file within a package.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetDataRequest {
    pub pkg_ref: String,
    pub content_path: String,
}

/// Username/password pair used to authenticate against remote sources.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Creds {
    pub username: String,
    pub password: String,
}

impl Creds {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Keep passwords out of logs and panic messages.
impl fmt::Debug for Creds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Creds")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
