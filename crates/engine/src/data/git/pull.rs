//! Cache-miss path of the git provider: clone into a staging directory, strip
//! repository metadata, then move the result into place.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use opflow_types::Creds;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::remote::{CloneRequest, RemoteError};
use super::{GitInner, GitTransport};
use crate::data::{DataError, PackageRef};

/// Repository metadata directory removed from every cached package.
const METADATA_DIR: &str = ".git";

impl GitInner {
    /// Ensure `package_ref` is present in the cache and return its directory.
    ///
    /// A directory already at the target location is a complete earlier pull and
    /// makes this a no-op. Failed or cancelled clones leave nothing behind.
    pub(super) async fn pull(&self, cancel: &CancellationToken, package_ref: &PackageRef) -> Result<PathBuf, DataError> {
        let destination = package_ref.to_path(&self.base_path);
        if already_cloned(&destination).await? {
            debug!(package = %package_ref, "package already cloned");
            return Ok(destination);
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await.map_err(|error| DataError::io(parent, &error))?;
        }
        let staging = staging_path(&destination);

        if let Err(error) = self.clone_into(cancel, package_ref, &staging).await {
            if error.is_cancelled() {
                info!(package = %package_ref, "cleaning up partially downloaded package");
            }
            remove_best_effort(&staging).await;
            return Err(error);
        }

        if let Err(error) = strip_metadata(&staging).await {
            remove_best_effort(&staging).await;
            return Err(error);
        }

        match fs::rename(&staging, &destination).await {
            Ok(()) => Ok(destination),
            Err(error) => {
                remove_best_effort(&staging).await;
                // Another process sharing the cache may have won the race.
                if already_cloned(&destination).await? {
                    Ok(destination)
                } else {
                    Err(DataError::io(&destination, &error))
                }
            }
        }
    }

    async fn clone_into(&self, cancel: &CancellationToken, package_ref: &PackageRef, staging: &Path) -> Result<(), DataError> {
        if let Some(creds) = &self.pull_creds {
            return self.clone_once(cancel, package_ref, GitTransport::Https, Some(creds), staging).await;
        }

        let result = self.clone_once(cancel, package_ref, GitTransport::SshAgent, None, staging).await;
        let Some(helper) = &self.credential_helper else {
            return result;
        };
        match result {
            Err(DataError::Authentication { .. }) => {
                let url = GitTransport::Https.url_for(&package_ref.name);
                info!(package = %package_ref, "ssh authentication failed; retrying over https");
                let creds = helper.fill(cancel, &url).await?;
                remove_best_effort(staging).await;
                self.clone_once(cancel, package_ref, GitTransport::Https, Some(&creds), staging).await
            }
            other => other,
        }
    }

    async fn clone_once(
        &self,
        cancel: &CancellationToken,
        package_ref: &PackageRef,
        transport: GitTransport,
        creds: Option<&Creds>,
        staging: &Path,
    ) -> Result<(), DataError> {
        let url = transport.url_for(&package_ref.name);
        let request = CloneRequest {
            url: &url,
            version: &package_ref.version,
            destination: staging,
            creds,
        };
        self.remote
            .clone_ref(cancel, request)
            .await
            .map_err(|error| map_remote_error(error, package_ref))
    }
}

fn map_remote_error(error: RemoteError, package_ref: &PackageRef) -> DataError {
    match error {
        RemoteError::AuthenticationRequired => DataError::Authentication {
            reference: package_ref.name.clone(),
        },
        RemoteError::AuthorizationFailed => DataError::Authorization {
            reference: package_ref.name.clone(),
        },
        RemoteError::NoMatchingRef => DataError::VersionNotFound {
            reference: package_ref.name.clone(),
            version: package_ref.version.clone(),
        },
        RemoteError::Cancelled => DataError::cancelled(package_ref.to_string()),
        RemoteError::Other(message) => DataError::fetch(package_ref.to_string(), message),
    }
}

async fn already_cloned(destination: &Path) -> Result<bool, DataError> {
    match fs::metadata(destination).await {
        Ok(metadata) if metadata.is_dir() => {
            strip_metadata(destination).await?;
            Ok(true)
        }
        Ok(_) => Ok(false),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(DataError::io(destination, &error)),
    }
}

async fn strip_metadata(directory: &Path) -> Result<(), DataError> {
    let metadata_dir = directory.join(METADATA_DIR);
    match fs::remove_dir_all(&metadata_dir).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(DataError::io(&metadata_dir, &error)),
    }
}

fn staging_path(destination: &Path) -> PathBuf {
    let file_name = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_nanos()).unwrap_or_default();
    destination.with_file_name(format!("{file_name}.partial-{}-{nanos}", std::process::id()))
}

async fn remove_best_effort(path: &Path) {
    match fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => warn!(path = %path.display(), error = %error, "failed to clean up partial download"),
    }
}
