//! Engine settings for the opflow data and container layers.
//!
//! Settings come from three layers, later layers winning: built-in defaults, an
//! optional JSON file (`~/.config/opflow/settings.json` on most platforms, or the
//! path in `OPFLOW_SETTINGS_PATH`), and the `OPFLOW_DATA_DIR` environment
//! variable. A missing settings file is not an error.

use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use dirs_next::{config_dir, data_dir, home_dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Environment variable allowing callers to override the settings file path.
pub const SETTINGS_PATH_ENV: &str = "OPFLOW_SETTINGS_PATH";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "OPFLOW_DATA_DIR";

/// Default filename for the JSON payload.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Error surfaced when reading settings fails.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// I/O failure other than a missing file.
    #[error("settings I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The file exists but is not valid settings JSON.
    #[error("settings parse error at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Tunables shared by the resolver and the container runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineSettings {
    /// Root for everything the engine persists; the git cache lives under `ops/`.
    pub data_dir: PathBuf,
    /// User-defined container network every container joins.
    pub network_name: String,
    /// Prefix marking containers as engine-managed. External tools rely on it.
    pub container_name_prefix: String,
    /// Grace period given to a container to stop before it is force-removed.
    pub stop_timeout_secs: u64,
    /// Retry SSH authentication failures over HTTPS with helper-provided credentials.
    pub credential_fallback: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            network_name: "opflow".to_string(),
            container_name_prefix: "opflow_".to_string(),
            stop_timeout_secs: 3,
            credential_fallback: false,
        }
    }
}

impl EngineSettings {
    /// Load settings from the default file location and environment.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from an explicit file, then apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let mut settings = match fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file; using defaults");
                Self::default()
            }
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        if let Some(data_dir) = env_path(DATA_DIR_ENV) {
            settings.data_dir = data_dir;
        }
        Ok(settings)
    }

    /// Base path of the git package cache: `<data_dir>/ops`.
    pub fn ops_cache_dir(&self) -> PathBuf {
        self.data_dir.join("ops")
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

fn default_settings_path() -> PathBuf {
    if let Some(path) = env_path(SETTINGS_PATH_ENV) {
        return path;
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("opflow")
        .join(SETTINGS_FILE_NAME)
}

fn default_data_dir() -> PathBuf {
    data_dir().unwrap_or_else(|| PathBuf::from(".")).join("opflow")
}

/// Path named by environment variable `key`; blank values count as unset.
fn env_path(key: &str) -> Option<PathBuf> {
    let value = env::var(key).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| home_relative(Path::new(value)))
}

/// Replaces a leading `~` component with the user's home directory.
fn home_relative(path: &Path) -> PathBuf {
    let mut components = path.components();
    match (components.next(), home_dir()) {
        (Some(Component::Normal(first)), Some(home)) if first == "~" => {
            let rest = components.as_path();
            if rest.as_os_str().is_empty() { home } else { home.join(rest) }
        }
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("absent.json");

        let settings = temp_env::with_var_unset(DATA_DIR_ENV, || EngineSettings::load_from(&path)).unwrap();
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.stop_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_file_values_override_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, r#"{ "network_name": "ci-net", "stop_timeout_secs": 10 }"#).unwrap();

        let settings = temp_env::with_var_unset(DATA_DIR_ENV, || EngineSettings::load_from(&path)).unwrap();
        assert_eq!(settings.network_name, "ci-net");
        assert_eq!(settings.stop_timeout_secs, 10);
        assert_eq!(settings.container_name_prefix, "opflow_");
    }

    #[test]
    fn test_data_dir_env_wins_over_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, r#"{ "data_dir": "/from/file" }"#).unwrap();

        let settings = temp_env::with_var(DATA_DIR_ENV, Some("/from/env"), || EngineSettings::load_from(&path)).unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/from/env"));
        assert_eq!(settings.ops_cache_dir(), PathBuf::from("/from/env/ops"));
    }

    #[test]
    fn test_invalid_json_is_a_parse_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, "{ not json").unwrap();

        let error = EngineSettings::load_from(&path).unwrap_err();
        assert!(matches!(error, SettingsError::Parse { .. }));
    }

    #[test]
    fn test_env_paths_are_trimmed_and_blank_means_unset() {
        let path = temp_env::with_var(DATA_DIR_ENV, Some("  /var/lib/opflow \n"), || env_path(DATA_DIR_ENV));
        assert_eq!(path, Some(PathBuf::from("/var/lib/opflow")));

        let path = temp_env::with_var(DATA_DIR_ENV, Some("   "), || env_path(DATA_DIR_ENV));
        assert_eq!(path, None);
    }

    #[test]
    fn test_leading_tilde_component_expands_to_home() {
        let Some(home) = home_dir() else {
            return;
        };
        assert_eq!(home_relative(Path::new("~")), home);
        assert_eq!(home_relative(Path::new("~/opflow/data")), home.join("opflow/data"));
        assert_eq!(home_relative(Path::new("~opflow/data")), PathBuf::from("~opflow/data"));
        assert_eq!(home_relative(Path::new("/srv/~/data")), PathBuf::from("/srv/~/data"));
    }
}
