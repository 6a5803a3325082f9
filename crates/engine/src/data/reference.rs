//! Package reference parsing.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Separator between a package name and its version.
pub const VERSION_SEPARATOR: char = '#';

/// Why a raw package reference could not be parsed.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("missing version")]
    MissingVersion,
    #[error("missing name")]
    MissingName,
}

/// A versioned package reference such as `example.org/pkg#1.0.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageRef {
    pub name: String,
    pub version: String,
}

impl PackageRef {
    /// Split `name#version`. The version is mandatory.
    pub fn parse(raw: &str) -> Result<Self, ReferenceError> {
        let (name, version) = raw.rsplit_once(VERSION_SEPARATOR).ok_or(ReferenceError::MissingVersion)?;
        if version.is_empty() {
            return Err(ReferenceError::MissingVersion);
        }
        if name.is_empty() {
            return Err(ReferenceError::MissingName);
        }
        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    /// Location of this package inside a cache rooted at `base_path`.
    pub fn to_path(&self, base_path: &Path) -> PathBuf {
        base_path.join(self.to_string())
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.name, VERSION_SEPARATOR, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_name_and_version() {
        let parsed = PackageRef::parse("example.org/pkg#1.0.0").unwrap();
        assert_eq!(parsed.name, "example.org/pkg");
        assert_eq!(parsed.version, "1.0.0");
    }

    #[test]
    fn test_parse_requires_version() {
        for raw in ["/not/exists", "example.org/pkg", "example.org/pkg#", ""] {
            assert_eq!(PackageRef::parse(raw), Err(ReferenceError::MissingVersion), "input: {raw:?}");
        }
        assert_eq!(ReferenceError::MissingVersion.to_string(), "missing version");
    }

    #[test]
    fn test_parse_requires_name() {
        assert_eq!(PackageRef::parse("#1.0.0"), Err(ReferenceError::MissingName));
    }

    #[test]
    fn test_to_path_joins_name_and_version() {
        let parsed = PackageRef::parse("example.org/pkg#1.0.0").unwrap();
        assert_eq!(parsed.to_path(Path::new("/cache")), PathBuf::from("/cache/example.org/pkg#1.0.0"));
    }
}
