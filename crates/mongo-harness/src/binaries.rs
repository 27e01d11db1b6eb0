//! Locating server executables.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Platform hints passed to a [`BinaryResolver`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// Prefer the enterprise build.
    #[serde(default)]
    pub enterprise: bool,
    /// Target platform, e.g. `linux`.
    #[serde(default)]
    pub platform: Option<String>,
    /// Target architecture, e.g. `x86_64`.
    #[serde(default)]
    pub arch: Option<String>,
    /// Target distribution, e.g. `ubuntu2204`.
    #[serde(default)]
    pub distro: Option<String>,
}

/// Produces a directory containing `mongod` and `mongos` for a version spec.
#[async_trait]
pub trait BinaryResolver: Send + Sync {
    /// Returns the directory holding the executables.
    async fn resolve(
        &self,
        tmp_dir: &Path,
        version: &str,
        options: &DownloadOptions,
    ) -> Result<PathBuf>;
}

/// Resolves binaries from the directories on `PATH`.
///
/// Nothing is downloaded; the version spec is accepted as-is and callers
/// verify the running version through `buildInfo`.
#[derive(Debug, Clone, Default)]
pub struct SearchPathResolver {
    path: Option<std::ffi::OsString>,
}

impl SearchPathResolver {
    /// Resolver over the process `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver over an explicit search path.
    pub fn with_search_path(path: impl Into<std::ffi::OsString>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

#[async_trait]
impl BinaryResolver for SearchPathResolver {
    async fn resolve(
        &self,
        _tmp_dir: &Path,
        version: &str,
        _options: &DownloadOptions,
    ) -> Result<PathBuf> {
        let search = self
            .path
            .clone()
            .or_else(|| std::env::var_os("PATH"))
            .unwrap_or_default();

        let executable = format!("mongod{}", std::env::consts::EXE_SUFFIX);
        std::env::split_paths(&search)
            .find(|dir| dir.join(&executable).is_file())
            .inspect(|dir| debug!(version, dir = %dir.display(), "resolved binaries from PATH"))
            .ok_or_else(|| Error::BinaryResolution {
                version: version.to_string(),
                reason: "mongod not found on PATH".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn finds_directory_holding_mongod() {
        let empty = TempDir::new().unwrap();
        let bin = TempDir::new().unwrap();
        std::fs::write(bin.path().join("mongod"), "").unwrap();

        let path = std::env::join_paths([empty.path(), bin.path()]).unwrap();
        let resolver = SearchPathResolver::with_search_path(path);
        let dir = resolver
            .resolve(empty.path(), "7.x", &DownloadOptions::default())
            .await
            .unwrap();

        assert_eq!(dir, bin.path());
    }

    #[tokio::test]
    async fn missing_mongod_is_an_error() {
        let empty = TempDir::new().unwrap();
        let resolver = SearchPathResolver::with_search_path(empty.path());
        let err = resolver
            .resolve(empty.path(), "8.0", &DownloadOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::BinaryResolution { .. }));
    }
}
