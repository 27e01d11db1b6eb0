//! Per-user locations.

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

const PROJECT_FILE: &str = "mongo-harness.toml";

pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("com", "MongoHarness", "mongo-harness"),
        }
    }

    fn dirs(&self) -> Result<&ProjectDirs, ConfigError> {
        self.project_dirs.as_ref().ok_or_else(|| {
            ConfigError::XdgError("no home directory to derive user paths from".to_string())
        })
    }

    /// `~/.config/mongo-harness/config.toml` on Linux.
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.dirs()?.config_dir().join("config.toml"))
    }

    /// Default home of handle files: `runner/` under the user's local data
    /// directory, or under the system temp directory without a home.
    pub fn default_runner_dir(&self) -> PathBuf {
        self.dirs()
            .map(|dirs| dirs.data_local_dir().to_path_buf())
            .unwrap_or_else(|_| std::env::temp_dir().join("mongo-harness"))
            .join("runner")
    }

    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join(PROJECT_FILE)
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
