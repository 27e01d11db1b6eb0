//! Layered loading of [`HarnessConfig`].
//!
//! Later layers win: built-in defaults, the user file, `mongo-harness.toml`
//! in the project directory, then `MONGO_HARNESS_*` variables.

use crate::{HarnessConfig, Paths};
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "MONGO_HARNESS";

pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    user_config: bool,
}

impl ConfigLoader {
    /// Loader rooted at the current directory.
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: ENV_PREFIX.to_string(),
            user_config: true,
        }
    }

    /// Directory searched for `mongo-harness.toml`; relative paths in the
    /// result are resolved against it.
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Ignores the per-user config file.
    pub fn without_user_config(mut self) -> Self {
        self.user_config = false;
        self
    }

    /// Config files that exist, lowest precedence first.
    fn files(&self) -> Vec<PathBuf> {
        let user = self
            .user_config
            .then(|| Paths::new().user_config_file().ok())
            .flatten();
        user.into_iter()
            .chain(std::iter::once(Paths::project_config_file(&self.project_dir)))
            .filter(|file| file.exists())
            .collect()
    }

    pub fn load(self) -> Result<HarnessConfig> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&HarnessConfig::default())?);
        for file in self.files() {
            builder = builder.add_source(File::from(file).format(FileFormat::Toml));
        }
        // MONGO_HARNESS_RUNNER_DIR, MONGO_HARNESS_TOPOLOGY__KIND, ...
        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut harness_config: HarnessConfig = builder
            .build()
            .and_then(Config::try_deserialize)
            .context("Failed to read configuration")?;
        harness_config.resolve_paths(&self.project_dir);
        harness_config.validate()?;
        Ok(harness_config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn loader(dir: &Path) -> ConfigLoader {
        ConfigLoader::new()
            .with_project_dir(dir)
            .with_env_prefix("MONGO_HARNESS_LOADER_TEST")
            .without_user_config()
    }

    #[test]
    fn test_load_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = loader(temp_dir.path()).load().expect("Failed to load config");

        assert_eq!(config.topology.kind, "standalone");
        assert_eq!(config.topology.secondaries, 2);
        assert!(config.runner_dir.is_absolute());
    }

    #[test]
    fn test_malformed_project_file_is_an_error() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join("mongo-harness.toml"), "[topology\n")
            .expect("Failed to write config");

        let err = loader(temp_dir.path()).load().unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read configuration"));
    }

    #[test]
    fn test_load_project_config() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        let config_content = r#"
runner_dir = ".runner"
version = "7.0.x"
bin_dir = "/opt/mongodb/bin"

[topology]
kind = "replset"
secondaries = 1
arbiters = 1
"#;
        fs::write(project_dir.join("mongo-harness.toml"), config_content)
            .expect("Failed to write config");

        let config = loader(project_dir).load().expect("Failed to load config");

        assert_eq!(config.runner_dir, project_dir.join(".runner"));
        assert_eq!(config.version.as_deref(), Some("7.0.x"));
        assert_eq!(config.bin_dir, Some(PathBuf::from("/opt/mongodb/bin")));
        assert_eq!(config.topology.kind, "replset");
        assert_eq!(config.topology.secondaries, 1);
        assert_eq!(config.topology.arbiters, 1);
        // Untouched values keep their defaults
        assert_eq!(config.topology.shards, 3);
    }

    #[test]
    fn test_invalid_topology_is_rejected() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        fs::write(
            temp_dir.path().join("mongo-harness.toml"),
            "[topology]\nkind = \"ring\"\n",
        )
        .expect("Failed to write config");

        let err = loader(temp_dir.path()).load().unwrap_err();
        assert!(format!("{err:#}").contains("ring"), "{err:#}");
    }

    // Environment overrides are not exercised here: the variables are process
    // global and tests run in parallel. They take the form
    //
    // MONGO_HARNESS_RUNNER_DIR=/tmp/runner
    // MONGO_HARNESS_TOPOLOGY__KIND=sharded
    // MONGO_HARNESS_TOPOLOGY__SHARDS=2
}
