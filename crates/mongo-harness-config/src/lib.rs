//! Configuration management for mongo-harness
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence, applied by the CLI)
//! 2. Environment variables (MONGO_HARNESS_* prefix, `__` between sections)
//! 3. mongo-harness.toml (project config)
//! 4. ~/.config/mongo-harness/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Topology kinds accepted in `[topology] kind`.
pub const TOPOLOGY_KINDS: [&str; 3] = ["standalone", "replset", "sharded"];

/// Main mongo-harness configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Where handle files for running clusters are kept.
    pub runner_dir: PathBuf,
    /// Parent of server data directories.
    pub tmp_dir: PathBuf,
    /// Per-process server logs are written here when set.
    pub log_dir: Option<PathBuf>,
    /// Directory holding `mongod`/`mongos`; searched on PATH when unset.
    pub bin_dir: Option<PathBuf>,
    /// Server version spec.
    pub version: Option<String>,
    /// Run servers in this container image.
    pub docker_image: Option<String>,
    pub topology: TopologyDefaults,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            runner_dir: Paths::new().default_runner_dir(),
            tmp_dir: std::env::temp_dir(),
            log_dir: None,
            bin_dir: None,
            version: None,
            docker_image: None,
            topology: TopologyDefaults::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TopologyDefaults {
    pub kind: String,
    pub secondaries: usize,
    pub arbiters: usize,
    pub shards: usize,
    pub mongos: usize,
}

impl Default for TopologyDefaults {
    fn default() -> Self {
        Self {
            kind: "standalone".to_string(),
            secondaries: 2,
            arbiters: 0,
            shards: 3,
            mongos: 1,
        }
    }
}

impl HarnessConfig {
    /// Makes every configured directory absolute relative to `base_dir`.
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };

        resolve(&mut self.runner_dir);
        resolve(&mut self.tmp_dir);
        if let Some(log_dir) = self.log_dir.as_mut() {
            resolve(log_dir);
        }
        if let Some(bin_dir) = self.bin_dir.as_mut() {
            resolve(bin_dir);
        }
    }

    /// Reject settings the orchestrator cannot act on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let kind = self.topology.kind.to_ascii_lowercase();
        if !TOPOLOGY_KINDS.contains(&kind.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "topology.kind must be one of {}, got {:?}",
                TOPOLOGY_KINDS.join(", "),
                self.topology.kind
            )));
        }
        if kind == "sharded" && self.topology.shards == 0 {
            return Err(ConfigError::ValidationError(
                "topology.shards must be at least 1 for a sharded topology".to_string(),
            ));
        }
        Ok(())
    }
}
