//! CLI command implementations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use mongo_harness::{
    AdminClient, ClusterOptions, DockerOptions, DriverClient, HandleStore, SearchPathResolver,
    Topology,
};
use mongo_harness_config::{ConfigLoader, HarnessConfig};

pub mod exec;
pub mod ls;
pub mod start;
pub mod stop;

/// Flags shared by `start` and `exec`. Unset flags fall back to the loaded
/// configuration.
#[derive(Args, Debug, Default)]
pub struct ClusterArgs {
    /// standalone, replset or sharded.
    #[arg(short, long)]
    pub topology: Option<String>,

    /// Secondaries per replica set.
    #[arg(long)]
    pub secondaries: Option<usize>,

    /// Arbiters per replica set.
    #[arg(long)]
    pub arbiters: Option<usize>,

    /// Shards in a sharded cluster.
    #[arg(long)]
    pub shards: Option<usize>,

    /// Routers in a sharded cluster.
    #[arg(long)]
    pub mongos: Option<usize>,

    /// Server version spec.
    #[arg(id = "server_version", long = "server-version", value_name = "VERSION")]
    pub version: Option<String>,

    /// Write per-process server logs here.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Directory holding mongod and mongos.
    #[arg(long)]
    pub bin_dir: Option<PathBuf>,

    /// Parent of server data directories.
    #[arg(long)]
    pub tmp_dir: Option<PathBuf>,

    /// Run servers in this container image.
    #[arg(long, value_name = "IMAGE")]
    pub docker: Option<String>,

    #[command(flatten)]
    pub runner: RunnerArgs,
}

/// Location of handle files.
#[derive(Args, Debug, Default)]
pub struct RunnerArgs {
    /// Directory holding handles of running clusters.
    #[arg(long)]
    pub runner_dir: Option<PathBuf>,
}

pub(crate) fn load_config() -> Result<HarnessConfig> {
    ConfigLoader::new()
        .load()
        .context("Failed to load configuration")
}

pub(crate) fn handle_store(runner: &RunnerArgs, config: &HarnessConfig) -> HandleStore {
    HandleStore::new(
        runner
            .runner_dir
            .clone()
            .unwrap_or_else(|| config.runner_dir.clone()),
    )
}

pub(crate) fn admin_client() -> Arc<dyn AdminClient> {
    Arc::new(DriverClient::new())
}

/// Merges flags over configuration into engine options.
pub(crate) fn cluster_options(
    args: &ClusterArgs,
    config: &HarnessConfig,
    server_args: Vec<String>,
) -> Result<ClusterOptions> {
    let kind = args.topology.as_deref().unwrap_or(&config.topology.kind);
    let topology: Topology = kind.parse()?;

    let tmp_dir = args.tmp_dir.clone().unwrap_or_else(|| config.tmp_dir.clone());
    let mut options = ClusterOptions::new(topology, tmp_dir, admin_client())
        .with_args(server_args)
        .with_secondaries(args.secondaries.unwrap_or(config.topology.secondaries))
        .with_arbiters(args.arbiters.unwrap_or(config.topology.arbiters))
        .with_shards(args.shards.unwrap_or(config.topology.shards))
        .with_mongos(args.mongos.unwrap_or(config.topology.mongos));

    if let Some(version) = args.version.clone().or_else(|| config.version.clone()) {
        options = options.with_version(version);
    }
    if let Some(log_dir) = args.log_dir.clone().or_else(|| config.log_dir.clone()) {
        options = options.with_log_dir(log_dir);
    }
    if let Some(image) = args.docker.clone().or_else(|| config.docker_image.clone()) {
        options = options.with_docker(DockerOptions::new(image));
    }
    match args.bin_dir.clone().or_else(|| config.bin_dir.clone()) {
        Some(bin_dir) => options = options.with_bin_dir(bin_dir),
        None => options = options.with_resolver(Arc::new(SearchPathResolver::new())),
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let mut config = HarnessConfig::default();
        config.topology.kind = "replset".to_string();
        config.topology.secondaries = 4;
        config.bin_dir = Some(PathBuf::from("/from/config"));

        let args = ClusterArgs {
            secondaries: Some(1),
            bin_dir: Some(PathBuf::from("/from/flag")),
            ..Default::default()
        };
        let options = cluster_options(&args, &config, vec!["--quiet".to_string()]).unwrap();

        assert_eq!(options.topology, Topology::Replset);
        assert_eq!(options.secondaries, 1);
        assert_eq!(options.bin_dir, Some(PathBuf::from("/from/flag")));
        assert_eq!(options.args, vec!["--quiet".to_string()]);
        assert!(options.resolver.is_none());
    }

    #[test]
    fn resolver_is_used_without_bin_dir() {
        let config = HarnessConfig::default();
        let options = cluster_options(&ClusterArgs::default(), &config, Vec::new()).unwrap();

        assert_eq!(options.topology, Topology::Standalone);
        assert!(options.resolver.is_some());
        assert!(options.docker.is_none());
    }

    #[test]
    fn unknown_topology_is_rejected() {
        let args = ClusterArgs {
            topology: Some("ring".to_string()),
            ..Default::default()
        };
        assert!(cluster_options(&args, &HarnessConfig::default(), Vec::new()).is_err());
    }

    #[test]
    fn runner_flag_overrides_config() {
        let config = HarnessConfig::default();
        let runner = RunnerArgs {
            runner_dir: Some(PathBuf::from("/tmp/runner")),
        };
        assert_eq!(
            handle_store(&runner, &config).dir(),
            std::path::Path::new("/tmp/runner")
        );
    }
}
