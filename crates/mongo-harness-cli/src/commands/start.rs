//! Start command - launches a cluster and leaves it running.

use anyhow::{Context, Result};
use mongo_harness::{MongoCluster, generate_id, validate_id};
use tracing::warn;

use super::{ClusterArgs, cluster_options, handle_store, load_config};
use crate::style::{self, colors::SemanticStyle};

pub async fn run(args: ClusterArgs, id: Option<String>, server_args: Vec<String>) -> Result<()> {
    let id = id.unwrap_or_else(generate_id);
    validate_id(&id)?;

    let config = load_config()?;
    let store = handle_store(&args.runner, &config);
    let options = cluster_options(&args, &config, server_args)?;
    let topology = options.topology;

    let spinner = style::create_spinner(&format!("Starting {topology} cluster..."));
    let mut cluster = match MongoCluster::start(options).await {
        Ok(cluster) => cluster,
        Err(err) => {
            style::finish_error(&spinner, "Failed to start cluster");
            return Err(err).context("Failed to start cluster");
        }
    };

    let handle = match store.write(&id, &cluster).await {
        Ok(handle) => handle,
        Err(err) => {
            style::finish_error(&spinner, "Failed to save cluster handle");
            warn!(error = %err, "stopping cluster that could not be saved");
            cluster.close().await;
            return Err(err).context("Failed to save cluster handle");
        }
    };
    cluster.unref_processes();
    style::finish_and_clear(&spinner);

    style::print_success(&format!("Started {topology} cluster"));
    style::print_labeled("Id", &handle.id.code());
    style::print_labeled("Connection string", &handle.connection_string.code());
    if let Ok(version) = cluster.server_version() {
        style::print_labeled("Server version", version);
    }
    println!();
    style::print_hint(&format!("Stop it with: mongo-harness stop --id {id}"));

    Ok(())
}
