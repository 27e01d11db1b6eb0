//! Exec command - runs a program against a fresh cluster.
//!
//! The cluster is stopped when the program exits or on Ctrl+C, and the
//! program's exit code becomes ours.

use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use mongo_harness::MongoCluster;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ClusterArgs, cluster_options, load_config};
use crate::style;

/// Environment variables receiving the connection string.
const URI_VARS: [&str; 2] = ["MONGODB_URI", "MONGODB_CONNECTION_STRING"];

/// Environment variable receiving the comma-separated host list.
const HOSTPORT_VAR: &str = "MONGODB_HOSTPORT";

/// Separates `<server args> -- <command...>`. Without a separator the whole
/// list is the command.
pub(crate) fn split_trailing(mut trailing: Vec<String>) -> (Vec<String>, Vec<String>) {
    match trailing.iter().position(|arg| arg == "--") {
        Some(separator) => {
            let command = trailing.split_off(separator + 1);
            trailing.pop();
            (trailing, command)
        }
        None => (Vec::new(), trailing),
    }
}

pub async fn run(args: ClusterArgs, trailing: Vec<String>) -> Result<ExitCode> {
    let (server_args, command) = split_trailing(trailing);
    let Some((program, program_args)) = command.split_first() else {
        bail!("No command given after the server arguments");
    };

    let config = load_config()?;
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
    style::finish_and_clear(&spinner);

    let result = run_child(&cluster, program, program_args).await;
    cluster.close().await;
    debug!("cluster stopped");

    let code = result?;
    Ok(ExitCode::from(code))
}

async fn run_child(cluster: &MongoCluster, program: &str, args: &[String]) -> Result<u8> {
    let uri = cluster.connection_string()?;
    let hostport = cluster.hostport()?;

    let mut command = Command::new(program);
    command.args(args).env(HOSTPORT_VAR, &hostport);
    for var in URI_VARS {
        command.env(var, &uri);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to run {program}"))?;

    let status = tokio::select! {
        status = child.wait() => status.with_context(|| format!("Failed to wait for {program}"))?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, stopping command");
            child.kill().await.ok();
            return Ok(130);
        }
    };

    debug!(%status, "command exited");
    Ok(status
        .code()
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(1))
}
