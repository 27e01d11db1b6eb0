//! mongo-harness CLI.
//!
//! Starts throwaway MongoDB deployments for tests and local development.
//!
//! # Quick Start
//!
//! ```bash
//! # Start a three-member replica set and leave it running
//! mongo-harness start --topology replset --id dev
//!
//! # See what is running
//! mongo-harness ls
//!
//! # Run a test suite against a fresh sharded cluster
//! mongo-harness exec --topology sharded -- -- cargo test
//!
//! # Same, passing arguments to every server
//! mongo-harness exec --topology replset -- --setParameter enableTestCommands=1 -- cargo test
//!
//! # Tear everything down
//! mongo-harness stop --all
//! ```

mod commands;
mod style;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{ClusterArgs, RunnerArgs};

/// Ephemeral MongoDB standalone servers, replica sets and sharded clusters.
#[derive(Parser)]
#[command(name = "mongo-harness")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a cluster and leave it running in the background.
    Start {
        #[command(flatten)]
        cluster: ClusterArgs,

        /// Handle id for later `stop`; generated when omitted.
        #[arg(long)]
        id: Option<String>,

        /// Arguments passed to every server.
        #[arg(last = true)]
        server_args: Vec<String>,
    },

    /// Stop clusters started with `start`.
    Stop {
        /// Handle id of the cluster to stop.
        #[arg(long, required_unless_present = "all", conflicts_with = "all")]
        id: Option<String>,

        /// Stop every known cluster.
        #[arg(long)]
        all: bool,

        #[command(flatten)]
        runner: RunnerArgs,
    },

    /// List clusters started with `start`.
    Ls {
        #[command(flatten)]
        runner: RunnerArgs,
    },

    /// Start a cluster, run a command against it, then stop the cluster.
    Exec {
        #[command(flatten)]
        cluster: ClusterArgs,

        /// `<server args> -- <command...>`. Without a second `--`
        /// everything is the command. The command receives MONGODB_URI in
        /// its environment.
        #[arg(last = true, required = true, value_name = "ARGS")]
        trailing: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    style::set_no_color(cli.no_color);

    match cli.command {
        Commands::Start {
            cluster,
            id,
            server_args,
        } => commands::start::run(cluster, id, server_args).await?,
        Commands::Stop { id, all, runner } => commands::stop::run(id, all, runner).await?,
        Commands::Ls { runner } => commands::ls::run(runner).await?,
        Commands::Exec { cluster, trailing } => {
            return commands::exec::run(cluster, trailing).await;
        }
    }

    Ok(ExitCode::SUCCESS)
}
