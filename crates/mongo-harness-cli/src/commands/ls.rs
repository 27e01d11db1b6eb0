//! Ls command - lists persisted clusters.

use anyhow::{Context, Result};

use super::{RunnerArgs, handle_store, load_config};
use crate::style;

pub async fn run(runner: RunnerArgs) -> Result<()> {
    let config = load_config()?;
    let store = handle_store(&runner, &config);

    let rows: Vec<Vec<String>> = store
        .list()
        .await
        .context("Failed to list cluster handles")?
        .into_iter()
        .map(|handle| {
            vec![
                handle.id,
                handle.serialized.topology.to_string(),
                handle.connection_string,
            ]
        })
        .collect();

    style::print_table(
        &["Id", "Topology", "Connection string"],
        &rows,
        "No running clusters.",
    );
    Ok(())
}
