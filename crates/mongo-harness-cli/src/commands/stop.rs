//! Stop command - reattaches to persisted clusters and closes them.

use anyhow::{Context, Result};
use mongo_harness::{HandleFile, HandleStore, MongoCluster, validate_id};
use tracing::debug;

use super::{RunnerArgs, admin_client, handle_store, load_config};
use crate::style::{self, colors::SemanticStyle};

pub async fn run(id: Option<String>, all: bool, runner: RunnerArgs) -> Result<()> {
    if let Some(id) = &id {
        validate_id(id)?;
    }

    let config = load_config()?;
    let store = handle_store(&runner, &config);

    let handles = if all {
        store.list().await.context("Failed to list cluster handles")?
    } else if let Some(id) = id {
        vec![store.read(&id).await?]
    } else {
        Vec::new()
    };

    if handles.is_empty() {
        println!("{}", "No running clusters.".muted());
        return Ok(());
    }

    for handle in handles {
        stop_one(&store, handle).await?;
    }
    Ok(())
}

async fn stop_one(store: &HandleStore, handle: HandleFile) -> Result<()> {
    let HandleFile {
        id,
        serialized,
        client_tls,
        ..
    } = handle;

    match MongoCluster::deserialize(serialized.clone(), admin_client(), client_tls.unwrap_or_default())
        .await
    {
        Ok(mut cluster) => {
            cluster.close().await;
            store.remove(&id).await?;
            style::print_success(&format!("Stopped {}", id.code()));
        }
        Err(err) => {
            debug!(id, error = %err, "reattach failed, killing recorded processes");
            serialized.force_close().await;
            store.remove(&id).await?;
            style::print_warn(&format!(
                "Cluster {id} could not be reattached ({err}); killed its recorded processes and removed its handle"
            ));
        }
    }
    Ok(())
}
