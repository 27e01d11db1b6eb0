//! Persisted cluster handles.
//!
//! A started cluster can be left running and picked up again by a later
//! invocation. Each handle lives in its own `m-<id>.json` file in the
//! runner directory and is only ever written or read as a whole file.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::ClientTlsOptions;
use crate::cluster::{MongoCluster, SerializedCluster};
use crate::{Error, Result};

static HANDLE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("handle id pattern is valid"));

const FILE_PREFIX: &str = "m-";
const FILE_SUFFIX: &str = ".json";

/// Contents of a handle file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleFile {
    pub id: String,
    pub serialized: SerializedCluster,
    pub connection_string: String,
    /// Client TLS settings needed to reach the servers again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_tls: Option<ClientTlsOptions>,
}

/// Checks that `id` is usable as a handle id.
pub fn validate_id(id: &str) -> Result<()> {
    if HANDLE_ID.is_match(id) {
        Ok(())
    } else {
        Err(Error::InvalidHandleId(id.to_string()))
    }
}

/// A fresh random handle id.
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Directory of handle files.
#[derive(Debug, Clone)]
pub struct HandleStore {
    dir: PathBuf,
}

impl HandleStore {
    /// Store rooted at `runner_dir`. The directory is created on first write.
    pub fn new(runner_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: runner_dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the handle file for `id`.
    pub fn path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{FILE_PREFIX}{id}{FILE_SUFFIX}")))
    }

    /// Persists `cluster` under `id`, replacing any previous handle.
    pub async fn write(&self, id: &str, cluster: &MongoCluster) -> Result<HandleFile> {
        let handle = HandleFile {
            id: id.to_string(),
            serialized: cluster.serialize()?,
            connection_string: cluster.connection_string()?,
            client_tls: Some(cluster.client_tls().clone()).filter(ClientTlsOptions::is_enabled),
        };
        let path = self.path(id)?;
        fs::create_dir_all(&self.dir).await?;
        fs::write(&path, serde_json::to_vec_pretty(&handle)?).await?;
        debug!(id, path = %path.display(), "wrote handle");
        Ok(handle)
    }

    /// Reads the handle for `id`.
    pub async fn read(&self, id: &str) -> Result<HandleFile> {
        let path = self.path(id)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::HandleNotFound(path));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Every readable handle, ordered by id. Malformed files are skipped.
    pub async fn list(&self) -> Result<Vec<HandleFile>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut handles = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_prefix(FILE_PREFIX))
                .and_then(|n| n.strip_suffix(FILE_SUFFIX))
            else {
                continue;
            };
            if validate_id(id).is_err() {
                continue;
            }
            match self.read(id).await {
                Ok(handle) => handles.push(handle),
                Err(err) => debug!(id, error = %err, "skipping unreadable handle"),
            }
        }

        handles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(handles)
    }

    /// Deletes the handle for `id`. Returns whether a file was removed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let path = self.path(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(id, "handle already removed");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}
