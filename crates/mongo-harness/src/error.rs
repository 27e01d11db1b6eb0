//! Error types for topology orchestration.

use std::path::PathBuf;
use thiserror::Error;

/// Orchestration errors.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server binary could not be spawned.
    #[error("Failed to spawn {binary}: {reason}")]
    Spawn {
        /// Binary that was being launched.
        binary: String,
        /// Underlying failure.
        reason: String,
    },

    /// The server reported that its listener could not be set up.
    #[error("Server failed to bind its listener: {0}")]
    ListenerFailed(String),

    /// The log stream ended before the server announced a port, or the
    /// binary could not be executed at all.
    #[error("Server ended without listening on a port{}", detail(.reason))]
    EndedWithoutPort {
        /// Why no output was produced, when known.
        reason: Option<String>,
    },

    /// No replica-set member reached PRIMARY within the poll budget.
    #[error("Replica set {set} did not elect a primary after {attempts} attempts")]
    ElectionTimeout {
        /// Replica-set name.
        set: String,
        /// Number of polls that were made.
        attempts: u32,
    },

    /// An accessor was used outside the ready state.
    #[error("Server is not running: {0} is unavailable")]
    NotReady(&'static str),

    /// The cluster has no servers.
    #[error("Cluster is closed")]
    ClusterClosed,

    /// An administrative command failed.
    #[error("Command {command} against {target} failed: {reason}")]
    Command {
        /// Name of the command (first key of the document).
        command: String,
        /// Connection target, without credentials.
        target: String,
        /// Failure reported by the client or the server.
        reason: String,
    },

    /// Handle id contains characters outside `[a-zA-Z0-9_-]`.
    #[error("Invalid handle id {0:?}")]
    InvalidHandleId(String),

    /// No handle file exists for the id.
    #[error("No handle found at {0}")]
    HandleNotFound(PathBuf),

    /// Certificate generation failed.
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Binaries could not be located.
    #[error("Could not resolve binaries for version {version}: {reason}")]
    BinaryResolution {
        /// Requested version spec.
        version: String,
        /// Failure detail.
        reason: String,
    },

    /// Topology options are inconsistent.
    #[error("Invalid topology options: {0}")]
    InvalidTopology(String),
}

fn detail(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|reason| format!(": {reason}"))
        .unwrap_or_default()
}

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;
