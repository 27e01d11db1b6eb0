//! Ephemeral MongoDB topologies for tests and local development.
//!
//! Starts standalone servers, replica sets and sharded clusters from local
//! binaries or containers, learns their ports from the servers' own log
//! output, and tears them down again:
//! - [`MongoServer`] supervises one `mongod`/`mongos` process
//! - [`MongoCluster`] composes servers into topologies and bootstraps them
//! - [`HandleStore`] persists running clusters so a later invocation can
//!   reattach to and stop them
//!
//! Administrative commands go through an [`AdminClient`]; the default
//! `driver` feature provides one backed by the official driver.

pub mod args;
pub mod binaries;
pub mod client;
pub mod cluster;
pub mod error;
pub mod handle;
pub mod log;
pub mod scan;
pub mod server;
pub mod tls;

#[cfg(all(test, unix))]
mod testing;

pub use binaries::{BinaryResolver, DownloadOptions, SearchPathResolver};
#[cfg(feature = "driver")]
pub use client::DriverClient;
pub use client::{AdminClient, ClientTlsOptions, ConnectionTarget};
pub use cluster::{
    ClusterOptions, Credentials, ElectionPoll, MongoCluster, RoleSpec, SerializedCluster,
    Topology, UserSpec,
};
pub use error::{Error, Result};
pub use handle::{HandleFile, HandleStore, generate_id, validate_id};
pub use log::{LogEntry, Severity};
pub use scan::BuildInfo;
pub use server::{DockerOptions, MongoServer, SerializedServer, ServerOptions, ServerVariant};
pub use tls::{ProvisionedCredentials, provision_client_certificate};
