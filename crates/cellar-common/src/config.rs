//! Configuration types for cellar
//!
//! This module defines configuration structures for the master process
//! and for worker-side clients.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Default RPC endpoint: local loopback, port 9990.
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:9990";

/// Master process configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Directory holding the ordered KV store and the manifest
    pub metadata_path: PathBuf,
    /// Address the RPC server listens on
    pub listen: SocketAddr,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            metadata_path: PathBuf::from("/var/lib/cellar"),
            listen: DEFAULT_ENDPOINT.parse().expect("default endpoint is valid"),
        }
    }
}

impl MasterConfig {
    /// Create config rooted at a metadata directory
    pub fn with_metadata_path(metadata_path: impl Into<PathBuf>) -> Self {
        Self {
            metadata_path: metadata_path.into(),
            ..Default::default()
        }
    }
}

/// Worker-side client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Directory holding the manifest published by the master
    pub metadata_path: PathBuf,
    /// Address of the master's RPC server
    pub endpoint: SocketAddr,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            metadata_path: PathBuf::from("/var/lib/cellar"),
            endpoint: DEFAULT_ENDPOINT.parse().expect("default endpoint is valid"),
        }
    }
}
