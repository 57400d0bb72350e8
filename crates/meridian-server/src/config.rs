//! Meridian Server Configuration
//!
//! Per-replica configuration: the node's public socket address (its
//! identity in the cluster), the initial view, the optional initial shard
//! count, and the listen address. Handed to the components as plain values
//! at startup.
//!
//! @version 0.1.0
//! @author Meridian Development Team

use meridian_cluster::Address;
use meridian_common::ClusterConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for one Meridian replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// This node's public "host:port" address; its identity everywhere.
    pub socket_address: Address,
    /// Address to bind the listener to.
    pub bind: SocketAddr,
    /// Initial peer list (usually includes this node).
    pub view: Vec<Address>,
    /// Initial shard count. Absent means the node joins the view but takes
    /// no part in any shard until added via add-member.
    pub shard_count: Option<usize>,
    /// Cluster timing knobs.
    pub cluster: ClusterConfig,
}

impl ServerConfig {
    /// Create a config for the given public address, binding to all
    /// interfaces on the same port.
    pub fn new(socket_address: impl Into<Address>) -> Self {
        let socket_address = socket_address.into();
        let port = socket_address.port().unwrap_or(8090);
        Self {
            socket_address,
            bind: SocketAddr::from(([0, 0, 0, 0], port)),
            view: Vec::new(),
            shard_count: None,
            cluster: ClusterConfig::default(),
        }
    }

    /// Parse a comma-separated view list ("a:1,b:1,c:1").
    pub fn parse_view(raw: &str) -> Vec<Address> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Address::new)
            .collect()
    }

    pub fn with_view(mut self, view: Vec<Address>) -> Self {
        self.view = view;
        self
    }

    pub fn with_shard_count(mut self, shard_count: Option<usize>) -> Self {
        self.shard_count = shard_count;
        self
    }

    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.cluster = cluster;
        self
    }

    /// The seed node deterministically responsible for proposing the
    /// initial shard map: the highest sorted address of the initial view.
    pub fn is_seed(&self) -> bool {
        self.view.iter().max() == Some(&self.socket_address)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("127.0.0.1:8090")
    }
}

// =============================================================================
// Tests
// =============================================================================
