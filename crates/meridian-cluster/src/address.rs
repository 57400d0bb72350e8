//! Meridian Replica Address
//!
//! Replica identification for the cluster. A replica is identified by its
//! public "host:port" socket address, which doubles as its identity in the
//! view, in vector clocks, and in Paxos proposals.
//!
//! @version 0.1.0
//! @author Meridian Development Team

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

// =============================================================================
// Address
// =============================================================================

/// Unique identifier for a replica in the cluster ("host:port").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The host portion of the address.
    pub fn host(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }

    /// The port portion of the address, if one is present and parses.
    pub fn port(&self) -> Option<u16> {
        self.0.split(':').nth(1).and_then(|p| p.parse().ok())
    }

    /// Parse into a socket address, when the host is a literal IP.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.0.parse().ok()
    }

    /// Base URL for peer HTTP calls.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.0)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================
