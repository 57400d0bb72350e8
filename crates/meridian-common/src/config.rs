//! Meridian Config - Configuration Structures
//!
//! Timing and sizing knobs shared by the cluster logic and the server.
//! Provides sensible defaults for local clusters; every knob can be
//! overridden programmatically through the builder methods.
//!
//! @version 0.1.0
//! @author Meridian Development Team

use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// Cluster Configuration
// =============================================================================

/// Timing configuration for cluster coordination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Interval between liveness probes of each peer.
    pub probe_interval: Duration,
    /// Consecutive failed probes before a peer is declared dead.
    pub probe_failure_threshold: u32,
    /// Timeout for a single liveness probe.
    pub probe_timeout: Duration,
    /// Timeout for fire-and-forget replication sends.
    pub broadcast_timeout: Duration,
    /// Timeout when forwarding a request to the owning shard.
    pub forward_timeout: Duration,
    /// Timeout for a single Paxos message exchange.
    pub paxos_timeout: Duration,
    /// Maximum proposer retry rounds before abandoning a reallocation.
    pub max_proposal_rounds: u32,
    /// Maximum key length in bytes accepted by the store.
    pub max_key_bytes: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(2),
            probe_failure_threshold: 3,
            probe_timeout: Duration::from_secs(1),
            broadcast_timeout: Duration::from_secs(1),
            forward_timeout: Duration::from_secs(2),
            paxos_timeout: Duration::from_secs(1),
            max_proposal_rounds: 3,
            max_key_bytes: 50,
        }
    }
}

impl ClusterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_probe_failure_threshold(mut self, threshold: u32) -> Self {
        self.probe_failure_threshold = threshold;
        self
    }

    pub fn with_broadcast_timeout(mut self, timeout: Duration) -> Self {
        self.broadcast_timeout = timeout;
        self
    }

    pub fn with_max_proposal_rounds(mut self, rounds: u32) -> Self {
        self.max_proposal_rounds = rounds;
        self
    }
}

// =============================================================================
// Tests
// =============================================================================
