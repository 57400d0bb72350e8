//! Meridian Cluster View
//!
//! The authoritative set of live replica addresses, owned by each replica's
//! membership component. Mutated only by view operations (client- or
//! peer-originated) and by the failure detector, which escalates a peer to
//! removed after a run of consecutive failed probes.
//!
//! @version 0.1.0
//! @author Meridian Development Team

use crate::address::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// =============================================================================
// View Change
// =============================================================================

/// Outcome of a view mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewChange {
    /// The address was added to the view.
    Added,
    /// The address was already present; nothing changed.
    AlreadyPresent,
    /// The address was removed from the view.
    Removed,
    /// The address was not in the view; nothing changed.
    NotFound,
}

// =============================================================================
// View
// =============================================================================

/// An ordered set of live replica addresses.
#[derive(Debug, Clone)]
pub struct View {
    local: Address,
    members: Vec<Address>,
    probe_failures: HashMap<Address, u32>,
    failure_threshold: u32,
}

impl View {
    /// Create a view from the initial member list. The local address is
    /// always part of the view, whether or not the list names it.
    pub fn new(local: Address, initial: Vec<Address>, failure_threshold: u32) -> Self {
        let mut members = Vec::new();
        for addr in initial {
            if !members.contains(&addr) {
                members.push(addr);
            }
        }
        if !members.contains(&local) {
            members.push(local.clone());
        }

        Self {
            local,
            members,
            probe_failures: HashMap::new(),
            failure_threshold,
        }
    }

    /// The local replica's own address.
    pub fn local(&self) -> &Address {
        &self.local
    }

    /// All members, in insertion order.
    pub fn members(&self) -> &[Address] {
        &self.members
    }

    /// All members except the local replica.
    pub fn peers(&self) -> Vec<Address> {
        self.members
            .iter()
            .filter(|a| **a != self.local)
            .cloned()
            .collect()
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.members.contains(addr)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add a replica. Idempotent: joining a present address is a no-op.
    pub fn join(&mut self, addr: Address) -> ViewChange {
        self.probe_failures.remove(&addr);
        if self.members.contains(&addr) {
            return ViewChange::AlreadyPresent;
        }
        self.members.push(addr);
        ViewChange::Added
    }

    /// Remove a replica. Idempotent: leaving an absent address is a no-op.
    pub fn leave(&mut self, addr: &Address) -> ViewChange {
        self.probe_failures.remove(addr);
        let before = self.members.len();
        self.members.retain(|a| a != addr);
        if self.members.len() == before {
            ViewChange::NotFound
        } else {
            ViewChange::Removed
        }
    }

    /// Re-admit a peer that greeted us (e.g. a probe from a replica we had
    /// given up on). Clears any accumulated failure count.
    pub fn restore(&mut self, addr: Address) -> ViewChange {
        self.join(addr)
    }

    // =========================================================================
    // Failure Detection
    // =========================================================================

    /// Record a successful probe of a peer, resetting its failure count.
    pub fn record_probe_success(&mut self, addr: &Address) {
        self.probe_failures.remove(addr);
    }

    /// Record a failed probe of a peer. Returns true when the peer has now
    /// crossed the consecutive-failure threshold and should be removed.
    pub fn record_probe_failure(&mut self, addr: &Address) -> bool {
        if !self.members.contains(addr) {
            return false;
        }
        let count = self.probe_failures.entry(addr.clone()).or_insert(0);
        *count += 1;
        *count >= self.failure_threshold
    }

    /// Current consecutive-failure count for a peer.
    pub fn probe_failures(&self, addr: &Address) -> u32 {
        self.probe_failures.get(addr).copied().unwrap_or(0)
    }
}

// =============================================================================
// Tests
// =============================================================================
