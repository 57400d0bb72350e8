//! Meridian Vector Clocks
//!
//! Vector clocks for tracking causality between writes. Each replica keeps
//! one logical counter per known replica; a replica's own counter advances
//! by exactly one for every client write it delivers locally.
//!
//! @version 0.1.0
//! @author Meridian Development Team

use crate::address::Address;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

// =============================================================================
// Vector Clock
// =============================================================================

/// A vector clock mapping replica addresses to logical counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    clocks: HashMap<Address, u64>,
}

impl VectorClock {
    /// Create a new empty vector clock.
    pub fn new() -> Self {
        Self {
            clocks: HashMap::new(),
        }
    }

    /// Create a clock with a zero entry for every given replica.
    pub fn for_replicas<'a>(replicas: impl IntoIterator<Item = &'a Address>) -> Self {
        Self {
            clocks: replicas.into_iter().map(|a| (a.clone(), 0)).collect(),
        }
    }

    /// Increment the counter for a replica.
    pub fn increment(&mut self, replica: &Address) {
        *self.clocks.entry(replica.clone()).or_insert(0) += 1;
    }

    /// Get the counter for a replica (0 if absent).
    pub fn get(&self, replica: &Address) -> u64 {
        self.clocks.get(replica).copied().unwrap_or(0)
    }

    /// Set the counter for a replica.
    pub fn set(&mut self, replica: &Address, value: u64) {
        self.clocks.insert(replica.clone(), value);
    }

    /// Add a zero entry for a newly-joined replica, if not already tracked.
    pub fn track(&mut self, replica: &Address) {
        self.clocks.entry(replica.clone()).or_insert(0);
    }

    /// Drop the entry for a permanently-removed replica.
    pub fn forget(&mut self, replica: &Address) {
        self.clocks.remove(replica);
    }

    /// Merge with another clock (entry-wise maximum).
    pub fn merge(&mut self, other: &VectorClock) {
        for (replica, &value) in &other.clocks {
            let current = self.clocks.entry(replica.clone()).or_insert(0);
            *current = (*current).max(value);
        }
    }

    /// Check if this clock happened at-or-before another (every entry <=).
    pub fn dominated_by(&self, other: &VectorClock) -> bool {
        self.clocks
            .iter()
            .all(|(replica, &value)| value <= other.get(replica))
    }

    /// Compare two clocks under the happens-before partial order.
    pub fn partial_order(&self, other: &VectorClock) -> Option<Ordering> {
        let le = self.dominated_by(other);
        let ge = other.dominated_by(self);
        match (le, ge) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => None,
        }
    }

    /// Check if two clocks are concurrent (incomparable).
    pub fn is_concurrent(&self, other: &VectorClock) -> bool {
        self.partial_order(other).is_none()
    }

    /// Iterate over all tracked entries.
    pub fn entries(&self) -> impl Iterator<Item = (&Address, u64)> {
        self.clocks.iter().map(|(a, &v)| (a, v))
    }

    /// Number of replicas tracked.
    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
