//! Meridian Shard Map
//!
//! The sharded key space: a cluster-wide mapping from shard identifier to
//! the ordered set of member replicas, replaced atomically whenever a
//! Paxos round agrees on a new assignment.
//!
//! Keys are routed with a stable hash taken modulo the shard count and
//! indexed into the *sorted* list of shard identifiers, so every replica
//! holding the same map computes the same owner regardless of map
//! iteration order.
//!
//! @version 0.1.0
//! @author Meridian Development Team

use crate::address::Address;
use meridian_common::{MeridianError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use xxhash_rust::xxh3::xxh3_64;

/// Shard identifiers are assigned from this list, in order, as the shard
/// count grows. Alphabetical, so sorted order equals assignment order.
pub const SHARD_NAMES: [&str; 10] = [
    "alligator", "buffalo", "cat", "dog", "elephant", "fox", "goat", "horse", "iguana", "jaguar",
];

// =============================================================================
// Shard ID
// =============================================================================

/// Unique identifier for a shard.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(pub String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ShardId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Shard Map
// =============================================================================

/// Mapping from shard identifier to ordered member addresses. The BTreeMap
/// keeps identifiers sorted, which the key-routing hash relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardMap {
    shards: BTreeMap<ShardId, Vec<Address>>,
}

impl ShardMap {
    /// Create an empty (unformed) shard map.
    pub fn new() -> Self {
        Self {
            shards: BTreeMap::new(),
        }
    }

    /// Shards have been agreed at least once.
    pub fn is_formed(&self) -> bool {
        !self.shards.is_empty()
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Sorted shard identifiers.
    pub fn ids(&self) -> Vec<ShardId> {
        self.shards.keys().cloned().collect()
    }

    pub fn members(&self, id: &ShardId) -> Option<&[Address]> {
        self.shards.get(id).map(|m| m.as_slice())
    }

    /// The shard a replica belongs to, if any.
    pub fn shard_of(&self, addr: &Address) -> Option<&ShardId> {
        self.shards
            .iter()
            .find(|(_, members)| members.contains(addr))
            .map(|(id, _)| id)
    }

    /// Whether any shard contains the replica.
    pub fn contains_member(&self, addr: &Address) -> bool {
        self.shard_of(addr).is_some()
    }

    /// The shard that owns a key: stable hash modulo shard count, indexed
    /// into the sorted identifier list. None until shards have formed.
    pub fn shard_for_key(&self, key: &str) -> Option<&ShardId> {
        if self.shards.is_empty() {
            return None;
        }
        let index = (xxh3_64(key.as_bytes()) % self.shards.len() as u64) as usize;
        self.shards.keys().nth(index)
    }

    /// Append a member to a shard (add-member proposals).
    pub fn insert_member(&mut self, id: &ShardId, addr: Address) -> Result<()> {
        if !self.shards.contains_key(id) {
            return Err(MeridianError::ShardNotFound(id.to_string()));
        }
        if self.contains_member(&addr) {
            return Err(MeridianError::AlreadySharded(addr.to_string()));
        }
        self.shards
            .get_mut(id)
            .expect("shard existence checked above")
            .push(addr);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ShardId, &Vec<Address>)> {
        self.shards.iter()
    }

    /// Build from explicit assignments (tests, Paxos values).
    pub fn from_assignments<I, A>(assignments: I) -> Self
    where
        I: IntoIterator<Item = (ShardId, A)>,
        A: IntoIterator<Item = Address>,
    {
        Self {
            shards: assignments
                .into_iter()
                .map(|(id, members)| (id, members.into_iter().collect()))
                .collect(),
        }
    }
}

// =============================================================================
// Redistribution
// =============================================================================

impl ShardMap {
    /// Compute a new shard map over `view` with `shard_count` shards.
    ///
    /// Refuses (leaving all state untouched) when the view cannot give
    /// every shard at least two members. Otherwise nodes are spread evenly
    /// — per-shard capacity is `len/count`, with the remainder going to
    /// the first shards in sorted order — while keeping as many existing
    /// (node, shard) pairings as possible.
    pub fn redistribute(&self, shard_count: usize, view: &[Address]) -> Result<ShardMap> {
        if shard_count == 0 {
            return Err(MeridianError::Validation(
                "shard count must be a positive integer".into(),
            ));
        }
        if shard_count > SHARD_NAMES.len() {
            return Err(MeridianError::Validation(format!(
                "shard count must not exceed {}",
                SHARD_NAMES.len()
            )));
        }
        if view.len() < shard_count * 2 {
            return Err(MeridianError::InsufficientNodes {
                needed: shard_count * 2,
                available: view.len(),
            });
        }

        let mut pool: Vec<Address> = view.to_vec();
        pool.sort();
        pool.dedup();

        let base = pool.len() / shard_count;
        let extra = pool.len() % shard_count;

        let ids: Vec<ShardId> = SHARD_NAMES[..shard_count]
            .iter()
            .map(|n| ShardId::new(*n))
            .collect();

        // First pass: keep current members of each surviving shard, up to
        // its new capacity.
        let mut shards: BTreeMap<ShardId, Vec<Address>> = BTreeMap::new();
        let mut assigned: Vec<Address> = Vec::new();
        for (index, id) in ids.iter().enumerate() {
            let capacity = base + usize::from(index < extra);
            let kept: Vec<Address> = self
                .shards
                .get(id)
                .map(|members| {
                    members
                        .iter()
                        .filter(|m| pool.contains(m))
                        .take(capacity)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            assigned.extend(kept.iter().cloned());
            shards.insert(id.clone(), kept);
        }

        // Second pass: fill every shard to capacity from the unassigned
        // nodes, in sorted order.
        let mut leftover = pool.iter().filter(|a| !assigned.contains(a));
        for (index, id) in ids.iter().enumerate() {
            let capacity = base + usize::from(index < extra);
            let members = shards.get_mut(id).expect("shard inserted above");
            while members.len() < capacity {
                match leftover.next() {
                    Some(addr) => members.push(addr.clone()),
                    None => break,
                }
            }
        }

        Ok(ShardMap { shards })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    fn addrs(names: &[&str]) -> Vec<Address> {
        names.iter().map(|n| addr(n)).collect()
    }

    fn two_shard_map() -> ShardMap {
        ShardMap::from_assignments([
            (ShardId::from("alligator"), addrs(&["a:1", "b:1"])),
            (ShardId::from("buffalo"), addrs(&["c:1", "d:1"])),
        ])
    }

    #[test]
    fn test_hash_is_deterministic() {
        let map = two_shard_map();
        let first = map.shard_for_key("foo").unwrap().clone();
        for _ in 0..10 {
            assert_eq!(map.shard_for_key("foo"), Some(&first));
        }

        // A structurally identical map built separately agrees.
        let other = two_shard_map();
        assert_eq!(other.shard_for_key("foo"), Some(&first));
    }

    #[test]
    fn test_hash_uses_sorted_ids() {
        // Insertion order must not matter; only the sorted id list does.
        let forward = ShardMap::from_assignments([
            (ShardId::from("alligator"), addrs(&["a:1", "b:1"])),
            (ShardId::from("buffalo"), addrs(&["c:1", "d:1"])),
        ]);
        let reversed = ShardMap::from_assignments([
            (ShardId::from("buffalo"), addrs(&["c:1", "d:1"])),
            (ShardId::from("alligator"), addrs(&["a:1", "b:1"])),
        ]);

        for key in ["foo", "bar", "baz", "qux"] {
            assert_eq!(forward.shard_for_key(key), reversed.shard_for_key(key));
        }
    }

    #[test]
    fn test_unformed_map_routes_nothing() {
        let map = ShardMap::new();
        assert!(!map.is_formed());
        assert_eq!(map.shard_for_key("foo"), None);
    }

    #[test]
    fn test_shard_of() {
        let map = two_shard_map();
        assert_eq!(map.shard_of(&addr("a:1")), Some(&ShardId::from("alligator")));
        assert_eq!(map.shard_of(&addr("d:1")), Some(&ShardId::from("buffalo")));
        assert_eq!(map.shard_of(&addr("z:1")), None);
    }

    #[test]
    fn test_insert_member() {
        let mut map = two_shard_map();
        map.insert_member(&ShardId::from("alligator"), addr("e:1"))
            .unwrap();
        assert_eq!(map.members(&ShardId::from("alligator")).unwrap().len(), 3);

        let err = map
            .insert_member(&ShardId::from("alligator"), addr("c:1"))
            .unwrap_err();
        assert!(matches!(err, MeridianError::AlreadySharded(_)));

        let err = map
            .insert_member(&ShardId::from("zebra"), addr("f:1"))
            .unwrap_err();
        assert!(matches!(err, MeridianError::ShardNotFound(_)));
    }

    #[test]
    fn test_redistribute_rejects_below_fault_tolerance_floor() {
        let map = ShardMap::new();
        let view = addrs(&["a:1", "b:1", "c:1"]);

        let err = map.redistribute(2, &view).unwrap_err();
        assert!(matches!(
            err,
            MeridianError::InsufficientNodes {
                needed: 4,
                available: 3
            }
        ));
    }

    #[test]
    fn test_redistribute_even_split() {
        let map = ShardMap::new();
        let view = addrs(&["a:1", "b:1", "c:1", "d:1"]);

        let new = map.redistribute(2, &view).unwrap();
        assert_eq!(new.shard_count(), 2);
        assert_eq!(new.members(&ShardId::from("alligator")).unwrap().len(), 2);
        assert_eq!(new.members(&ShardId::from("buffalo")).unwrap().len(), 2);
    }

    #[test]
    fn test_redistribute_remainder_goes_to_first_shards() {
        let map = ShardMap::new();
        let view = addrs(&["a:1", "b:1", "c:1", "d:1", "e:1"]);

        let new = map.redistribute(2, &view).unwrap();
        assert_eq!(new.members(&ShardId::from("alligator")).unwrap().len(), 3);
        assert_eq!(new.members(&ShardId::from("buffalo")).unwrap().len(), 2);
    }

    #[test]
    fn test_redistribute_every_node_in_exactly_one_shard() {
        let map = ShardMap::new();
        let view = addrs(&["a:1", "b:1", "c:1", "d:1", "e:1", "f:1", "g:1"]);

        let new = map.redistribute(3, &view).unwrap();
        let mut seen = Vec::new();
        for (_, members) in new.iter() {
            for m in members {
                assert!(!seen.contains(m), "{m} appears in two shards");
                seen.push(m.clone());
            }
        }
        assert_eq!(seen.len(), view.len());
    }

    #[test]
    fn test_redistribute_preserves_existing_pairings() {
        let current = two_shard_map();
        let view = addrs(&["a:1", "b:1", "c:1", "d:1", "e:1", "f:1"]);

        let new = current.redistribute(2, &view).unwrap();

        // Old members stay in their shards; only the newcomers move in.
        let alligator = new.members(&ShardId::from("alligator")).unwrap();
        let buffalo = new.members(&ShardId::from("buffalo")).unwrap();
        assert!(alligator.contains(&addr("a:1")));
        assert!(alligator.contains(&addr("b:1")));
        assert!(buffalo.contains(&addr("c:1")));
        assert!(buffalo.contains(&addr("d:1")));
    }

    #[test]
    fn test_redistribute_drops_departed_nodes() {
        let current = two_shard_map();
        // d:1 left the view.
        let view = addrs(&["a:1", "b:1", "c:1", "e:1"]);

        let new = current.redistribute(2, &view).unwrap();
        assert!(!new.contains_member(&addr("d:1")));
        assert!(new.contains_member(&addr("e:1")));
        for (_, members) in new.iter() {
            assert!(members.len() >= 2);
        }
    }

    #[test]
    fn test_redistribute_growing_shard_count_uses_next_names() {
        let current = two_shard_map();
        let view = addrs(&["a:1", "b:1", "c:1", "d:1", "e:1", "f:1"]);

        let new = current.redistribute(3, &view).unwrap();
        assert_eq!(
            new.ids(),
            vec![
                ShardId::from("alligator"),
                ShardId::from("buffalo"),
                ShardId::from("cat")
            ]
        );
    }

    #[test]
    fn test_redistribute_rejects_zero_shards() {
        let map = ShardMap::new();
        let err = map.redistribute(0, &addrs(&["a:1", "b:1"])).unwrap_err();
        assert!(matches!(err, MeridianError::Validation(_)));
    }

    #[test]
    fn test_serde_shape() {
        let map = two_shard_map();
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "alligator": ["a:1", "b:1"],
                "buffalo": ["c:1", "d:1"],
            })
        );
        let back: ShardMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }
}
