//! Meridian Server State
//!
//! Application state shared across request handlers. Each mutable cluster
//! component — the view, the causal engine (clock + store + delayed
//! queue), the shard state, and the Paxos roles — sits behind its own
//! lock. Lock scopes never span an outbound network call: data is copied
//! out under the lock and sent after release. Where two locks are needed,
//! they are taken in the fixed order view → engine → paxos → shards.
//!
//! @version 0.1.0
//! @author Meridian Development Team

use crate::config::ServerConfig;
use crate::peer::PeerClient;
use meridian_cluster::{
    Acceptor, Address, CausalEngine, ProcessedProposals, Proposer, ShardId, ShardMap, View,
};
use parking_lot::RwLock;
use std::sync::Arc;

// =============================================================================
// Shard State
// =============================================================================

/// The locally-held shard map plus the dedup set for applied proposals.
#[derive(Debug)]
pub struct ShardState {
    pub map: ShardMap,
    pub processed: ProcessedProposals,
}

impl ShardState {
    pub fn new() -> Self {
        Self {
            map: ShardMap::new(),
            processed: ProcessedProposals::new(),
        }
    }
}

impl Default for ShardState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Paxos Round State
// =============================================================================

/// The colocated Paxos roles for this node.
#[derive(Debug)]
pub struct PaxosRound {
    pub proposer: Proposer,
    pub acceptor: Acceptor,
}

impl PaxosRound {
    pub fn new(local: Address) -> Self {
        Self {
            proposer: Proposer::new(local.clone()),
            acceptor: Acceptor::new(local),
        }
    }
}

// =============================================================================
// Routing Decision
// =============================================================================

/// Where a key-space request should be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRoute {
    /// Shards have not formed; operate on the whole view (non-sharded mode).
    Unsharded,
    /// This replica's shard owns the key.
    Local(ShardId),
    /// Another shard owns the key; forward to one of these members.
    Remote(ShardId, Vec<Address>),
}

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub view: Arc<RwLock<View>>,
    pub engine: Arc<RwLock<CausalEngine>>,
    pub shards: Arc<RwLock<ShardState>>,
    pub paxos: Arc<RwLock<PaxosRound>>,
    pub peers: PeerClient,
}

impl AppState {
    /// Create application state from the node configuration.
    pub fn new(config: ServerConfig) -> Self {
        let local = config.socket_address.clone();
        let view = View::new(
            local.clone(),
            config.view.clone(),
            config.cluster.probe_failure_threshold,
        );
        let engine = CausalEngine::new(local.clone(), view.members().iter());
        let peers = PeerClient::new(local.clone(), config.cluster.clone());

        Self {
            config: Arc::new(config),
            view: Arc::new(RwLock::new(view)),
            engine: Arc::new(RwLock::new(engine)),
            shards: Arc::new(RwLock::new(ShardState::new())),
            paxos: Arc::new(RwLock::new(PaxosRound::new(local))),
            peers,
        }
    }

    /// This node's public address.
    pub fn local_address(&self) -> Address {
        self.config.socket_address.clone()
    }

    /// Snapshot of all peers currently in the view.
    pub fn peer_addresses(&self) -> Vec<Address> {
        self.view.read().peers()
    }

    /// The shard this replica currently belongs to, if any.
    pub fn own_shard(&self) -> Option<ShardId> {
        let local = self.local_address();
        self.shards.read().map.shard_of(&local).cloned()
    }

    /// Decide where a key-space request should be handled. Forwarding
    /// candidates are restricted to members still present in the view, so
    /// replicas the failure detector has removed are never selected.
    pub fn route_key(&self, key: &str) -> KeyRoute {
        let local = self.local_address();
        let view = self.view.read();
        let shards = self.shards.read();

        let Some(owner) = shards.map.shard_for_key(key) else {
            return KeyRoute::Unsharded;
        };
        let members = shards
            .map
            .members(owner)
            .map(|m| m.to_vec())
            .unwrap_or_default();

        if members.contains(&local) {
            KeyRoute::Local(owner.clone())
        } else {
            let live: Vec<Address> = members
                .into_iter()
                .filter(|m| view.contains(m))
                .collect();
            KeyRoute::Remote(owner.clone(), live)
        }
    }

    /// Replication targets for an accepted client write: the other members
    /// of this replica's shard, or every other view member in non-sharded
    /// mode. Targets are filtered to live view members.
    pub fn replication_targets(&self) -> Vec<Address> {
        let local = self.local_address();
        let view = self.view.read();
        let shards = self.shards.read();

        let candidates: Vec<Address> = match shards.map.shard_of(&local) {
            Some(own) => shards
                .map
                .members(own)
                .map(|m| m.to_vec())
                .unwrap_or_default(),
            None if shards.map.is_formed() => Vec::new(),
            None => view.members().to_vec(),
        };

        candidates
            .into_iter()
            .filter(|a| *a != local && view.contains(a))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_cluster::ShardId;

    fn state_with_view(local: &str, members: &[&str]) -> AppState {
        let config = ServerConfig::new(local)
            .with_view(members.iter().map(|m| Address::new(*m)).collect());
        AppState::new(config)
    }

    fn form_shards(state: &AppState, assignments: &[(&str, &[&str])]) {
        let map = ShardMap::from_assignments(assignments.iter().map(|(id, members)| {
            (
                ShardId::from(*id),
                members.iter().map(|m| Address::new(*m)).collect::<Vec<_>>(),
            )
        }));
        state.shards.write().map = map;
    }

    #[test]
    fn test_route_key_unsharded() {
        let state = state_with_view("a:1", &["a:1", "b:1"]);
        assert_eq!(state.route_key("foo"), KeyRoute::Unsharded);
    }

    #[test]
    fn test_route_key_local_or_remote() {
        let state = state_with_view("a:1", &["a:1", "b:1", "c:1", "d:1"]);
        form_shards(
            &state,
            &[("alligator", &["a:1", "b:1"]), ("buffalo", &["c:1", "d:1"])],
        );

        // Every key routes either to our own shard or to buffalo's members.
        for key in ["foo", "bar", "baz", "qux", "quux"] {
            match state.route_key(key) {
                KeyRoute::Local(id) => assert_eq!(id, ShardId::from("alligator")),
                KeyRoute::Remote(id, members) => {
                    assert_eq!(id, ShardId::from("buffalo"));
                    assert_eq!(members.len(), 2);
                }
                KeyRoute::Unsharded => panic!("map is formed"),
            }
        }
    }

    #[test]
    fn test_route_key_skips_removed_members() {
        let state = state_with_view("a:1", &["a:1", "b:1", "c:1", "d:1"]);
        form_shards(
            &state,
            &[("alligator", &["a:1", "b:1"]), ("buffalo", &["c:1", "d:1"])],
        );

        state.view.write().leave(&Address::new("c:1"));

        for key in ["foo", "bar", "baz", "qux", "quux"] {
            if let KeyRoute::Remote(_, members) = state.route_key(key) {
                assert_eq!(members, vec![Address::new("d:1")]);
            }
        }
    }

    #[test]
    fn test_replication_targets_unsharded_uses_view() {
        let state = state_with_view("a:1", &["a:1", "b:1", "c:1"]);
        let targets = state.replication_targets();
        assert_eq!(targets.len(), 2);
        assert!(!targets.contains(&Address::new("a:1")));
    }

    #[test]
    fn test_replication_targets_sharded_uses_own_shard() {
        let state = state_with_view("a:1", &["a:1", "b:1", "c:1", "d:1"]);
        form_shards(
            &state,
            &[("alligator", &["a:1", "b:1"]), ("buffalo", &["c:1", "d:1"])],
        );

        let targets = state.replication_targets();
        assert_eq!(targets, vec![Address::new("b:1")]);
    }

    #[test]
    fn test_replication_targets_empty_when_not_in_any_shard() {
        let state = state_with_view("e:1", &["a:1", "b:1", "c:1", "d:1", "e:1"]);
        form_shards(
            &state,
            &[("alligator", &["a:1", "b:1"]), ("buffalo", &["c:1", "d:1"])],
        );

        assert!(state.replication_targets().is_empty());
    }
}
