//! Meridian Replication Broadcaster
//!
//! Fire-and-forget fan-out of accepted writes to shard peers, synchronous
//! fan-out of view changes, and failure reporting back to membership.
//! Causal delivery is enforced entirely at the receiver, so no
//! acknowledgment is awaited for correctness; a peer that cannot be
//! reached is reported as a liveness failure instead of being retried.
//!
//! @version 0.1.0
//! @author Meridian Development Team

use crate::state::AppState;
use futures::future::join_all;
use meridian_cluster::{Address, OutboundWrite, ViewChange};
use std::collections::HashSet;

// =============================================================================
// Write Replication
// =============================================================================

/// Fan out delivered client writes to the other members of this replica's
/// shard (or of the whole view in non-sharded mode). Each send runs as its
/// own task; the caller does not wait.
pub fn broadcast_writes(state: &AppState, writes: Vec<OutboundWrite>) {
    let targets = state.replication_targets();
    if targets.is_empty() {
        return;
    }

    for outbound in writes {
        for peer in &targets {
            let state = state.clone();
            let peer = peer.clone();
            let outbound = outbound.clone();
            tokio::spawn(async move {
                if let Err(err) = state
                    .peers
                    .send_write(&peer, &outbound.write, &outbound.metadata)
                    .await
                {
                    tracing::warn!(peer = %peer, error = %err, "replication send failed");
                    report_unreachable(&state, &peer).await;
                }
            });
        }
    }
}

// =============================================================================
// Failure Reporting
// =============================================================================

/// Report a peer that failed an outbound call. Counts toward the same
/// consecutive-failure threshold as the probe loop; crossing it removes
/// the peer and informs the survivors.
pub async fn report_unreachable(state: &AppState, peer: &Address) {
    let escalated = {
        let mut view = state.view.write();
        view.record_probe_failure(peer)
    };
    if escalated {
        tracing::warn!(peer = %peer, "peer exceeded failure threshold, removing from view");
        cascade_delete(state, peer.clone()).await;
    }
}

// =============================================================================
// View Fan-Out
// =============================================================================

/// Announce this node to every initial peer at startup (peer-originated,
/// so receivers do not re-broadcast).
pub async fn announce_self(state: &AppState) {
    let local = state.local_address();
    let peers = state.peer_addresses();
    let sends = peers.iter().map(|peer| state.peers.view_put(peer, &local));
    for (peer, result) in peers.iter().zip(join_all(sends).await) {
        match result {
            Ok(()) => tracing::debug!(peer = %peer, "announced to peer"),
            Err(err) => tracing::warn!(peer = %peer, error = %err, "failed to announce"),
        }
    }
}

/// Synchronously fan out a client-originated view addition to every other
/// member. Unreachable members are reported to the failure detector.
pub async fn fanout_view_put(state: &AppState, target: &Address) {
    let peers: Vec<Address> = state
        .peer_addresses()
        .into_iter()
        .filter(|p| p != target)
        .collect();

    let sends = peers.iter().map(|peer| state.peers.view_put(peer, target));
    let results = join_all(sends).await;
    for (peer, result) in peers.iter().zip(results) {
        if let Err(err) = result {
            tracing::warn!(peer = %peer, error = %err, "view add fan-out failed");
            report_unreachable(state, peer).await;
        }
    }
}

/// Remove a replica and synchronously fan the deletion out to every other
/// member. A member that cannot be reached during the fan-out is queued as
/// a follow-up delete, so a cascade of offline nodes is eventually removed
/// everywhere.
pub async fn cascade_delete(state: &AppState, target: Address) {
    let mut work = vec![target];
    let mut done: HashSet<Address> = HashSet::new();

    while let Some(addr) = work.pop() {
        if !done.insert(addr.clone()) {
            continue;
        }

        let removed = {
            let mut view = state.view.write();
            view.leave(&addr) == ViewChange::Removed
        };
        if removed {
            state.engine.write().forget_replica(&addr);
            tracing::info!(replica = %addr, "replica removed from view");
        }

        let peers = state.peer_addresses();
        let sends = peers.iter().map(|peer| state.peers.view_delete(peer, &addr));
        let results = join_all(sends).await;
        for (peer, result) in peers.iter().zip(results) {
            if result.is_err() && !done.contains(peer) {
                tracing::warn!(peer = %peer, "unreachable during delete fan-out, queueing follow-up");
                work.push(peer.clone());
            }
        }
    }
}
