//! Meridian Shard Coordinator
//!
//! Drives Paxos shard reallocation: runs the proposer side of a round over
//! the `/shard-alloc` channel, answers incoming Paxos messages through the
//! colocated acceptor, and applies an agreed shard map exactly once —
//! triggering key migration so every record lands on its newly-designated
//! shard.
//!
//! @version 0.1.0
//! @author Meridian Development Team

use crate::state::AppState;
use futures::future::join_all;
use meridian_cluster::{
    Address, PaxosMessage, Proposal, PromiseReply, RoundOutcome, ShardAssignment, ShardId,
    ShardMap,
};
use meridian_common::{MeridianError, Result};
use serde_json::{json, Value};
use std::collections::HashMap;

// =============================================================================
// Proposer Driver
// =============================================================================

/// Run a full reallocation round for the given assignment: prepare, tally
/// promises, and on quorum broadcast the accept. Retries with a fresh,
/// higher proposal number (excluding conflicting senders) for a bounded
/// number of rounds when promises outnumber rejections.
pub async fn run_reallocation(state: &AppState, assignment: ShardAssignment) -> Result<()> {
    let max_rounds = state.config.cluster.max_proposal_rounds;
    let mut excluded: Vec<Address> = Vec::new();

    for round in 1..=max_rounds {
        let (proposal, targets, cluster_size) = {
            let view = state.view.read();
            let mut paxos = state.paxos.write();
            let proposal = paxos.proposer.begin_round();
            let targets: Vec<Address> = view
                .peers()
                .into_iter()
                .filter(|a| !excluded.contains(a))
                .collect();
            (proposal, targets, view.len())
        };

        tracing::info!(number = proposal.number, round, "starting shard reallocation round");

        let prepare = PaxosMessage::Prepare {
            proposal: proposal.clone(),
        };
        let replies = join_all(
            targets
                .iter()
                .map(|peer| state.peers.send_prepare(peer, &prepare)),
        )
        .await;

        let promises: Vec<PromiseReply> = targets
            .iter()
            .zip(replies)
            .filter_map(|(peer, reply)| match reply {
                Ok(PaxosMessage::Promise {
                    auid,
                    proposal,
                    status,
                }) => Some(PromiseReply {
                    auid,
                    proposal,
                    status,
                }),
                Ok(other) => {
                    tracing::warn!(peer = %peer, reply = ?other, "unexpected prepare reply");
                    None
                }
                Err(err) => {
                    tracing::warn!(peer = %peer, error = %err, "no promise reply");
                    None
                }
            })
            .collect();

        let outcome = {
            state
                .paxos
                .write()
                .proposer
                .tally(cluster_size, &promises)
        };

        match outcome {
            RoundOutcome::Quorum { proposal } => {
                let accept = PaxosMessage::Accept {
                    proposal: proposal.clone(),
                    value: assignment.clone(),
                };
                let acks = join_all(
                    targets
                        .iter()
                        .map(|peer| state.peers.send_paxos(peer, &accept)),
                )
                .await;
                for (peer, ack) in targets.iter().zip(acks) {
                    if let Err(err) = ack {
                        tracing::warn!(peer = %peer, error = %err, "accept delivery failed");
                    }
                }

                // Our own colocated acceptor applies the value as well.
                let accepted = {
                    state
                        .paxos
                        .write()
                        .acceptor
                        .on_accept(proposal, assignment.clone())
                };
                if let Some(PaxosMessage::Accepted { proposal, value }) = accepted {
                    broadcast_accepted(
                        state,
                        PaxosMessage::Accepted {
                            proposal: proposal.clone(),
                            value: value.clone(),
                        },
                    );
                    apply_assignment(state, proposal, value).await;
                }

                state.paxos.write().proposer.finish();
                return Ok(());
            }
            RoundOutcome::Retry { exclude } => {
                tracing::info!(round, excluding = ?exclude, "no quorum, retrying with higher number");
                excluded.extend(exclude);
            }
            RoundOutcome::Abandoned => {
                tracing::info!(round, "proposer outnumbered, backing off");
                return Err(MeridianError::Network(
                    "shard reallocation lost to a competing proposal".into(),
                ));
            }
        }
    }

    state.paxos.write().proposer.finish();
    Err(MeridianError::Network(
        "shard reallocation did not reach quorum".into(),
    ))
}

// =============================================================================
// Message Handling (Acceptor / Learner)
// =============================================================================

/// Answer an incoming Paxos message. Prepares are answered synchronously
/// with a Promise; Accept and Accepted are acknowledged with a bare ok,
/// stale or duplicate deliveries included.
pub async fn handle_message(state: &AppState, message: PaxosMessage) -> Value {
    match message {
        PaxosMessage::Prepare { proposal } => {
            let reply = {
                let mut paxos = state.paxos.write();
                if paxos.proposer.is_active() {
                    // One active role at a time: our own proposal is in
                    // flight, so competing prepares are refused.
                    paxos.proposer.observe_number(proposal.number);
                    paxos.acceptor.reject(proposal)
                } else {
                    paxos.acceptor.on_prepare(proposal)
                }
            };
            serde_json::to_value(&reply).unwrap_or_else(|_| json!({"error": "internal"}))
        }

        PaxosMessage::Accept { proposal, value } => {
            let accepted = {
                let mut paxos = state.paxos.write();
                paxos.proposer.finish();
                paxos.acceptor.on_accept(proposal, value)
            };
            if let Some(PaxosMessage::Accepted { proposal, value }) = accepted {
                broadcast_accepted(
                    state,
                    PaxosMessage::Accepted {
                        proposal: proposal.clone(),
                        value: value.clone(),
                    },
                );
                apply_assignment(state, proposal, value).await;
            }
            json!({"message": "ok"})
        }

        PaxosMessage::Accepted { proposal, value } => {
            state.paxos.write().proposer.finish();
            apply_assignment(state, proposal, value).await;
            json!({"message": "ok"})
        }

        PaxosMessage::Promise { .. } => json!({"message": "ignored"}),
    }
}

/// Broadcast an Accepted message to every peer (learners are colocated
/// with acceptors on all nodes). Fire-and-forget.
fn broadcast_accepted(state: &AppState, message: PaxosMessage) {
    for peer in state.peer_addresses() {
        let state = state.clone();
        let message = message.clone();
        tokio::spawn(async move {
            if let Err(err) = state.peers.send_paxos(&peer, &message).await {
                tracing::warn!(peer = %peer, error = %err, "accepted delivery failed");
            }
        });
    }
}

// =============================================================================
// Applying an Agreed Map
// =============================================================================

/// Apply an agreed shard assignment exactly once (deduplicated by proposal
/// identity), then migrate keys: a node entering a shard pulls a snapshot
/// from an existing member, and every node purges keys that no longer hash
/// to its shard, bulk-transferring them to the new owners.
pub async fn apply_assignment(state: &AppState, proposal: Proposal, value: ShardAssignment) {
    let local = state.local_address();

    let (old_shard, new_map) = {
        let mut shards = state.shards.write();
        if !shards.processed.first_delivery(&proposal) {
            tracing::debug!(proposal = %proposal.key(), "duplicate accepted message ignored");
            return;
        }
        let old = shards.map.shard_of(&local).cloned();
        shards.map = value.shards.clone();
        (old, value.shards)
    };

    let new_shard = new_map.shard_of(&local).cloned();
    tracing::info!(
        proposal = %proposal.key(),
        shard = new_shard.as_ref().map(|s| s.as_str()).unwrap_or("none"),
        "applied agreed shard map"
    );

    if let Some(shard) = &new_shard {
        if old_shard.as_ref() != Some(shard) {
            pull_snapshot(state, shard, &new_map).await;
        }
    }

    migrate_keys(state, &new_map, new_shard.as_ref()).await;
}

/// Replicate the owning shard's data when this node newly joins a shard.
async fn pull_snapshot(state: &AppState, shard: &ShardId, map: &ShardMap) {
    let local = state.local_address();
    let members: Vec<Address> = map
        .members(shard)
        .map(|m| m.to_vec())
        .unwrap_or_default()
        .into_iter()
        .filter(|m| *m != local)
        .collect();

    for member in members {
        match state.peers.fetch_all(&member).await {
            Ok((records, clocks)) => {
                let count = records.len();
                state.engine.write().adopt_snapshot(records, &clocks);
                tracing::info!(from = %member, records = count, "adopted shard snapshot");
                return;
            }
            Err(err) => {
                tracing::warn!(peer = %member, error = %err, "snapshot fetch failed");
            }
        }
    }
}

/// Purge keys that no longer hash to this node's shard and push them to
/// the members of the shard that now owns them.
async fn migrate_keys(state: &AppState, map: &ShardMap, own: Option<&ShardId>) {
    let moved = {
        let mut engine = state.engine.write();
        match own {
            Some(own) => {
                let map = map.clone();
                let own = own.clone();
                engine
                    .store_mut()
                    .drain_not_matching(move |key| map.shard_for_key(key) == Some(&own))
            }
            // Not a member of any shard: everything moves out.
            None => engine.store_mut().drain_not_matching(|_| false),
        }
    };
    if moved.is_empty() {
        return;
    }

    let mut grouped: HashMap<ShardId, HashMap<String, Value>> = HashMap::new();
    for (key, value) in moved {
        if let Some(owner) = map.shard_for_key(&key) {
            grouped.entry(owner.clone()).or_default().insert(key, value);
        }
    }

    let local = state.local_address();
    for (shard, records) in grouped {
        let members: Vec<Address> = map
            .members(&shard)
            .map(|m| m.to_vec())
            .unwrap_or_default()
            .into_iter()
            .filter(|m| *m != local)
            .collect();

        tracing::info!(shard = %shard, records = records.len(), "transferring keys to new owner");
        for member in &members {
            if let Err(err) = state.peers.load_all(member, &records).await {
                tracing::warn!(peer = %member, error = %err, "bulk transfer failed");
            }
        }
    }
}
