//! Meridian Paxos Shard Coordinator
//!
//! Single-decree Paxos roles used to agree on a new shard assignment
//! cluster-wide. Proposer and Acceptor are colocated on every node; there
//! is no separate Learner role — Accepted messages are broadcast to all
//! nodes, each of which applies the value exactly once (deduplicated by
//! proposal identity).
//!
//! The roles here are pure state machines; the server drives the actual
//! message exchange over the `/shard-alloc` channel.
//!
//! @version 0.1.0
//! @author Meridian Development Team

use crate::address::Address;
use crate::shard::ShardMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

// =============================================================================
// Proposal
// =============================================================================

/// A proposal identity: monotonically increasing number plus the proposer's
/// address, compared lexicographically by (number, proposer) so competing
/// reallocation attempts are totally ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub number: u64,
    #[serde(rename = "sender-id")]
    pub sender_id: Address,
}

impl Proposal {
    pub fn new(number: u64, sender_id: Address) -> Self {
        Self { number, sender_id }
    }

    /// Dedup key for processed-proposal tracking.
    pub fn key(&self) -> String {
        format!("{}-{}", self.sender_id, self.number)
    }
}

impl PartialOrd for Proposal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Proposal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number
            .cmp(&other.number)
            .then_with(|| self.sender_id.cmp(&other.sender_id))
    }
}

// =============================================================================
// Messages
// =============================================================================

/// The value under agreement: a complete shard assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardAssignment {
    pub shards: ShardMap,
}

impl ShardAssignment {
    pub fn new(shards: ShardMap) -> Self {
        Self { shards }
    }
}

/// Promise verdict returned by an acceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromiseStatus {
    #[serde(rename = "accepted")]
    Accepted,
    #[serde(rename = "rejected")]
    Rejected,
}

/// Wire messages exchanged on the `/shard-alloc` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PaxosMessage {
    #[serde(rename = "PREPARE")]
    Prepare { proposal: Proposal },

    #[serde(rename = "PROMISE")]
    Promise {
        auid: Address,
        proposal: Proposal,
        status: PromiseStatus,
    },

    #[serde(rename = "ACCEPT")]
    Accept {
        proposal: Proposal,
        #[serde(rename = "proposed-value")]
        value: ShardAssignment,
    },

    #[serde(rename = "ACCEPTED")]
    Accepted {
        proposal: Proposal,
        #[serde(rename = "accepted-value")]
        value: ShardAssignment,
    },
}

// =============================================================================
// Acceptor
// =============================================================================

/// The acceptor role. Lives for the duration of one reallocation round; no
/// cross-round history is needed beyond the monotonic proposal numbers.
#[derive(Debug, Clone)]
pub struct Acceptor {
    auid: Address,
    promised: Option<Proposal>,
    accepted: Option<(Proposal, ShardAssignment)>,
}

impl Acceptor {
    pub fn new(auid: Address) -> Self {
        Self {
            auid,
            promised: None,
            accepted: None,
        }
    }

    pub fn promised(&self) -> Option<&Proposal> {
        self.promised.as_ref()
    }

    pub fn accepted(&self) -> Option<&(Proposal, ShardAssignment)> {
        self.accepted.as_ref()
    }

    /// Phase 1: handle a Prepare. Promise when there is no prior promise or
    /// the number is strictly greater; a tied number from a different
    /// proposer is rejected. The reply always carries the currently
    /// promised proposal.
    pub fn on_prepare(&mut self, proposal: Proposal) -> PaxosMessage {
        let status = match &self.promised {
            None => {
                self.promised = Some(proposal);
                PromiseStatus::Accepted
            }
            Some(current) if proposal.number > current.number => {
                tracing::debug!(
                    acceptor = %self.auid,
                    number = proposal.number,
                    previous = current.number,
                    "promising higher proposal"
                );
                self.promised = Some(proposal);
                PromiseStatus::Accepted
            }
            Some(current) if proposal == *current => PromiseStatus::Accepted,
            Some(_) => PromiseStatus::Rejected,
        };

        PaxosMessage::Promise {
            auid: self.auid.clone(),
            proposal: self
                .promised
                .clone()
                .expect("a promise exists after handling prepare"),
            status,
        }
    }

    /// Reject a Prepare outright (used while this node's own proposer role
    /// is active), echoing the offered proposal with a rejected status.
    pub fn reject(&self, proposal: Proposal) -> PaxosMessage {
        PaxosMessage::Promise {
            auid: self.auid.clone(),
            proposal,
            status: PromiseStatus::Rejected,
        }
    }

    /// Phase 2: handle an Accept. Applied only when the proposal number is
    /// at least the promised number; returns the Accepted message to
    /// broadcast to all learners, or None when the accept is stale.
    pub fn on_accept(
        &mut self,
        proposal: Proposal,
        value: ShardAssignment,
    ) -> Option<PaxosMessage> {
        if let Some(promised) = &self.promised {
            if proposal.number < promised.number {
                tracing::debug!(
                    acceptor = %self.auid,
                    number = proposal.number,
                    promised = promised.number,
                    "ignoring stale accept"
                );
                return None;
            }
        }
        self.promised = Some(proposal.clone());
        self.accepted = Some((proposal.clone(), value.clone()));
        Some(PaxosMessage::Accepted { proposal, value })
    }

    /// Reset for the next reallocation round.
    pub fn reset(&mut self) {
        self.promised = None;
        self.accepted = None;
    }
}

// =============================================================================
// Proposer
// =============================================================================

/// Proposer role state. A node runs at most one active proposer at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposerState {
    Idle,
    Preparing(Proposal),
    Accepting(Proposal),
}

/// A promise reply gathered during phase 1.
#[derive(Debug, Clone)]
pub struct PromiseReply {
    pub auid: Address,
    pub proposal: Proposal,
    pub status: PromiseStatus,
}

/// Outcome of tallying phase-1 replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// A strict majority promised; move to the accept phase.
    Quorum { proposal: Proposal },
    /// No quorum, but promises outnumbered competing replies: retry with a
    /// fresh, higher number, excluding the conflicting senders.
    Retry { exclude: Vec<Address> },
    /// No quorum and no grounds to retry; the proposer role is abandoned.
    Abandoned,
}

/// The proposer role.
#[derive(Debug, Clone)]
pub struct Proposer {
    address: Address,
    next_number: u64,
    state: ProposerState,
}

impl Proposer {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            next_number: 1,
            state: ProposerState::Idle,
        }
    }

    pub fn state(&self) -> &ProposerState {
        &self.state
    }

    /// Whether this node currently has an active proposer role.
    pub fn is_active(&self) -> bool {
        self.state != ProposerState::Idle
    }

    /// Start a prepare round with a fresh, strictly increasing number.
    pub fn begin_round(&mut self) -> Proposal {
        let proposal = Proposal::new(self.next_number, self.address.clone());
        self.next_number += 1;
        self.state = ProposerState::Preparing(proposal.clone());
        proposal
    }

    /// Note a competing proposal number so the next round outbids it.
    pub fn observe_number(&mut self, number: u64) {
        self.next_number = self.next_number.max(number + 1);
    }

    /// Tally phase-1 replies against a quorum over `cluster_size` nodes
    /// (this node's own implicit promise counts).
    pub fn tally(&mut self, cluster_size: usize, replies: &[PromiseReply]) -> RoundOutcome {
        let ProposerState::Preparing(proposal) = self.state.clone() else {
            return RoundOutcome::Abandoned;
        };

        let mut promises = 0usize;
        let mut competing: Vec<Address> = Vec::new();
        for reply in replies {
            if reply.status == PromiseStatus::Accepted && reply.proposal == proposal {
                promises += 1;
            } else {
                self.observe_number(reply.proposal.number);
                if reply.proposal.sender_id != self.address
                    && !competing.contains(&reply.proposal.sender_id)
                {
                    competing.push(reply.proposal.sender_id.clone());
                }
            }
        }

        let rejections = replies.len() - promises;
        // Strict majority, counting our own promise.
        if (promises + 1) * 2 > cluster_size {
            self.state = ProposerState::Accepting(proposal.clone());
            return RoundOutcome::Quorum { proposal };
        }

        if promises > rejections {
            self.state = ProposerState::Idle;
            RoundOutcome::Retry { exclude: competing }
        } else {
            self.state = ProposerState::Idle;
            RoundOutcome::Abandoned
        }
    }

    /// The accept phase finished (or was given up); release the role.
    pub fn finish(&mut self) {
        self.state = ProposerState::Idle;
    }
}

// =============================================================================
// Processed Proposals
// =============================================================================

/// Tracks `(proposer, number)` keys already applied so re-delivered
/// Accepted messages are ignored.
#[derive(Debug, Clone, Default)]
pub struct ProcessedProposals {
    keys: HashSet<String>,
}

impl ProcessedProposals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time a proposal is seen, false on re-delivery.
    pub fn first_delivery(&mut self, proposal: &Proposal) -> bool {
        self.keys.insert(proposal.key())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
