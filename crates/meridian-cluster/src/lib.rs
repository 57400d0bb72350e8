//! Meridian Cluster - Distributed Coordination Logic
//!
//! The network-free core of the Meridian key-value store: cluster
//! membership, vector clocks and causal delivery, the sharded key space,
//! and the single-decree Paxos roles used to agree on shard assignment.
//!
//! Every component here is a plain state machine. It consumes typed
//! messages and returns typed messages or outcomes; all actual network
//! traffic is performed by the server crate after the relevant lock has
//! been released.
//!
//! @version 0.1.0
//! @author Meridian Development Team

pub mod address;
pub mod causal;
pub mod clock;
pub mod paxos;
pub mod shard;
pub mod store;
pub mod view;

pub use address::Address;
pub use causal::{
    ActionDependency, CausalEngine, CausalMetadata, Delivery, OutboundWrite, Sender, Write,
    WriteAction,
};
pub use clock::VectorClock;
pub use paxos::{
    Acceptor, PaxosMessage, ProcessedProposals, Proposal, Proposer, ProposerState, PromiseReply,
    PromiseStatus, RoundOutcome, ShardAssignment,
};
pub use shard::{ShardId, ShardMap, SHARD_NAMES};
pub use store::{KvStore, WriteResult};
pub use view::{View, ViewChange};
